//! Process logger shared by the supervisor and its children.
//!
//! Every process writes `[pid elapsed LEVEL target] message` lines to
//! stderr. The supervisor inherits its children's stderr, so the combined
//! journal tells the camera processes apart by pid without any log routing.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

struct ProcessLogger {
    level: LevelFilter,
    pid: u32,
    started: Instant,
}

impl ProcessLogger {
    fn format(&self, record: &Record) -> String {
        format!(
            "[{pid} {elapsed:9.3}s {level:<5} {target}] {args}",
            pid = self.pid,
            elapsed = self.started.elapsed().as_secs_f64(),
            level = record.level(),
            target = record.target(),
            args = record.args(),
        )
    }
}

impl Log for ProcessLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(std::io::stderr().lock(), "{}", self.format(record));
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<ProcessLogger> = OnceLock::new();

/// Install the process logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| ProcessLogger {
            level,
            pid: std::process::id(),
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}
