use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use astrolabe_core::Defaults;
use astrolabe_server::global::{CameraEndpoint, GlobalUnit};
use astrolabe_server::server::{bind_and_serve, Handler};
use astrolabe_server::supervisor::{self, SupervisorConfig};
use astrolabe_server::unit::CameraUnit;
use clap::{Parser, Subcommand};
use log::{error, LevelFilter};

#[derive(Parser)]
#[command(name = "astrolabe", version, about = "Robot vision coprocessor")]
struct Cli {
    /// Log level filter.
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover cameras and supervise one process per camera.
    Serve {
        #[arg(long, default_value = "astrolabe-data")]
        data_dir: PathBuf,
        /// Camera processes listen on base_port, base_port + 1, ...
        #[arg(long, default_value_t = 50000)]
        base_port: u16,
        #[arg(long, default_value_t = 50100)]
        global_port: u16,
        #[arg(long, default_value_t = 5)]
        max_restarts: u32,
    },
    /// Serve one camera (normally spawned by `serve`).
    Camera {
        /// Device node, or `test` for the synthetic source.
        #[arg(long)]
        device: PathBuf,
        #[arg(long)]
        serial: String,
        #[arg(long)]
        port: u16,
        /// CPU core to pin to.
        #[arg(long)]
        core: Option<usize>,
        #[arg(long, default_value = "astrolabe-data")]
        data_dir: PathBuf,
    },
    /// Serve the cross-camera aggregator (normally spawned by `serve`).
    Global {
        #[arg(long)]
        port: u16,
        #[arg(long)]
        core: Option<usize>,
        /// Endpoint list as JSON, produced by the supervisor.
        #[arg(long, default_value = "[]")]
        cameras: String,
    },
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    if let Err(err) = astrolabe_core::init_with_level(cli.log_level) {
        eprintln!("logger init failed: {err}");
    }

    match run(cli.command) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Serve {
            data_dir,
            base_port,
            global_port,
            max_restarts,
        } => {
            let config = SupervisorConfig {
                data_dir,
                base_port,
                global_port,
                max_restarts,
            };
            supervisor::run(&config)?;
        }
        Command::Camera {
            device,
            serial,
            port,
            core,
            data_dir,
        } => {
            if let Some(core) = core {
                supervisor::pin_to_core(core);
            }
            let unit = CameraUnit::new(&serial, &device, &data_dir, Defaults::default())?;
            let handler: Arc<Mutex<dyn Handler>> = Arc::new(Mutex::new(unit));
            bind_and_serve(port, handler)?;
        }
        Command::Global {
            port,
            core,
            cameras,
        } => {
            if let Some(core) = core {
                supervisor::pin_to_core(core);
            }
            let endpoints: Vec<CameraEndpoint> = serde_json::from_str(&cameras)?;
            let handler: Arc<Mutex<dyn Handler>> = Arc::new(Mutex::new(GlobalUnit::new(endpoints)));
            bind_and_serve(port, handler)?;
        }
    }
    Ok(())
}
