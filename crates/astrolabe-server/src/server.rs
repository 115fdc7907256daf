//! The websocket RPC endpoint.
//!
//! One listener per process, one OS thread per accepted connection, each
//! message processed to completion before the next is read. The handler
//! sits behind a mutex so a process state change is never observed
//! half-applied by another connection.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, info, warn};
use serde_json::{json, Map, Value};
use tungstenite::{accept, Message};

use crate::command::parse_envelope;
use crate::error::RpcError;

/// A command registry: camera unit or global aggregator.
pub trait Handler: Send {
    fn handle(&mut self, function: &str, args: &Map<String, Value>) -> Result<Value, RpcError>;
}

/// Bind all interfaces on `port` and serve until the listener fails.
pub fn bind_and_serve(port: u16, handler: Arc<Mutex<dyn Handler>>) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!("listening on port {port}");
    serve(listener, handler)
}

pub fn serve(listener: TcpListener, handler: Arc<Mutex<dyn Handler>>) -> io::Result<()> {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let handler = Arc::clone(&handler);
                thread::spawn(move || connection(stream, handler));
            }
            Err(err) => warn!("accept failed: {err}"),
        }
    }
    Ok(())
}

/// Serve one client until it closes or the transport errors out. Command
/// failures are answered, never disconnected.
fn connection(stream: TcpStream, handler: Arc<Mutex<dyn Handler>>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let mut ws = match accept(stream) {
        Ok(ws) => ws,
        Err(err) => {
            warn!("handshake with {peer} failed: {err}");
            return;
        }
    };
    info!("client {peer} connected");

    loop {
        let message = match ws.read() {
            Ok(message) => message,
            Err(err) => {
                info!("client {peer} gone: {err}");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                // Liveness probe, answered without dispatch.
                if text.trim() == "ping" {
                    if ws.send(Message::Text("pong".into())).is_err() {
                        break;
                    }
                    continue;
                }

                let (reply, fatal) = dispatch(&handler, &text);
                let send_failed = ws.send(Message::Text(reply)).is_err();
                if fatal {
                    error!("fatal handler error, terminating process");
                    std::process::exit(1);
                }
                if send_failed {
                    break;
                }
            }
            Message::Ping(payload) => {
                if ws.send(Message::Pong(payload)).is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

fn dispatch(handler: &Mutex<dyn Handler>, text: &str) -> (String, bool) {
    let result = parse_envelope(text).and_then(|envelope| {
        let mut guard = match handler.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.handle(&envelope.function, &envelope.args)
    });

    match result {
        Ok(value) => (value.to_string(), false),
        Err(err) => {
            let fatal = matches!(err, RpcError::Fatal(_));
            (json!({ "error": err.to_string() }).to_string(), fatal)
        }
    }
}
