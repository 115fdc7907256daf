//! Camera RPC server, process supervisor and global aggregator.
//!
//! One process per physical camera answers websocket commands on its own
//! port; a supervisor discovers cameras, spawns and pins the processes and
//! restarts them with backoff; a global process aggregates host telemetry
//! and the camera endpoint map.

pub mod camera;
pub mod command;
pub mod error;
pub mod global;
pub mod identity;
pub mod recorder;
pub mod server;
pub mod store;
pub mod supervisor;
pub mod unit;

pub use error::RpcError;
pub use global::{CameraEndpoint, GlobalUnit};
pub use identity::CameraIdentity;
pub use server::{bind_and_serve, serve, Handler};
pub use store::ProfileStore;
pub use supervisor::SupervisorConfig;
pub use unit::CameraUnit;
