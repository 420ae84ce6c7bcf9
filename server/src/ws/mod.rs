pub mod actor;
pub mod handler;
pub mod handshake;
pub mod protocol;
pub mod registry;

use tokio::sync::mpsc;

pub use registry::{ConnectionRecord, ConnectionRegistry};

/// Type alias for the sender half of a WebSocket connection's direct queue.
/// Carries close frames straight to that connection's writer.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
