use std::time::Duration;

use crate::chat::broadcast::{EventBus, DEFAULT_BUS_CAPACITY};
use crate::ws::ConnectionRegistry;

/// Default time a client has to send its startup frame.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Admitted WebSocket connections by name
    pub registry: ConnectionRegistry,
    /// Fan-out bus for join/leave/message events
    pub bus: EventBus,
    /// How long a new connection may take to send its startup frame
    pub handshake_timeout: Duration,
}

impl AppState {
    pub fn new(bus_capacity: usize, handshake_timeout: Duration) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            bus: EventBus::new(bus_capacity),
            handshake_timeout,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT)
    }
}
