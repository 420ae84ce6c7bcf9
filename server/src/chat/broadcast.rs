//! The chat event bus: one shared fan-out channel of `OutboundEvent`s.
//!
//! Each subscriber reads through its own bounded window. Publishing never
//! waits on subscribers; a subscriber that falls more than `capacity()` events
//! behind loses the oldest ones and keeps going from the oldest retained event.
//! The window is the requested size rounded up to a power of two.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::ws::protocol::OutboundEvent;

/// Default per-subscriber window.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OutboundEvent>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    /// `requested` is rounded up to the next power of two, which is the
    /// window tokio's broadcast channel actually keeps.
    pub fn new(requested: usize) -> Self {
        let capacity = requested.max(1).next_power_of_two();
        if capacity != requested {
            tracing::info!(
                requested = requested,
                capacity = capacity,
                "Bus capacity rounded up to a power of two"
            );
        }
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Events a subscriber may fall behind before it loses the oldest.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish to every current subscriber. Returns how many there were.
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: OutboundEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's view of the bus.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<OutboundEvent>,
    dropped: u64,
}

impl Subscription {
    /// Next event, skipping past any lag. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    tracing::warn!(
                        skipped = skipped,
                        dropped_total = self.dropped,
                        "Subscriber lagged, oldest events dropped"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Events this subscriber lost to backpressure so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Release the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

/// Log every event crossing the bus at debug level, for the life of the process.
pub fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut subscription = bus.subscribe();
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => tracing::debug!(event = %json, "Broadcasting"),
                Err(e) => tracing::debug!(error = %e, "Broadcasting unencodable event"),
            }
        }
    })
}
