use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::timeout;

use crate::chat::broadcast::{EventBus, Subscription};
use crate::chat::colors::Identity;
use crate::state::AppState;
use crate::ws::handshake::{self, Admission, HandshakeError};
use crate::ws::protocol::{self, DecodeError, OutboundEvent};
use crate::ws::registry::{ConnectionRecord, ConnectionRegistry};

/// How long the delivery loop gets to flush a close frame after the peer's
/// side of the connection has ended.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Run one WebSocket connection from handshake to teardown.
///
/// After the handshake the socket is split between two tasks:
/// - Relay task: reads client frames, publishes chat lines to the bus
/// - Delivery task: owns the sink, writes bus events and direct-queue frames
///
/// The connection lives as long as the shorter-lived of the two. Whichever
/// ends first, the other is cancelled and the session is torn down.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();

    let Admission { record, direct_rx } =
        match handshake::perform(&mut ws_receiver, &state).await {
            Ok(admission) => admission,
            Err(err) => {
                reject(ws_sender, err).await;
                return;
            }
        };

    // From here on, dropping `session` (normally or by cancellation) runs teardown.
    let mut session = Session::new(record.clone(), state.registry.clone(), state.bus.clone());
    let identity = record.identity.clone();

    tracing::info!(
        name = %identity.name,
        color = %identity.color,
        connection_id = %record.id,
        "WebSocket actor started"
    );

    let subscription = state.bus.subscribe();
    let mut delivery = tokio::spawn(delivery_task(ws_sender, subscription, direct_rx));
    session.track(delivery.abort_handle());

    // Published before the relay starts so a client's own lines always follow its join.
    state.bus.publish(OutboundEvent::join(&identity));

    let mut relay = tokio::spawn(relay_task(ws_receiver, identity.clone(), state.bus.clone()));
    session.track(relay.abort_handle());

    tokio::select! {
        exit = &mut relay => {
            tracing::debug!(name = %identity.name, exit = ?exit, "Relay task finished");
            record.send(Message::Close(None));
            if timeout(CLOSE_GRACE, &mut delivery).await.is_err() {
                tracing::debug!(name = %identity.name, "Delivery task did not flush close in time");
            }
        }
        exit = &mut delivery => {
            tracing::debug!(name = %identity.name, exit = ?exit, "Delivery task finished");
        }
    }

    session.teardown();
}

/// Send the rejected client its close frame, then drop the socket.
async fn reject(mut ws_sender: SplitSink<WebSocket, Message>, err: HandshakeError) {
    match err.close_frame() {
        Some(frame) => {
            tracing::warn!(error = %err, close_code = frame.code, "Handshake rejected");
            let _ = ws_sender.send(Message::Close(Some(frame))).await;
        }
        None => {
            tracing::debug!(error = %err, "Handshake abandoned");
        }
    }
}

#[derive(Debug)]
enum RelayExit {
    ClientClosed,
    StreamEnded,
    /// Read failed; the error is logged where it happens.
    Transport,
}

/// Relay task: turns client chat frames into bus messages.
/// Undecodable frames are logged and skipped; the connection stays open.
async fn relay_task(
    mut ws_receiver: SplitStream<WebSocket>,
    identity: Identity,
    bus: EventBus,
) -> RelayExit {
    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match protocol::decode_chat(text.as_str()) {
                Ok(message) => {
                    let timestamp = Utc::now().timestamp_millis();
                    bus.publish(OutboundEvent::message(&identity, message, timestamp));
                }
                Err(e) => {
                    tracing::warn!(
                        name = %identity.name,
                        error = %e,
                        "Skipping undecodable frame: {}",
                        text.as_str().chars().take(100).collect::<String>()
                    );
                }
            },
            Ok(Message::Binary(data)) => {
                tracing::warn!(
                    name = %identity.name,
                    error = %DecodeError::NotText,
                    bytes = data.len(),
                    "Skipping binary frame"
                );
            }
            // tungstenite answers pings on its own
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(frame)) => {
                tracing::info!(name = %identity.name, reason = ?frame, "Client initiated close");
                return RelayExit::ClientClosed;
            }
            Err(e) => {
                tracing::warn!(name = %identity.name, error = %e, "WebSocket receive error");
                return RelayExit::Transport;
            }
        }
    }
    RelayExit::StreamEnded
}

#[derive(Debug)]
enum DeliveryExit {
    Closed,
    /// Write failed; the error is logged where it happens.
    WriteFailed,
    BusClosed,
    QueueClosed,
}

/// Delivery task: the only writer on the socket.
/// Direct-queue frames (close) take priority over bus events.
async fn delivery_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut subscription: Subscription,
    mut direct_rx: mpsc::UnboundedReceiver<Message>,
) -> DeliveryExit {
    let exit = loop {
        let next = tokio::select! {
            biased;
            direct = direct_rx.recv() => match direct {
                Some(msg) => Some(msg),
                None => break DeliveryExit::QueueClosed,
            },
            event = subscription.recv() => match event {
                Some(event) => encode(&event),
                None => break DeliveryExit::BusClosed,
            },
        };
        let Some(msg) = next else {
            continue;
        };

        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = ws_sender.send(msg).await {
            tracing::debug!(error = %e, "WebSocket send error");
            break DeliveryExit::WriteFailed;
        }
        if closing {
            break DeliveryExit::Closed;
        }
    };

    if subscription.dropped() > 0 {
        tracing::info!(dropped = subscription.dropped(), "Slow connection missed events");
    }
    subscription.unsubscribe();
    exit
}

fn encode(event: &OutboundEvent) -> Option<Message> {
    match protocol::encode_event(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode outbound event");
            None
        }
    }
}

/// Teardown guard for an admitted connection.
///
/// `teardown` publishes the leave event, cancels the connection's tasks and
/// removes its registry entry. It runs at most once, and runs from `Drop`
/// if nobody called it, so cancellation of the owning task still cleans up.
/// Every step is synchronous.
pub struct Session {
    record: Arc<ConnectionRecord>,
    registry: ConnectionRegistry,
    bus: EventBus,
    tasks: Vec<AbortHandle>,
    torn_down: bool,
}

impl Session {
    pub fn new(record: Arc<ConnectionRecord>, registry: ConnectionRegistry, bus: EventBus) -> Self {
        Self {
            record,
            registry,
            bus,
            tasks: Vec::with_capacity(2),
            torn_down: false,
        }
    }

    /// Cancel `task` on teardown.
    pub fn track(&mut self, task: AbortHandle) {
        self.tasks.push(task);
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let identity = &self.record.identity;
        let notified = self.bus.publish(OutboundEvent::leave(identity));

        // Aborting the delivery task drops its subscription and sink.
        for task in self.tasks.drain(..) {
            task.abort();
        }

        self.registry.remove(&identity.name, self.record.id);

        tracing::info!(
            name = %identity.name,
            color = %identity.color,
            connection_id = %self.record.id,
            connected_ms = self.record.age_millis(),
            notified = notified,
            "WebSocket actor stopped"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::colors::Color;

    fn admitted(state: &AppState, name: &str, color: Color) -> Session {
        let admission = handshake::admit(Identity::new(name, color), state).unwrap();
        Session::new(admission.record, state.registry.clone(), state.bus.clone())
    }

    async fn no_more_events(sub: &mut Subscription) -> bool {
        timeout(Duration::from_millis(50), sub.recv()).await.is_err()
    }

    #[tokio::test]
    async fn test_teardown_twice_matches_once() {
        let state = AppState::default();
        let mut observer = state.bus.subscribe();
        let mut session = admitted(&state, "ada", Color::Red);

        session.teardown();
        session.teardown();
        assert!(session.is_torn_down());
        drop(session);

        assert_eq!(
            observer.recv().await,
            Some(OutboundEvent::leave(&Identity::new("ada", Color::Red)))
        );
        assert!(no_more_events(&mut observer).await);
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_drop_alone_tears_down() {
        let state = AppState::default();
        let mut observer = state.bus.subscribe();
        let session = admitted(&state, "grace", Color::Blue);
        assert_eq!(state.registry.len(), 1);

        drop(session);

        assert_eq!(
            observer.recv().await,
            Some(OutboundEvent::leave(&Identity::new("grace", Color::Blue)))
        );
        assert!(state.registry.get("grace").is_none());
    }

    #[tokio::test]
    async fn test_teardown_cancels_tracked_tasks() {
        let state = AppState::default();
        let mut session = admitted(&state, "ada", Color::Red);

        let task = tokio::spawn(std::future::pending::<()>());
        session.track(task.abort_handle());
        session.teardown();

        let joined = task.await;
        assert!(joined.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_late_teardown_leaves_reused_name_alone() {
        let state = AppState::default();
        let mut first = admitted(&state, "ada", Color::Red);
        let first_id = state.registry.get("ada").unwrap().id;
        first.teardown();

        let second = admitted(&state, "ada", Color::Green);
        first.teardown();
        drop(first);

        let current = state.registry.get("ada").unwrap();
        assert_ne!(current.id, first_id);
        assert_eq!(current.color(), Color::Green);
        drop(second);
        assert!(state.registry.is_empty());
    }
}
