use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::chat::colors::{self, Color, Identity};
use crate::state::AppState;
use crate::ws::protocol::{self, DecodeError};
use crate::ws::registry::{ConnectionRecord, RegistryError};

/// WebSocket close codes sent to rejected clients:
/// 4000 = malformed startup frame
/// 4001 = name already taken
/// 4002 = color already taken
/// 4008 = no startup frame in time
pub const CLOSE_BAD_STARTUP: u16 = 4000;
pub const CLOSE_NAME_TAKEN: u16 = 4001;
pub const CLOSE_COLOR_TAKEN: u16 = 4002;
pub const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4008;

#[derive(Debug)]
pub enum HandshakeError {
    Malformed(DecodeError),
    NameTaken(String),
    ColorTaken(Color),
    TimedOut(Duration),
    /// Peer went away before sending a startup frame.
    Disconnected,
    Transport(axum::Error),
}

impl HandshakeError {
    /// Close frame owed to the client, if it is still there to receive one.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            Self::Malformed(_) => (CLOSE_BAD_STARTUP, "Bad startup message"),
            Self::NameTaken(_) => (CLOSE_NAME_TAKEN, "Name already taken"),
            Self::ColorTaken(_) => (CLOSE_COLOR_TAKEN, "Color already taken"),
            Self::TimedOut(_) => (CLOSE_HANDSHAKE_TIMEOUT, "Handshake timed out"),
            Self::Disconnected | Self::Transport(_) => return None,
        };
        Some(CloseFrame {
            code,
            reason: reason.into(),
        })
    }
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "Bad startup message: {}", e),
            Self::NameTaken(name) => write!(f, "Name already taken: {}", name),
            Self::ColorTaken(color) => write!(f, "Color already taken: {}", color),
            Self::TimedOut(after) => write!(f, "No startup frame within {:?}", after),
            Self::Disconnected => write!(f, "Peer disconnected during handshake"),
            Self::Transport(e) => write!(f, "Transport error during handshake: {}", e),
        }
    }
}

impl std::error::Error for HandshakeError {}

impl From<DecodeError> for HandshakeError {
    fn from(e: DecodeError) -> Self {
        Self::Malformed(e)
    }
}

impl From<RegistryError> for HandshakeError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NameTaken(name) => Self::NameTaken(name),
            RegistryError::ColorTaken(color) => Self::ColorTaken(color),
        }
    }
}

/// A connection that passed the handshake and now owns a registry entry.
pub struct Admission {
    pub record: Arc<ConnectionRecord>,
    /// Receiving end of the record's direct outbound queue.
    pub direct_rx: mpsc::UnboundedReceiver<Message>,
}

/// Read the startup frame and admit the connection into the registry.
///
/// On any error the registry is untouched.
pub async fn perform(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
) -> Result<Admission, HandshakeError> {
    let text = timeout(state.handshake_timeout, next_data_frame(ws_receiver))
        .await
        .map_err(|_| HandshakeError::TimedOut(state.handshake_timeout))??;

    let identity = protocol::decode_startup(&text)?;
    admit(identity, state)
}

/// Admit `identity` if its name and color are still free.
pub fn admit(identity: Identity, state: &AppState) -> Result<Admission, HandshakeError> {
    // Name before color, matching try_insert. Both are re-checked under the
    // registry lock.
    if state.registry.get(&identity.name).is_some() {
        return Err(HandshakeError::NameTaken(identity.name));
    }
    if !colors::is_available(&state.registry, identity.color) {
        return Err(HandshakeError::ColorTaken(identity.color));
    }

    let (tx, direct_rx) = mpsc::unbounded_channel();
    let record = state.registry.try_insert(ConnectionRecord::new(identity, tx))?;
    Ok(Admission { record, direct_rx })
}

/// Wait for the first data frame, skipping control frames.
async fn next_data_frame(
    ws_receiver: &mut SplitStream<WebSocket>,
) -> Result<String, HandshakeError> {
    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
            Some(Ok(Message::Binary(_))) => {
                return Err(HandshakeError::Malformed(DecodeError::NotText))
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Err(HandshakeError::Disconnected),
            Some(Err(e)) => return Err(HandshakeError::Transport(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_then_reject_duplicates() {
        let state = AppState::default();

        let ada = admit(Identity::new("ada", Color::Red), &state).unwrap();
        assert_eq!(ada.record.name(), "ada");
        assert_eq!(state.registry.len(), 1);

        let dup_name = admit(Identity::new("ada", Color::Blue), &state);
        assert!(matches!(dup_name, Err(HandshakeError::NameTaken(ref n)) if n == "ada"));

        let dup_color = admit(Identity::new("grace", Color::Red), &state);
        assert!(matches!(dup_color, Err(HandshakeError::ColorTaken(Color::Red))));

        assert_eq!(state.registry.len(), 1);
        assert_eq!(state.bus.subscriber_count(), 0);
    }

    #[test]
    fn test_taken_name_reported_before_taken_color() {
        let state = AppState::default();
        let _ada = admit(Identity::new("ada", Color::Red), &state).unwrap();

        let both_taken = admit(Identity::new("ada", Color::Red), &state);
        assert!(matches!(both_taken, Err(HandshakeError::NameTaken(ref n)) if n == "ada"));
        assert_eq!(
            both_taken.err().and_then(|e| e.close_frame()).map(|f| f.code),
            Some(CLOSE_NAME_TAKEN)
        );
        assert_eq!(state.registry.len(), 1);
    }

    #[test]
    fn test_close_frames_per_rejection() {
        let code = |e: HandshakeError| e.close_frame().map(|f| f.code);

        assert_eq!(
            code(HandshakeError::Malformed(DecodeError::NotText)),
            Some(CLOSE_BAD_STARTUP)
        );
        assert_eq!(code(HandshakeError::NameTaken("ada".into())), Some(CLOSE_NAME_TAKEN));
        assert_eq!(code(HandshakeError::ColorTaken(Color::Red)), Some(CLOSE_COLOR_TAKEN));
        assert_eq!(
            code(HandshakeError::TimedOut(Duration::from_secs(1))),
            Some(CLOSE_HANDSHAKE_TIMEOUT)
        );
        assert_eq!(code(HandshakeError::Disconnected), None);
    }
}
