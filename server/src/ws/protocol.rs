//! JSON wire schemas for the chat WebSocket.
//!
//! Every frame is a JSON object discriminated by its `_tag` field.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chat::colors::{Color, Identity};

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "_tag")]
pub enum InboundMessage {
    /// First frame of every connection.
    #[serde(rename = "startup")]
    Startup { name: String, color: Color },
    /// A chat line, any time after the handshake.
    #[serde(rename = "message")]
    Chat { message: String },
}

/// Events fanned out to every subscribed connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all = "lowercase")]
pub enum OutboundEvent {
    Join {
        name: String,
        color: Color,
    },
    Leave {
        name: String,
        color: Color,
    },
    Message {
        name: String,
        color: Color,
        message: String,
        /// Epoch millis, stamped by the server when the line is relayed.
        timestamp: i64,
    },
}

impl OutboundEvent {
    pub fn join(identity: &Identity) -> Self {
        Self::Join {
            name: identity.name.clone(),
            color: identity.color,
        }
    }

    pub fn leave(identity: &Identity) -> Self {
        Self::Leave {
            name: identity.name.clone(),
            color: identity.color,
        }
    }

    pub fn message(identity: &Identity, message: String, timestamp: i64) -> Self {
        Self::Message {
            name: identity.name.clone(),
            color: identity.color,
            message,
            timestamp,
        }
    }
}

#[derive(Debug)]
pub enum DecodeError {
    /// Not valid JSON, or not any known schema.
    Json(serde_json::Error),
    /// Well-formed, but not the frame expected at this point.
    UnexpectedTag(&'static str),
    /// Startup frame with an empty name.
    EmptyName,
    /// A non-text data frame.
    NotText,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "Invalid frame: {}", e),
            Self::UnexpectedTag(expected) => write!(f, "Expected a {} frame", expected),
            Self::EmptyName => write!(f, "Startup name must not be empty"),
            Self::NotText => write!(f, "Expected a text frame"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Decode the handshake frame into the identity the client asks for.
pub fn decode_startup(text: &str) -> Result<Identity, DecodeError> {
    match serde_json::from_str::<InboundMessage>(text)? {
        InboundMessage::Startup { name, color } => {
            if name.trim().is_empty() {
                return Err(DecodeError::EmptyName);
            }
            Ok(Identity::new(name, color))
        }
        InboundMessage::Chat { .. } => Err(DecodeError::UnexpectedTag("startup")),
    }
}

/// Decode a post-handshake frame into its chat text.
pub fn decode_chat(text: &str) -> Result<String, DecodeError> {
    match serde_json::from_str::<InboundMessage>(text)? {
        InboundMessage::Chat { message } => Ok(message),
        InboundMessage::Startup { .. } => Err(DecodeError::UnexpectedTag("message")),
    }
}

pub fn encode_event(event: &OutboundEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_startup() {
        let identity = decode_startup(r#"{"_tag":"startup","name":"ada","color":"red"}"#).unwrap();
        assert_eq!(identity, Identity::new("ada", Color::Red));
    }

    #[test]
    fn test_decode_startup_ignores_extra_fields() {
        let identity =
            decode_startup(r#"{"_tag":"startup","name":"ada","color":"red","v":2}"#).unwrap();
        assert_eq!(identity.name, "ada");
    }

    #[test]
    fn test_decode_startup_rejects_bad_frames() {
        assert!(matches!(decode_startup("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode_startup(r#"{"_tag":"startup","name":"ada","color":"purple"}"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_startup(r#"{"_tag":"startup","color":"red"}"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_startup(r#"{"_tag":"message","message":"hi"}"#),
            Err(DecodeError::UnexpectedTag("startup"))
        ));
        assert!(matches!(
            decode_startup(r#"{"_tag":"startup","name":"  ","color":"red"}"#),
            Err(DecodeError::EmptyName)
        ));
    }

    #[test]
    fn test_decode_chat() {
        assert_eq!(decode_chat(r#"{"_tag":"message","message":"hi"}"#).unwrap(), "hi");
        assert!(matches!(
            decode_chat(r#"{"_tag":"startup","name":"ada","color":"red"}"#),
            Err(DecodeError::UnexpectedTag("message"))
        ));
        assert!(matches!(
            decode_chat(r#"{"_tag":"shout","message":"hi"}"#),
            Err(DecodeError::Json(_))
        ));
        assert!(decode_chat(r#"{"_tag":"message"}"#).is_err());
    }

    #[test]
    fn test_encode_outbound_shapes() {
        let ada = Identity::new("ada", Color::Red);

        let join: serde_json::Value =
            serde_json::from_str(&encode_event(&OutboundEvent::join(&ada)).unwrap()).unwrap();
        assert_eq!(join, json!({"_tag": "join", "name": "ada", "color": "red"}));

        let leave: serde_json::Value =
            serde_json::from_str(&encode_event(&OutboundEvent::leave(&ada)).unwrap()).unwrap();
        assert_eq!(leave, json!({"_tag": "leave", "name": "ada", "color": "red"}));

        let message = OutboundEvent::message(&ada, "hi".to_string(), 1_700_000_000_123);
        let message: serde_json::Value =
            serde_json::from_str(&encode_event(&message).unwrap()).unwrap();
        assert_eq!(
            message,
            json!({
                "_tag": "message",
                "name": "ada",
                "color": "red",
                "message": "hi",
                "timestamp": 1_700_000_000_123i64
            })
        );
    }
}
