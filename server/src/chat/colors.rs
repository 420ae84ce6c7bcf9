//! The fixed color universe and the identity pool derived from it.
//!
//! A color is "held" while a registered connection carries it. Availability is
//! never stored separately; it is always computed from a fresh registry snapshot.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::AppState;
use crate::ws::ConnectionRegistry;

/// One of the seven colors a chat participant can pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl Color {
    /// The full universe, in the order clients display it.
    pub const ALL: [Color; 7] = [
        Color::Red,
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Magenta,
        Color::Cyan,
        Color::White,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Blue => "blue",
            Self::Magenta => "magenta",
            Self::Cyan => "cyan",
            Self::White => "white",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name and color of a registered participant. Immutable once admitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub name: String,
    pub color: Color,
}

impl Identity {
    pub fn new(name: impl Into<String>, color: Color) -> Self {
        Self {
            name: name.into(),
            color,
        }
    }
}

/// Colors not held by any registered connection, in universe order.
pub fn available_colors(registry: &ConnectionRegistry) -> Vec<Color> {
    let held = registry.held_colors();
    Color::ALL
        .into_iter()
        .filter(|color| !held.contains(color))
        .collect()
}

/// Whether `color` is currently free. Reads a fresh snapshot.
pub fn is_available(registry: &ConnectionRegistry, color: Color) -> bool {
    !registry.held_colors().contains(&color)
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AvailableColorsResponse {
    #[serde(rename = "_tag")]
    pub tag: String,
    pub colors: Vec<Color>,
}

/// GET /colors — colors a new client may still pick.
pub async fn get_available_colors(State(state): State<AppState>) -> Json<AvailableColorsResponse> {
    Json(AvailableColorsResponse {
        tag: "availableColors".to_string(),
        colors: available_colors(&state.registry),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::registry::ConnectionRecord;
    use tokio::sync::mpsc;

    fn admit(registry: &ConnectionRegistry, name: &str, color: Color) {
        let (tx, _rx) = mpsc::unbounded_channel();
        registry
            .try_insert(ConnectionRecord::new(Identity::new(name, color), tx))
            .unwrap();
    }

    #[test]
    fn test_all_colors_available_when_empty() {
        let registry = ConnectionRegistry::new();
        assert_eq!(available_colors(&registry), Color::ALL.to_vec());
    }

    #[test]
    fn test_held_colors_are_excluded() {
        let registry = ConnectionRegistry::new();
        admit(&registry, "ada", Color::Red);
        admit(&registry, "grace", Color::Blue);

        let available = available_colors(&registry);
        assert!(!available.contains(&Color::Red));
        assert!(!available.contains(&Color::Blue));
        assert_eq!(available.len(), Color::ALL.len() - 2);
        assert!(!is_available(&registry, Color::Red));
        assert!(is_available(&registry, Color::Cyan));
    }

    #[test]
    fn test_pool_exhausted() {
        let registry = ConnectionRegistry::new();
        for (i, color) in Color::ALL.into_iter().enumerate() {
            admit(&registry, &format!("user{}", i), color);
        }
        assert!(available_colors(&registry).is_empty());
    }

    #[test]
    fn test_color_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Color::Magenta).unwrap(), "\"magenta\"");
        let color: Color = serde_json::from_str("\"cyan\"").unwrap();
        assert_eq!(color, Color::Cyan);
        assert!(serde_json::from_str::<Color>("\"purple\"").is_err());
        assert_eq!(Color::White.to_string(), "white");
    }
}
