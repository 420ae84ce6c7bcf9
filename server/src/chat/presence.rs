//! Presence reporting.
//!
//! Read-only views of the connection registry: a periodic log line for
//! operators and a JSON endpoint. Neither ever mutates the registry.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::chat::colors::Color;
use crate::state::AppState;
use crate::ws::ConnectionRegistry;

/// Default reporting period.
pub const DEFAULT_PRESENCE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub name: String,
    pub color: Color,
    pub connected_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceReport {
    pub count: usize,
    pub connections: Vec<PresenceEntry>,
}

/// Build a report from a fresh registry snapshot, sorted by name.
pub fn presence_report(registry: &ConnectionRegistry) -> PresenceReport {
    let mut connections: Vec<PresenceEntry> = registry
        .snapshot()
        .iter()
        .map(|record| PresenceEntry {
            name: record.identity.name.clone(),
            color: record.identity.color,
            connected_ms: record.age_millis(),
        })
        .collect();
    connections.sort_by(|a, b| a.name.cmp(&b.name));

    PresenceReport {
        count: connections.len(),
        connections,
    }
}

/// Log the registry contents every `period` until the runtime shuts down.
pub fn spawn_presence_reporter(registry: ConnectionRegistry, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = presence_report(&registry);
            tracing::debug!(count = report.count, "Current connections");
            for entry in &report.connections {
                tracing::debug!(
                    name = %entry.name,
                    color = %entry.color,
                    "{} connected for {}ms",
                    entry.name,
                    entry.connected_ms
                );
            }
        }
    })
}

/// GET /presence — who is connected right now.
pub async fn get_presence(State(state): State<AppState>) -> Json<PresenceReport> {
    Json(presence_report(&state.registry))
}
