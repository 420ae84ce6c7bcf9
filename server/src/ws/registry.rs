//! Connection registry: name -> record for every admitted WebSocket connection.
//!
//! All mutation goes through `try_insert` and `remove`. Name and color
//! uniqueness are checked under one write lock, so two handshakes racing for
//! the same name (or the same color) can never both be admitted.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::chat::colors::{Color, Identity};
use super::ConnectionSender;

/// State of one admitted connection. Immutable after creation.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub id: Uuid,
    pub identity: Identity,
    pub connected_at: DateTime<Utc>,
    sender: ConnectionSender,
}

impl ConnectionRecord {
    pub fn new(identity: Identity, sender: ConnectionSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            connected_at: Utc::now(),
            sender,
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn color(&self) -> Color {
        self.identity.color
    }

    /// Milliseconds since the handshake completed.
    pub fn age_millis(&self) -> i64 {
        (Utc::now() - self.connected_at).num_milliseconds().max(0)
    }

    /// Queue a frame on this connection's direct outbound queue.
    /// Returns false once the connection's delivery loop is gone.
    pub fn send(&self, msg: Message) -> bool {
        self.sender.send(msg).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    NameTaken(String),
    ColorTaken(Color),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameTaken(name) => write!(f, "Name already taken: {}", name),
            Self::ColorTaken(color) => write!(f, "Color already taken: {}", color),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Shared handle to the registry. Cloning is cheap.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<ConnectionRecord>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Records are immutable and inserted whole, so a poisoned lock never
    // guards a half-written map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ConnectionRecord>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ConnectionRecord>>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `record` iff its name is absent and its color is unheld.
    /// On collision nothing is mutated.
    pub fn try_insert(
        &self,
        record: ConnectionRecord,
    ) -> Result<Arc<ConnectionRecord>, RegistryError> {
        let mut map = self.write();

        if map.contains_key(record.name()) {
            return Err(RegistryError::NameTaken(record.identity.name));
        }
        if map.values().any(|existing| existing.color() == record.color()) {
            return Err(RegistryError::ColorTaken(record.color()));
        }

        let record = Arc::new(record);
        map.insert(record.identity.name.clone(), record.clone());
        drop(map);

        tracing::debug!(
            name = %record.identity.name,
            color = %record.identity.color,
            connection_id = %record.id,
            "Connection registered"
        );
        Ok(record)
    }

    /// Remove `name` if it still belongs to connection `id`.
    /// Removing an absent name is a no-op.
    pub fn remove(&self, name: &str, id: Uuid) -> Option<Arc<ConnectionRecord>> {
        let mut map = self.write();
        let owned = map.get(name).is_some_and(|record| record.id == id);
        let removed = if owned { map.remove(name) } else { None };
        drop(map);

        if removed.is_some() {
            tracing::debug!(name = %name, connection_id = %id, "Connection unregistered");
        }
        removed
    }

    /// Point-in-time copy of every record.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionRecord>> {
        self.read().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ConnectionRecord>> {
        self.read().get(name).cloned()
    }

    pub fn held_colors(&self) -> HashSet<Color> {
        self.read().values().map(|record| record.color()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
