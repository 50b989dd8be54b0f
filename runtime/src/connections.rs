//! Connection plumbing interfaces
//!
//! The runtime never owns socket I/O or the persistent connection ↔ user
//! mapping; both are host collaborators behind these traits. The in-memory
//! implementations back local mode and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::HandlerError;
use crate::module::Payload;

/// Result of removing a connection from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unbound {
    pub user_id: Option<String>,
    /// True when this was the user's last live connection
    pub went_offline: bool,
}

/// Persistent connection ↔ user mapping (interface only; the store itself
/// is the host's)
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Record `connection_id → user_id`; returns true when this is the
    /// user's first live connection
    async fn bind(&self, connection_id: &str, user_id: &str) -> Result<bool, HandlerError>;

    /// Remove the connection, reporting whether its user went offline
    async fn unbind(&self, connection_id: &str) -> Result<Unbound, HandlerError>;

    /// User id bound to a connection, if any
    async fn resolve_user(&self, connection_id: &str) -> Result<Option<String>, HandlerError>;

    /// All live connection ids for the given users
    async fn connections_for(&self, user_ids: &[String]) -> Result<Vec<String>, HandlerError>;
}

/// Outbound socket frame delivery (the host owns the wire)
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn send(&self, connection_id: &str, data: Payload) -> Result<(), HandlerError>;

    async fn close(&self, connection_id: &str) -> Result<(), HandlerError>;
}

/// In-memory connection store for local mode and tests
#[derive(Debug, Default)]
pub struct MemoryConnectionStore {
    connections: RwLock<HashMap<String, String>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn user_connection_count(&self, user_id: &str) -> usize {
        self.connections
            .read()
            .values()
            .filter(|bound| bound.as_str() == user_id)
            .count()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn bind(&self, connection_id: &str, user_id: &str) -> Result<bool, HandlerError> {
        let mut connections = self.connections.write();
        let first = !connections.values().any(|bound| bound == user_id);
        connections.insert(connection_id.to_string(), user_id.to_string());
        Ok(first)
    }

    async fn unbind(&self, connection_id: &str) -> Result<Unbound, HandlerError> {
        let user_id = self.connections.write().remove(connection_id);
        let went_offline = match &user_id {
            Some(user_id) => self.user_connection_count(user_id) == 0,
            None => false,
        };
        Ok(Unbound {
            user_id,
            went_offline,
        })
    }

    async fn resolve_user(&self, connection_id: &str) -> Result<Option<String>, HandlerError> {
        Ok(self.connections.read().get(connection_id).cloned())
    }

    async fn connections_for(&self, user_ids: &[String]) -> Result<Vec<String>, HandlerError> {
        let connections = self.connections.read();
        let mut ids: Vec<String> = connections
            .iter()
            .filter(|(_, user)| user_ids.contains(user))
            .map(|(connection, _)| connection.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// In-memory transport recording outbound frames, for local mode and tests
#[derive(Debug, Default)]
pub struct MemorySocketTransport {
    sent: RwLock<Vec<(String, Payload)>>,
    closed: RwLock<Vec<String>>,
}

impl MemorySocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent so far, as (connection id, payload) pairs
    pub fn sent(&self) -> Vec<(String, Payload)> {
        self.sent.read().clone()
    }

    /// Connections closed so far
    pub fn closed(&self) -> Vec<String> {
        self.closed.read().clone()
    }
}

#[async_trait]
impl SocketTransport for MemorySocketTransport {
    async fn send(&self, connection_id: &str, data: Payload) -> Result<(), HandlerError> {
        self.sent.write().push((connection_id.to_string(), data));
        Ok(())
    }

    async fn close(&self, connection_id: &str) -> Result<(), HandlerError> {
        self.closed.write().push(connection_id.to_string());
        Ok(())
    }
}
