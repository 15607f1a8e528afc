//! Connection registry.
//!
//! Keyed by (user, session). Only the Hub loop touches it.

// Rust guideline compliant 2026-02

use std::collections::HashMap;

use crate::connection::{Connection, ConnectionKey};
use crate::store::UserId;

/// All registered connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionKey, Connection>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `connection`.
    ///
    /// Returns the previous connection for the same key, if it was a
    /// different one. The caller is responsible for closing it.
    pub fn register(&mut self, connection: Connection) -> Option<Connection> {
        let id = connection.id();
        self.connections
            .insert(connection.key().clone(), connection)
            .filter(|previous| previous.id() != id)
    }

    /// Remove `connection` if its slot still holds it.
    ///
    /// A stale connection whose slot now belongs to a replacement is left
    /// alone. Returns whether anything was removed.
    pub fn unregister(&mut self, connection: &Connection) -> bool {
        let holds_this = self
            .connections
            .get(connection.key())
            .is_some_and(|current| current.id() == connection.id());
        if holds_this {
            self.connections.remove(connection.key());
        }
        holds_this
    }

    /// Remove a connection by key.
    pub fn remove(&mut self, key: &ConnectionKey) -> Option<Connection> {
        self.connections.remove(key)
    }

    /// Connections of one user.
    pub fn for_user(&self, user_id: UserId) -> impl Iterator<Item = &Connection> {
        self.connections
            .values()
            .filter(move |c| c.user_id() == user_id)
    }

    /// Every connection.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Remove and return every connection.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.connections.drain().map(|(_, c)| c).collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
