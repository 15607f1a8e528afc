//! Hub handle for task-safe hub communication.
//!
//! `HubHandle` wraps the Hub command channel with a typed async API. It is
//! `Clone + Send + Sync`; the server, every connection's teardown guard and
//! the pipeline each hold a clone.
//!
//! Every method fails with [`HubError::Closed`] once the Hub loop has
//! stopped, which callers treat as "the process is shutting down".

// Rust guideline compliant 2026-02

use tokio::sync::{mpsc, oneshot};

use super::commands::HubCommand;
use crate::connection::Connection;
use crate::store::UserId;

/// The Hub loop is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The command channel or the response channel is closed.
    Closed,
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "hub is shut down"),
        }
    }
}

impl std::error::Error for HubError {}

/// Handle for queuing commands to the Hub loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub(super) fn new(tx: mpsc::Sender<HubCommand>) -> Self {
        Self { tx }
    }

    /// Register a connection. Resolves once the registry has been updated;
    /// a stale connection with the same identity has been closed by then.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn register(&self, connection: Connection) -> Result<(), HubError> {
        let (cmd, rx) = HubCommand::register(connection);
        self.request(cmd, rx).await
    }

    /// Unregister a connection. Safe to call more than once.
    pub async fn unregister(&self, connection: Connection) -> Result<(), HubError> {
        let (cmd, rx) = HubCommand::unregister(connection);
        self.request(cmd, rx).await
    }

    /// Offer `payload` to every connection of `user_id`.
    ///
    /// Returns how many connections accepted it; full queues are evicted.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn send_to_user(&self, user_id: UserId, payload: String) -> Result<usize, HubError> {
        let (cmd, rx) = HubCommand::send_to_user(user_id, payload);
        self.request(cmd, rx).await
    }

    /// Offer `payload` to every connection.
    pub async fn broadcast(&self, payload: String) -> Result<usize, HubError> {
        let (cmd, rx) = HubCommand::broadcast(payload);
        self.request(cmd, rx).await
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> Result<usize, HubError> {
        let (cmd, rx) = HubCommand::count();
        self.request(cmd, rx).await
    }

    /// Ask the loop to close every connection and stop.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.tx
            .send(HubCommand::Shutdown)
            .await
            .map_err(|_closed| HubError::Closed)
    }

    async fn request<T>(&self, cmd: HubCommand, rx: oneshot::Receiver<T>) -> Result<T, HubError> {
        self.tx.send(cmd).await.map_err(|_closed| HubError::Closed)?;
        rx.await.map_err(|_closed| HubError::Closed)
    }
}
