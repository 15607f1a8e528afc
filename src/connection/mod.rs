//! Live client connections.
//!
//! A [`Connection`] is the hub-facing handle of one WebSocket session: its
//! identity, the sending side of its bounded outbound queue, and a
//! close-once signal. It is cheap to clone; the registry, the pumps and the
//! responder worker each hold a clone.
//!
//! # Lifecycle
//!
//! ```text
//! Connection::new ──► hub.register ──► pumps run ──► first pump exits
//!                                                       │
//!                                Teardown::finish (once)│
//!                                                       ▼
//!                     hub.unregister ──► Connection::close ──► outbound
//!                                                              drains, sends
//!                                                              close frame
//! ```
//!
//! The registry owns the registration; nothing else removes it. Pumps only
//! ever *request* removal through the hub.

// Rust guideline compliant 2026-02

pub mod frame;
pub mod pumps;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::hub::HubHandle;
use crate::store::UserId;

/// Receiving side of a connection's outbound queue (owned by the outbound pump).
pub type OutboundReceiver = mpsc::Receiver<String>;

/// Process-unique connection id.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn generate_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Registry key. At most one live connection exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    /// Authenticated user.
    pub user_id: UserId,
    /// Client session.
    pub session_id: String,
}

impl ConnectionKey {
    /// Build a key.
    pub fn new(user_id: UserId, session_id: impl Into<String>) -> Self {
        Self {
            user_id,
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user={} session={}", self.user_id, self.session_id)
    }
}

/// Why a payload was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferError {
    /// The outbound queue is at capacity.
    Full,
    /// The connection has been closed.
    Closed,
}

impl std::fmt::Display for OfferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "outbound queue full"),
            Self::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for OfferError {}

/// Handle to one live session.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    key: ConnectionKey,
    outbound: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection with an outbound queue of `capacity` payloads.
    pub fn new(key: ConnectionKey, capacity: usize) -> (Self, OutboundReceiver) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: generate_connection_id(),
            key,
            outbound,
            closed: CancellationToken::new(),
        };
        (connection, rx)
    }

    /// Process-unique id, distinguishes a stale registration from its replacement.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Registry key.
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Owning user.
    pub fn user_id(&self) -> UserId {
        self.key.user_id
    }

    /// Non-blocking enqueue.
    ///
    /// # Errors
    ///
    /// Returns [`OfferError::Full`] when the queue is at capacity and
    /// [`OfferError::Closed`] once the connection is closed.
    pub fn offer(&self, payload: String) -> Result<(), OfferError> {
        if self.closed.is_cancelled() {
            return Err(OfferError::Closed);
        }
        self.outbound.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OfferError::Full,
            mpsc::error::TrySendError::Closed(_) => OfferError::Closed,
        })
    }

    /// Close the outbound queue. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

/// Close-once guard shared by the two pumps of a connection.
///
/// Whichever pump calls [`finish`](Self::finish) first stops its sibling and
/// sends the single `unregister`.
#[derive(Debug)]
pub struct Teardown {
    connection: Connection,
    hub: HubHandle,
    finished: AtomicBool,
    stop: CancellationToken,
}

impl Teardown {
    /// Guard for `connection`, unregistering through `hub`.
    pub fn new(connection: Connection, hub: HubHandle) -> Self {
        Self {
            connection,
            hub,
            finished: AtomicBool::new(false),
            stop: CancellationToken::new(),
        }
    }

    /// The guarded connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Stop both pumps and unregister. Only the first call has any effect.
    pub async fn finish(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.cancel();
        if self.hub.unregister(self.connection.clone()).await.is_err() {
            // Hub loop is gone; close locally so the outbound pump drains.
            self.connection.close();
        }
    }

    /// Whether teardown has started.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Resolves once teardown has started.
    pub async fn stopped(&self) {
        self.stop.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;

    #[test]
    fn connection_ids_are_unique() {
        let (a, _rx_a) = Connection::new(ConnectionKey::new(1, "s"), 4);
        let (b, _rx_b) = Connection::new(ConnectionKey::new(1, "s"), 4);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.key(), b.key());
    }

    #[tokio::test]
    async fn offer_reports_full_then_closed() {
        let (conn, mut rx) = Connection::new(ConnectionKey::new(1, "s"), 2);
        assert_eq!(conn.offer("a".into()), Ok(()));
        assert_eq!(conn.offer("b".into()), Ok(()));
        assert_eq!(conn.offer("c".into()), Err(OfferError::Full));

        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert_eq!(conn.offer("d".into()), Err(OfferError::Closed));
    }

    #[tokio::test]
    async fn teardown_unregisters_exactly_once() {
        let (hub, handle) = Hub::new(16);
        let hub_task = tokio::spawn(hub.run());

        let (conn, _rx) = Connection::new(ConnectionKey::new(3, "s"), 4);
        handle.register(conn.clone()).await.unwrap();
        assert_eq!(handle.connection_count().await.unwrap(), 1);

        let teardown = Teardown::new(conn.clone(), handle.clone());
        tokio::join!(teardown.finish(), teardown.finish());
        assert!(teardown.is_finished());
        assert!(conn.is_closed());
        assert_eq!(handle.connection_count().await.unwrap(), 0);

        handle.shutdown().await.unwrap();
        hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn teardown_closes_locally_when_hub_is_gone() {
        let (hub, handle) = Hub::new(4);
        drop(hub);

        let (conn, _rx) = Connection::new(ConnectionKey::new(3, "s"), 4);
        let teardown = Teardown::new(conn.clone(), handle);
        teardown.finish().await;
        assert!(conn.is_closed());
    }
}
