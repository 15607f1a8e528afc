//! Hub commands for connection-to-hub communication.
//!
//! Connections, the server and the pipeline send these to the Hub via a
//! `tokio::sync::mpsc` channel. The Hub processes them in its main loop
//! (actor pattern), so the registry is never touched concurrently.
//!
//! # Command Types
//!
//! - [`HubCommand::Register`] - Add a connection, evicting a stale one
//! - [`HubCommand::Unregister`] - Remove a connection (idempotent)
//! - [`HubCommand::SendToUser`] - Offer a payload to one user's connections
//! - [`HubCommand::Broadcast`] - Offer a payload to every connection
//! - [`HubCommand::Count`] - Number of registered connections
//! - [`HubCommand::Shutdown`] - Close everything and stop the loop
//!
//! Commands that need an answer carry a oneshot sender; the caller awaits it
//! so the operation has been applied when the call returns.

use tokio::sync::oneshot;

use crate::connection::Connection;
use crate::store::UserId;

/// Command processed by the Hub loop.
#[derive(Debug)]
pub enum HubCommand {
    /// Register a connection.
    Register {
        /// Connection to add.
        connection: Connection,
        /// Acknowledged once the registry has been updated.
        response_tx: oneshot::Sender<()>,
    },

    /// Unregister a connection.
    Unregister {
        /// Connection to remove.
        connection: Connection,
        /// Acknowledged once removal has been applied.
        response_tx: oneshot::Sender<()>,
    },

    /// Deliver a payload to every connection of a user.
    SendToUser {
        /// Target user.
        user_id: UserId,
        /// Serialized frame.
        payload: String,
        /// Number of connections that accepted the payload.
        response_tx: oneshot::Sender<usize>,
    },

    /// Deliver a payload to every connection.
    Broadcast {
        /// Serialized frame.
        payload: String,
        /// Number of connections that accepted the payload.
        response_tx: oneshot::Sender<usize>,
    },

    /// Count registered connections.
    Count {
        /// Current registry size.
        response_tx: oneshot::Sender<usize>,
    },

    /// Close every connection and stop the loop.
    Shutdown,
}

impl HubCommand {
    /// Build a register command and its acknowledgement receiver.
    pub fn register(connection: Connection) -> (Self, oneshot::Receiver<()>) {
        let (response_tx, rx) = oneshot::channel();
        (
            Self::Register {
                connection,
                response_tx,
            },
            rx,
        )
    }

    /// Build an unregister command and its acknowledgement receiver.
    pub fn unregister(connection: Connection) -> (Self, oneshot::Receiver<()>) {
        let (response_tx, rx) = oneshot::channel();
        (
            Self::Unregister {
                connection,
                response_tx,
            },
            rx,
        )
    }

    /// Build a send-to-user command and its delivery-count receiver.
    pub fn send_to_user(
        user_id: UserId,
        payload: String,
    ) -> (Self, oneshot::Receiver<usize>) {
        let (response_tx, rx) = oneshot::channel();
        (
            Self::SendToUser {
                user_id,
                payload,
                response_tx,
            },
            rx,
        )
    }

    /// Build a broadcast command and its delivery-count receiver.
    pub fn broadcast(payload: String) -> (Self, oneshot::Receiver<usize>) {
        let (response_tx, rx) = oneshot::channel();
        (
            Self::Broadcast {
                payload,
                response_tx,
            },
            rx,
        )
    }

    /// Build a count command and its receiver.
    pub fn count() -> (Self, oneshot::Receiver<usize>) {
        let (response_tx, rx) = oneshot::channel();
        (Self::Count { response_tx }, rx)
    }
}
