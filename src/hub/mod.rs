//! Hub - the registry of live connections.
//!
//! The Hub owns the [`ConnectionRegistry`] and is the only place it is
//! mutated. Everything else talks to it through a [`HubHandle`], which
//! turns each operation into a [`HubCommand`] processed by
//! [`Hub::run`] one at a time.
//!
//! # Architecture
//!
//! ```text
//!   Server ──register──┐
//!   Teardown ─unregister┤       ┌───────────────────────┐
//!   Pipeline ─unregister┼─mpsc─►│ Hub::run              │
//!   (any) send_to_user ─┤       │  - owns registry      │
//!   (any) broadcast ────┘       │  - offer-or-evict     │
//!                               └───────────────────────┘
//! ```
//!
//! # Delivery
//!
//! Payloads are offered to each outbound queue with a non-blocking send.
//! A queue that is full (or already closed) means its client is not keeping
//! up; that connection is closed and removed on the spot, so one slow
//! client never delays the others.
//!
//! # Usage
//!
//! ```ignore
//! let (hub, handle) = Hub::new(HUB_COMMAND_CAPACITY);
//! tokio::spawn(hub.run());
//! handle.register(connection).await?;
//! ```

// Rust guideline compliant 2026-02

pub mod commands;
pub mod hub_handle;
pub mod registry;

pub use commands::HubCommand;
pub use hub_handle::{HubError, HubHandle};
pub use registry::ConnectionRegistry;

use tokio::sync::mpsc;

use crate::connection::{Connection, ConnectionKey};

/// Connection hub. Constructed once at boot and driven by [`Hub::run`].
#[derive(Debug)]
pub struct Hub {
    registry: ConnectionRegistry,
    rx: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Create the hub and its handle. `capacity` bounds the command channel.
    pub fn new(capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let hub = Self {
            registry: ConnectionRegistry::new(),
            rx,
        };
        (hub, HubHandle::new(tx))
    }

    /// Process commands until shutdown or until every handle is dropped.
    ///
    /// On exit every registered connection is closed and later commands
    /// fail with [`HubError::Closed`].
    pub async fn run(mut self) {
        log::info!("[Hub] Coordination loop started");

        while let Some(cmd) = self.rx.recv().await {
            if !self.handle_command(cmd) {
                break;
            }
        }

        self.rx.close();
        let remaining = self.registry.drain();
        for connection in &remaining {
            connection.close();
        }
        log::info!(
            "[Hub] Coordination loop stopped, closed {} connection(s)",
            remaining.len()
        );
    }

    /// Apply one command. Returns `false` when the loop should stop.
    fn handle_command(&mut self, cmd: HubCommand) -> bool {
        match cmd {
            HubCommand::Register {
                connection,
                response_tx,
            } => {
                log::info!("[Hub] Register {} ({})", connection.id(), connection.key());
                if let Some(stale) = self.registry.register(connection) {
                    log::info!("[Hub] Evicting stale connection {} ({})", stale.id(), stale.key());
                    stale.close();
                }
                let _ = response_tx.send(());
            }
            HubCommand::Unregister {
                connection,
                response_tx,
            } => {
                if self.registry.unregister(&connection) {
                    log::info!("[Hub] Unregister {} ({})", connection.id(), connection.key());
                }
                connection.close();
                let _ = response_tx.send(());
            }
            HubCommand::SendToUser {
                user_id,
                payload,
                response_tx,
            } => {
                let targets: Vec<Connection> = self.registry.for_user(user_id).cloned().collect();
                let delivered = self.deliver(&targets, &payload);
                let _ = response_tx.send(delivered);
            }
            HubCommand::Broadcast {
                payload,
                response_tx,
            } => {
                let targets: Vec<Connection> = self.registry.iter().cloned().collect();
                let delivered = self.deliver(&targets, &payload);
                let _ = response_tx.send(delivered);
            }
            HubCommand::Count { response_tx } => {
                let _ = response_tx.send(self.registry.len());
            }
            HubCommand::Shutdown => {
                log::info!("[Hub] Shutdown requested");
                return false;
            }
        }
        true
    }

    /// Offer `payload` to each target, evicting those that cannot take it.
    fn deliver(&mut self, targets: &[Connection], payload: &str) -> usize {
        let mut delivered = 0;
        let mut evicted: Vec<ConnectionKey> = Vec::new();

        for connection in targets {
            match connection.offer(payload.to_string()) {
                Ok(()) => delivered += 1,
                Err(reason) => {
                    log::warn!(
                        "[Hub] Evicting connection {} ({}): {}",
                        connection.id(),
                        connection.key(),
                        reason
                    );
                    connection.close();
                    evicted.push(connection.key().clone());
                }
            }
        }

        for key in &evicted {
            self.registry.remove(key);
        }
        delivered
    }
}
