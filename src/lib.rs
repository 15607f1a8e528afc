//! Support Hub - real-time customer-support chat backend.
//!
//! End users connect over WebSocket, type questions and get back either a
//! canned FAQ answer or an LLM-generated reply. Every turn is persisted so
//! the conversation can be resumed.
//!
//! # Architecture
//!
//! - **Hub** - owns the registry of live connections, one coordination task
//! - **Connection** - bounded outbound queue plus inbound/outbound pumps
//! - **Pipeline** - persists turns and relays replies
//! - **Responder** - FAQ lookup, then LLM fallback with recent history
//! - **Server** - WebSocket upgrade and authentication
//!
//! # Modules
//!
//! - [`hub`] - connection registry and its command loop
//! - [`connection`] - per-connection handle, frames and pumps
//! - [`responder`] / [`llm`] - reply generation
//! - [`store`] - record store seam and in-memory implementation
//! - [`config`] - configuration loading/saving

// Rust guideline compliant 2026-02

pub mod config;
pub mod connection;
pub mod constants;
pub mod hub;
pub mod identity;
pub mod llm;
pub mod pipeline;
pub mod responder;
pub mod server;
pub mod store;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use hub::{Hub, HubHandle};
pub use pipeline::ChatPipeline;
pub use responder::Responder;
pub use server::{ChatServer, ServerContext};
