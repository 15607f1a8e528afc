//! Application-wide constants for support-hub.
//!
//! This module centralizes the timing, sizing and fixed-text constants used
//! by the connection pumps, the hub and the responder. Constants are grouped
//! by domain; the runtime-tunable ones have a matching field in
//! [`crate::config::ConnectionConfig`] that defaults to the value here.
//!
//! # Categories
//!
//! - **Liveness**: read deadline, ping cadence, write deadline
//! - **Queues**: outbound queue and hub command channel sizes
//! - **Responder**: history window and fixed reply texts

// Rust guideline compliant 2026-02

use std::time::Duration;

// ============================================================================
// Liveness
// ============================================================================

/// Time allowed to receive anything (data or keepalive reply) from a peer.
///
/// The inbound pump resets its read deadline to `now + PONG_WAIT` on every
/// received frame. Silence for longer than this is a fatal read error.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Keepalive ping cadence. Must be shorter than [`PONG_WAIT`] (9/10 of it).
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Deadline for a single wire write (payload batch, ping, or close frame).
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Largest inbound WebSocket message accepted from a client (512 KiB).
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

// ============================================================================
// Queues
// ============================================================================

/// Capacity of each connection's outbound queue.
///
/// Sized to absorb bursts. A queue that fills up marks its consumer as dead
/// and the hub evicts it.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Capacity of the hub's command channel.
pub const HUB_COMMAND_CAPACITY: usize = 1024;

/// User turns a connection may have waiting for the responder worker.
///
/// A client that overruns it is evicted, like a full outbound queue.
pub const TURN_QUEUE_CAPACITY: usize = 32;

// ============================================================================
// Responder
// ============================================================================

/// Number of prior messages sent to the LLM as conversational context.
pub const HISTORY_LIMIT: usize = 10;

/// Request timeout for chat-completion calls.
pub const LLM_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// System instruction prepended to every chat-completion request.
pub const SYSTEM_PROMPT: &str = "你是马上来场站服务系统的智能客服助手。你需要帮助用户解答关于运单、排队叫号、场站服务等相关问题。请用简洁、友好的语气回答用户的问题。";

/// Reply when the provider call fails.
pub const APOLOGY_REPLY: &str = "抱歉，服务暂时不可用，请稍后再试。";

/// Reply to an FAQ miss when no provider is configured.
pub const NO_PROVIDER_REPLY: &str = "抱歉，我暂时无法理解您的问题。请联系人工客服获取帮助。";

/// System frame sent before a conversation-ending close.
pub const CONVERSATION_ENDED_MESSAGE: &str = "会话已结束";

/// System frame queued on every freshly registered connection.
pub const WELCOME_MESSAGE: &str = "欢迎使用马上来场站服务系统智能客服！有什么可以帮您的吗？";
