//! Record store seam.
//!
//! The chat core persists users' turns and replies, resolves conversations
//! and reads FAQ entries through the [`RecordStore`] trait. Production
//! deployments back it with a database; [`MemoryStore`] keeps everything in
//! process and is what the binary and the tests use.
//!
//! # Failure policy
//!
//! Every operation is fallible. Callers in the core log a
//! [`StorageError`] and keep the chat going: a failed user-turn write does
//! not prevent the reply, and a failed FAQ load falls through to the LLM.

// Rust guideline compliant 2026-02

pub mod memory;
pub mod types;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use types::{
    Conversation, ConversationId, ConversationStatus, FaqEntry, FaqId, Message, MessageId,
    MessageKind, Sender, UserId,
};

/// Errors returned by a [`RecordStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The referenced record does not exist.
    NotFound(String),
    /// The backend could not complete the operation.
    Backend(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "Record not found: {what}"),
            Self::Backend(msg) => write!(f, "Storage backend error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Persistence operations consumed by the chat core.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append a message to a conversation and return the stored record.
    async fn create_message(
        &self,
        conversation_id: ConversationId,
        sender: Sender,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, StorageError>;

    /// List messages of a conversation in ascending creation order.
    ///
    /// With `Some(limit)` only the `limit` most recent messages are
    /// returned (still ascending). `None` returns the full history.
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, StorageError>;

    /// The `limit` most recent messages created before message `before`,
    /// ascending. `before` itself is excluded.
    ///
    /// Message ids increase in creation order, so this is the context a
    /// turn had when it arrived, whatever was appended since.
    async fn list_messages_before(
        &self,
        conversation_id: ConversationId,
        before: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;

    /// Return the open conversation for `(user_id, session_id)`, creating
    /// one if none is open.
    async fn find_or_create_conversation(
        &self,
        user_id: UserId,
        session_id: &str,
    ) -> Result<Conversation, StorageError>;

    /// Set the status of the user's conversation for `session_id`.
    async fn set_conversation_status(
        &self,
        session_id: &str,
        user_id: UserId,
        status: ConversationStatus,
    ) -> Result<Conversation, StorageError>;

    /// All enabled FAQ entries, in the store's iteration order.
    async fn list_enabled_faqs(&self) -> Result<Vec<FaqEntry>, StorageError>;

    /// Bump the view counter of an FAQ entry. Lost updates are acceptable.
    async fn increment_faq_view(&self, id: FaqId) -> Result<(), StorageError>;
}
