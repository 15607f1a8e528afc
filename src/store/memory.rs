//! In-process [`RecordStore`] implementation.
//!
//! Holds conversations, messages and FAQ entries behind a single mutex.
//! FAQ entries are kept in a `BTreeMap`, so `list_enabled_faqs` iterates in
//! ascending id order and the first-match-wins rule of the responder is
//! deterministic.

// Rust guideline compliant 2026-02

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::{
    Conversation, ConversationId, ConversationStatus, FaqEntry, FaqId, Message, MessageId,
    MessageKind, RecordStore, Sender, StorageError, UserId,
};

#[derive(Debug, Default)]
struct Inner {
    next_conversation_id: ConversationId,
    next_message_id: u64,
    conversations: Vec<Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    faqs: BTreeMap<FaqId, FaqEntry>,
}

/// Mutex-guarded in-memory record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with FAQ entries.
    pub fn with_faqs(faqs: impl IntoIterator<Item = FaqEntry>) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            for faq in faqs {
                inner.faqs.insert(faq.id, faq);
            }
        }
        store
    }

    /// Create a store seeded from a JSON array of FAQ entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a JSON array of
    /// FAQ entries.
    pub fn from_faq_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read FAQ seed file: {}", path.display()))?;
        let faqs: Vec<FaqEntry> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid FAQ seed file: {}", path.display()))?;
        log::info!("Loaded {} FAQ entries from {}", faqs.len(), path.display());
        Ok(Self::with_faqs(faqs))
    }

    /// Snapshot of a single FAQ entry (enabled or not).
    pub fn faq(&self, id: FaqId) -> Option<FaqEntry> {
        self.lock().ok()?.faqs.get(&id).cloned()
    }

    /// All conversations of a user, oldest first.
    pub fn conversations_for(&self, user_id: UserId) -> Vec<Conversation> {
        self.lock()
            .map(|inner| {
                inner
                    .conversations
                    .iter()
                    .filter(|c| c.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|e| StorageError::Backend(format!("memory store lock poisoned: {e}")))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_message(
        &self,
        conversation_id: ConversationId,
        sender: Sender,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, StorageError> {
        let mut inner = self.lock()?;
        if !inner.conversations.iter().any(|c| c.id == conversation_id) {
            return Err(StorageError::NotFound(format!(
                "conversation {conversation_id}"
            )));
        }

        inner.next_message_id += 1;
        let id = inner.next_message_id;
        let history = inner.messages.entry(conversation_id).or_default();
        let message = Message {
            id,
            conversation_id,
            sequence: history.len() as u64 + 1,
            sender,
            content: content.to_string(),
            kind,
            created_at: Utc::now(),
        };
        history.push(message.clone());
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, StorageError> {
        let inner = self.lock()?;
        let Some(history) = inner.messages.get(&conversation_id) else {
            return Ok(Vec::new());
        };
        let skip = limit.map_or(0, |limit| history.len().saturating_sub(limit));
        Ok(history[skip..].to_vec())
    }

    async fn list_messages_before(
        &self,
        conversation_id: ConversationId,
        before: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let inner = self.lock()?;
        let Some(history) = inner.messages.get(&conversation_id) else {
            return Ok(Vec::new());
        };
        let end = history.partition_point(|m| m.id < before);
        let start = end.saturating_sub(limit);
        Ok(history[start..end].to_vec())
    }

    async fn find_or_create_conversation(
        &self,
        user_id: UserId,
        session_id: &str,
    ) -> Result<Conversation, StorageError> {
        let mut inner = self.lock()?;
        if let Some(open) = inner.conversations.iter().find(|c| {
            c.user_id == user_id
                && c.session_id == session_id
                && c.status == ConversationStatus::Open
        }) {
            return Ok(open.clone());
        }

        inner.next_conversation_id += 1;
        let now = Utc::now();
        let conversation = Conversation {
            id: inner.next_conversation_id,
            session_id: session_id.to_string(),
            user_id,
            status: ConversationStatus::Open,
            created_at: now,
            updated_at: now,
        };
        inner.conversations.push(conversation.clone());
        log::debug!(
            "Created conversation {} (user={}, session={})",
            conversation.id,
            user_id,
            session_id
        );
        Ok(conversation)
    }

    async fn set_conversation_status(
        &self,
        session_id: &str,
        user_id: UserId,
        status: ConversationStatus,
    ) -> Result<Conversation, StorageError> {
        let mut inner = self.lock()?;
        // Prefer the open conversation; fall back to the most recent one.
        let position = inner
            .conversations
            .iter()
            .rposition(|c| {
                c.user_id == user_id
                    && c.session_id == session_id
                    && c.status == ConversationStatus::Open
            })
            .or_else(|| {
                inner
                    .conversations
                    .iter()
                    .rposition(|c| c.user_id == user_id && c.session_id == session_id)
            })
            .ok_or_else(|| StorageError::NotFound(format!("session {session_id}")))?;

        let conversation = &mut inner.conversations[position];
        conversation.status = status;
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn list_enabled_faqs(&self) -> Result<Vec<FaqEntry>, StorageError> {
        Ok(self
            .lock()?
            .faqs
            .values()
            .filter(|faq| faq.enabled)
            .cloned()
            .collect())
    }

    async fn increment_faq_view(&self, id: FaqId) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let faq = inner
            .faqs
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("faq {id}")))?;
        faq.view_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn faq(id: FaqId, enabled: bool) -> FaqEntry {
        FaqEntry {
            id,
            question: format!("question {id}"),
            answer: format!("answer {id}"),
            category: "general".to_string(),
            keywords: String::new(),
            view_count: 0,
            enabled,
        }
    }

    #[tokio::test]
    async fn messages_get_increasing_sequence_and_ids() {
        let store = MemoryStore::new();
        let conv = store.find_or_create_conversation(7, "s1").await.unwrap();

        let first = store
            .create_message(conv.id, Sender::User, "hi", MessageKind::Text)
            .await
            .unwrap();
        let second = store
            .create_message(conv.id, Sender::Assistant, "hello", MessageKind::Text)
            .await
            .unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn create_message_requires_known_conversation() {
        let store = MemoryStore::new();
        let err = store
            .create_message(42, Sender::User, "hi", MessageKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_messages_returns_most_recent_in_ascending_order() {
        let store = MemoryStore::new();
        let conv = store.find_or_create_conversation(1, "s").await.unwrap();
        for i in 0..15 {
            store
                .create_message(conv.id, Sender::User, &format!("m{i}"), MessageKind::Text)
                .await
                .unwrap();
        }

        let window = store.list_messages(conv.id, Some(10)).await.unwrap();
        let contents: Vec<&str> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents.len(), 10);
        assert_eq!(contents.first(), Some(&"m5"));
        assert_eq!(contents.last(), Some(&"m14"));

        let all = store.list_messages(conv.id, None).await.unwrap();
        assert_eq!(all.len(), 15);
        assert!(store.list_messages(999, Some(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_messages_before_ignores_later_messages() {
        let store = MemoryStore::new();
        let conv = store.find_or_create_conversation(1, "s").await.unwrap();
        let mut ids = Vec::new();
        for i in 0..6 {
            let message = store
                .create_message(conv.id, Sender::User, &format!("m{i}"), MessageKind::Text)
                .await
                .unwrap();
            ids.push(message.id);
        }

        let window = store.list_messages_before(conv.id, ids[4], 3).await.unwrap();
        let contents: Vec<&str> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m2", "m3"]);

        assert!(store
            .list_messages_before(conv.id, ids[0], 10)
            .await
            .unwrap()
            .is_empty());
        assert!(store.list_messages_before(999, ids[5], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_or_create_reuses_open_conversation() {
        let store = MemoryStore::new();
        let a = store.find_or_create_conversation(1, "s").await.unwrap();
        let b = store.find_or_create_conversation(1, "s").await.unwrap();
        assert_eq!(a.id, b.id);

        // Same session id for another user is a different conversation.
        let other = store.find_or_create_conversation(2, "s").await.unwrap();
        assert_ne!(other.id, a.id);
    }

    #[tokio::test]
    async fn closed_conversation_is_not_resumed() {
        let store = MemoryStore::new();
        let first = store.find_or_create_conversation(1, "s").await.unwrap();
        let closed = store
            .set_conversation_status("s", 1, ConversationStatus::Closed)
            .await
            .unwrap();
        assert_eq!(closed.id, first.id);
        assert_eq!(closed.status, ConversationStatus::Closed);

        let next = store.find_or_create_conversation(1, "s").await.unwrap();
        assert_ne!(next.id, first.id);
        assert_eq!(next.status, ConversationStatus::Open);

        let open: Vec<_> = store
            .conversations_for(1)
            .into_iter()
            .filter(|c| c.status == ConversationStatus::Open)
            .collect();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn set_status_for_unknown_session_fails() {
        let store = MemoryStore::new();
        let err = store
            .set_conversation_status("missing", 1, ConversationStatus::Closed)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn enabled_faqs_are_ordered_by_id() {
        let store = MemoryStore::with_faqs(vec![faq(3, true), faq(1, true), faq(2, false)]);
        let ids: Vec<FaqId> = store
            .list_enabled_faqs()
            .await
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn increment_faq_view_bumps_counter() {
        let store = MemoryStore::with_faqs(vec![faq(1, true)]);
        store.increment_faq_view(1).await.unwrap();
        store.increment_faq_view(1).await.unwrap();
        assert_eq!(store.faq(1).unwrap().view_count, 2);
        assert!(store.increment_faq_view(9).await.is_err());
    }

    #[test]
    fn from_faq_file_reads_json_seed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("faqs.json");
        std::fs::write(
            &path,
            r#"[{"id":1,"question":"如何取号","answer":"请在场站入口扫码取号。","keywords":"排队,取号"}]"#,
        )
        .unwrap();

        let store = MemoryStore::from_faq_file(&path).unwrap();
        let entry = store.faq(1).unwrap();
        assert_eq!(entry.answer, "请在场站入口扫码取号。");
        assert!(entry.enabled);
    }

    #[test]
    fn from_faq_file_rejects_invalid_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("faqs.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(MemoryStore::from_faq_file(&path).is_err());
    }
}
