//! Chat pipeline: from an inbound frame to a queued reply.
//!
//! ```text
//! inbound pump ── accept_user_turn ──► persist user message
//!                        │
//!                      Turn (per-connection FIFO)
//!                        ▼
//! responder worker ─ answer ─► Responder::respond ─► persist reply ─► queue "ai" frame
//! ```
//!
//! Persistence failures never stop a turn: a lost user message still gets
//! a reply, a lost reply is still delivered (without `messageId`).

// Rust guideline compliant 2026-02

use std::sync::Arc;

use uuid::Uuid;

use crate::connection::frame::{InboundFrame, OutboundFrame};
use crate::connection::{Connection, OfferError};
use crate::constants::{CONVERSATION_ENDED_MESSAGE, WELCOME_MESSAGE};
use crate::hub::HubHandle;
use crate::responder::Responder;
use crate::store::{
    Conversation, ConversationId, ConversationStatus, MessageId, MessageKind, RecordStore, Sender,
    StorageError, UserId,
};

/// One user turn waiting for a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Conversation the turn belongs to.
    pub conversation_id: ConversationId,
    /// Trimmed user text.
    pub text: String,
    /// Id of the persisted user message, if persisting succeeded.
    pub user_message_id: Option<MessageId>,
}

/// Session resolved at upgrade time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session id (client-supplied or generated).
    pub session_id: String,
    /// Open conversation for the session.
    pub conversation: Conversation,
}

/// Glue between the connection pumps, the store, the responder and the hub.
pub struct ChatPipeline {
    store: Arc<dyn RecordStore>,
    responder: Responder,
    hub: HubHandle,
}

impl std::fmt::Debug for ChatPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatPipeline")
            .field("responder", &self.responder)
            .finish_non_exhaustive()
    }
}

impl ChatPipeline {
    /// Assemble the pipeline.
    pub fn new(store: Arc<dyn RecordStore>, responder: Responder, hub: HubHandle) -> Self {
        Self {
            store,
            responder,
            hub,
        }
    }

    /// Resolve the session for a new connection.
    ///
    /// A missing or blank `session_id` gets a fresh UUID. The open
    /// conversation for the pair is reused, otherwise created.
    ///
    /// # Errors
    ///
    /// Returns the store error if the conversation cannot be resolved.
    pub async fn open_session(
        &self,
        user_id: UserId,
        session_id: Option<&str>,
    ) -> Result<Session, StorageError> {
        let session_id = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

        let conversation = self
            .store
            .find_or_create_conversation(user_id, &session_id)
            .await?;
        Ok(Session {
            session_id,
            conversation,
        })
    }

    /// Queue the welcome notice on a freshly registered connection.
    pub fn welcome(&self, connection: &Connection) {
        notify(connection, WELCOME_MESSAGE);
    }

    /// Persist the user's message and produce the turn to answer.
    ///
    /// Returns `None` for blank content.
    pub async fn accept_user_turn(
        &self,
        conversation: &Conversation,
        frame: InboundFrame,
    ) -> Option<Turn> {
        let text = frame.text()?.to_string();
        let user_message_id = match self
            .store
            .create_message(conversation.id, Sender::User, &text, frame.message_kind())
            .await
        {
            Ok(message) => Some(message.id),
            Err(e) => {
                log::warn!(
                    "[Conn] Failed to persist user message in conversation {}: {}",
                    conversation.id,
                    e
                );
                None
            }
        };

        Some(Turn {
            conversation_id: conversation.id,
            text,
            user_message_id,
        })
    }

    /// Produce, persist and queue the reply to `turn`.
    pub async fn answer(&self, turn: Turn, connection: &Connection) {
        let reply = self
            .responder
            .respond(&turn.text, turn.conversation_id, turn.user_message_id)
            .await;

        let message_id = match self
            .store
            .create_message(turn.conversation_id, Sender::Assistant, &reply, MessageKind::Text)
            .await
        {
            Ok(message) => Some(message.id),
            Err(e) => {
                log::warn!(
                    "[Conn] Failed to persist reply in conversation {}: {}",
                    turn.conversation_id,
                    e
                );
                None
            }
        };

        let payload = match OutboundFrame::reply(reply, message_id).encode() {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("[Conn] Failed to encode reply frame: {}", e);
                return;
            }
        };

        match connection.offer(payload) {
            Ok(()) => {}
            Err(OfferError::Full) => {
                log::warn!(
                    "[Conn] {} outbound queue full, evicting ({})",
                    connection.id(),
                    connection.key()
                );
                if self.hub.unregister(connection.clone()).await.is_err() {
                    connection.close();
                }
            }
            Err(OfferError::Closed) => {
                log::debug!("[Conn] {} closed before reply was queued", connection.id());
            }
        }
    }

    /// Handle a client's end frame: close `conversation` and queue the
    /// notice. The caller closes the socket once this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the status could not be updated; the
    /// session stays usable in that case.
    pub async fn end_session(
        &self,
        conversation: &Conversation,
        connection: &Connection,
    ) -> Result<(), StorageError> {
        self.end_conversation(conversation.user_id, &conversation.session_id)
            .await?;
        notify(connection, CONVERSATION_ENDED_MESSAGE);
        Ok(())
    }

    /// Mark the user's conversation for `session_id` as closed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the user has no conversation
    /// for `session_id`.
    pub async fn end_conversation(
        &self,
        user_id: UserId,
        session_id: &str,
    ) -> Result<Conversation, StorageError> {
        let conversation = self
            .store
            .set_conversation_status(session_id, user_id, ConversationStatus::Closed)
            .await?;
        log::info!(
            "[Conn] Conversation {} closed (user={}, session={})",
            conversation.id,
            user_id,
            session_id
        );
        Ok(conversation)
    }
}

/// Queue a system notice, best effort.
fn notify(connection: &Connection, text: &str) {
    match OutboundFrame::system(text).encode() {
        Ok(payload) => {
            if let Err(e) = connection.offer(payload) {
                log::debug!("[Conn] {} notice not queued: {}", connection.id(), e);
            }
        }
        Err(e) => log::error!("[Conn] Failed to encode system frame: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionKey;
    use crate::constants::NO_PROVIDER_REPLY;
    use crate::hub::Hub;
    use crate::responder::ResponderSettings;
    use crate::store::{FaqEntry, FaqId, Message, MemoryStore};
    use async_trait::async_trait;

    /// Store whose message writes always fail.
    struct ReadOnlyStore(MemoryStore);

    #[async_trait]
    impl RecordStore for ReadOnlyStore {
        async fn create_message(
            &self,
            _conversation_id: ConversationId,
            _sender: Sender,
            _content: &str,
            _kind: MessageKind,
        ) -> Result<Message, StorageError> {
            Err(StorageError::Backend("disk full".to_string()))
        }

        async fn list_messages(
            &self,
            conversation_id: ConversationId,
            limit: Option<usize>,
        ) -> Result<Vec<Message>, StorageError> {
            self.0.list_messages(conversation_id, limit).await
        }

        async fn list_messages_before(
            &self,
            conversation_id: ConversationId,
            before: MessageId,
            limit: usize,
        ) -> Result<Vec<Message>, StorageError> {
            self.0.list_messages_before(conversation_id, before, limit).await
        }

        async fn find_or_create_conversation(
            &self,
            user_id: UserId,
            session_id: &str,
        ) -> Result<Conversation, StorageError> {
            self.0.find_or_create_conversation(user_id, session_id).await
        }

        async fn set_conversation_status(
            &self,
            session_id: &str,
            user_id: UserId,
            status: ConversationStatus,
        ) -> Result<Conversation, StorageError> {
            self.0.set_conversation_status(session_id, user_id, status).await
        }

        async fn list_enabled_faqs(&self) -> Result<Vec<FaqEntry>, StorageError> {
            self.0.list_enabled_faqs().await
        }

        async fn increment_faq_view(&self, id: FaqId) -> Result<(), StorageError> {
            self.0.increment_faq_view(id).await
        }
    }

    fn queue_faq() -> FaqEntry {
        FaqEntry {
            id: 1,
            question: "如何排队".to_string(),
            answer: "请扫码取号。".to_string(),
            category: String::new(),
            keywords: "排队".to_string(),
            view_count: 0,
            enabled: true,
        }
    }

    fn pipeline(store: Arc<dyn RecordStore>, hub: HubHandle) -> ChatPipeline {
        let responder = Responder::new(store.clone(), None, ResponderSettings::default());
        ChatPipeline::new(store, responder, hub)
    }

    fn frame(content: &str) -> InboundFrame {
        InboundFrame::decode(&serde_json::json!({ "content": content }).to_string()).unwrap()
    }

    fn decode(payload: &str) -> OutboundFrame {
        serde_json::from_str(payload).unwrap()
    }

    #[tokio::test]
    async fn open_session_generates_id_when_absent() {
        let store = Arc::new(MemoryStore::new());
        let (_hub, handle) = Hub::new(4);
        let pipeline = pipeline(store, handle);

        let generated = pipeline.open_session(1, None).await.unwrap();
        assert!(Uuid::parse_str(&generated.session_id).is_ok());

        let blank = pipeline.open_session(1, Some("  ")).await.unwrap();
        assert_ne!(blank.session_id, generated.session_id);

        let named = pipeline.open_session(1, Some("abc")).await.unwrap();
        let again = pipeline.open_session(1, Some("abc")).await.unwrap();
        assert_eq!(named.session_id, "abc");
        assert_eq!(named.conversation.id, again.conversation.id);
    }

    #[tokio::test]
    async fn turn_persists_user_then_reply() {
        let store = Arc::new(MemoryStore::with_faqs(vec![queue_faq()]));
        let (_hub, handle) = Hub::new(4);
        let pipeline = pipeline(store.clone(), handle);
        let session = pipeline.open_session(1, Some("s")).await.unwrap();
        let (conn, mut rx) = Connection::new(ConnectionKey::new(1, "s"), 8);

        let turn = pipeline
            .accept_user_turn(&session.conversation, frame("  怎么排队 "))
            .await
            .unwrap();
        assert_eq!(turn.text, "怎么排队");
        assert!(turn.user_message_id.is_some());
        pipeline.answer(turn, &conn).await;

        let history = store
            .list_messages(session.conversation.id, None)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender, Sender::User);
        assert_eq!(history[1].sender, Sender::Assistant);
        assert_eq!(history[1].content, "请扫码取号。");

        let reply = decode(&rx.recv().await.unwrap());
        assert_eq!(reply.kind, "ai");
        assert_eq!(reply.content, "请扫码取号。");
        assert_eq!(reply.message_id, Some(history[1].id));
    }

    #[tokio::test]
    async fn blank_content_is_not_a_turn() {
        let store = Arc::new(MemoryStore::new());
        let (_hub, handle) = Hub::new(4);
        let pipeline = pipeline(store.clone(), handle);
        let session = pipeline.open_session(1, Some("s")).await.unwrap();

        assert!(pipeline
            .accept_user_turn(&session.conversation, frame("   "))
            .await
            .is_none());
        assert!(store
            .list_messages(session.conversation.id, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn failed_writes_still_produce_a_reply_without_message_id() {
        let store: Arc<dyn RecordStore> = Arc::new(ReadOnlyStore(MemoryStore::new()));
        let (_hub, handle) = Hub::new(4);
        let pipeline = pipeline(store, handle);
        let session = pipeline.open_session(1, Some("s")).await.unwrap();
        let (conn, mut rx) = Connection::new(ConnectionKey::new(1, "s"), 8);

        let turn = pipeline
            .accept_user_turn(&session.conversation, frame("hello"))
            .await
            .unwrap();
        assert_eq!(turn.user_message_id, None);
        pipeline.answer(turn, &conn).await;

        let reply = decode(&rx.recv().await.unwrap());
        assert_eq!(reply.content, NO_PROVIDER_REPLY);
        assert_eq!(reply.message_id, None);
    }

    #[tokio::test]
    async fn full_queue_on_reply_evicts_connection() {
        let store = Arc::new(MemoryStore::new());
        let (hub, handle) = Hub::new(16);
        let task = tokio::spawn(hub.run());
        let pipeline = pipeline(store, handle.clone());
        let session = pipeline.open_session(1, Some("s")).await.unwrap();

        let (conn, _rx) = Connection::new(ConnectionKey::new(1, "s"), 1);
        handle.register(conn.clone()).await.unwrap();
        pipeline.welcome(&conn);

        let turn = pipeline
            .accept_user_turn(&session.conversation, frame("hello"))
            .await
            .unwrap();
        pipeline.answer(turn, &conn).await;

        assert!(conn.is_closed());
        assert_eq!(handle.connection_count().await.unwrap(), 0);
        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn welcome_is_a_system_frame() {
        let store = Arc::new(MemoryStore::new());
        let (_hub, handle) = Hub::new(4);
        let pipeline = pipeline(store, handle);
        let (conn, mut rx) = Connection::new(ConnectionKey::new(1, "s"), 4);

        pipeline.welcome(&conn);
        let frame = decode(&rx.recv().await.unwrap());
        assert_eq!(frame.kind, "system");
        assert_eq!(frame.content, WELCOME_MESSAGE);
    }

    #[tokio::test]
    async fn end_conversation_closes_and_next_session_is_fresh() {
        let store = Arc::new(MemoryStore::new());
        let (_hub, handle) = Hub::new(4);
        let pipeline = pipeline(store, handle);
        let first = pipeline.open_session(1, Some("s")).await.unwrap();

        let closed = pipeline.end_conversation(1, "s").await.unwrap();
        assert_eq!(closed.id, first.conversation.id);
        assert_eq!(closed.status, ConversationStatus::Closed);

        let next = pipeline.open_session(1, Some("s")).await.unwrap();
        assert_ne!(next.conversation.id, first.conversation.id);
        assert!(pipeline.end_conversation(1, "unknown").await.is_err());
    }

    #[tokio::test]
    async fn end_session_closes_conversation_and_queues_notice() {
        let store = Arc::new(MemoryStore::new());
        let (_hub, handle) = Hub::new(4);
        let pipeline = pipeline(store.clone(), handle);
        let session = pipeline.open_session(1, Some("s")).await.unwrap();
        let (conn, mut rx) = Connection::new(ConnectionKey::new(1, "s"), 4);

        pipeline
            .end_session(&session.conversation, &conn)
            .await
            .unwrap();

        let notice = decode(&rx.recv().await.unwrap());
        assert_eq!(notice.kind, "system");
        assert_eq!(notice.content, CONVERSATION_ENDED_MESSAGE);
        assert_eq!(
            store.conversations_for(1)[0].status,
            ConversationStatus::Closed
        );
    }
}
