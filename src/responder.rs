//! Two-stage reply generation: FAQ lookup, then LLM fallback.
//!
//! [`Responder::respond`] never fails. Every error on the way (FAQ load,
//! history load, provider failure) is logged and the caller gets either an
//! answer or a fixed fallback: [`NO_PROVIDER_REPLY`] when no provider is
//! configured, [`APOLOGY_REPLY`] when the provider call fails.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use crate::constants::{APOLOGY_REPLY, HISTORY_LIMIT, NO_PROVIDER_REPLY, SYSTEM_PROMPT};
use crate::llm::{ChatCompletion, ChatMessage};
use crate::store::{ConversationId, FaqEntry, Message, MessageId, RecordStore};

/// Parameters forwarded to the chat-completion provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponderSettings {
    /// Model name.
    pub model: String,
    /// Completion length cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Number of prior messages sent as context.
    pub history_limit: usize,
}

impl Default for ResponderSettings {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            history_limit: HISTORY_LIMIT,
        }
    }
}

/// Produces the reply text for one user turn.
pub struct Responder {
    store: Arc<dyn RecordStore>,
    llm: Option<Arc<dyn ChatCompletion>>,
    settings: ResponderSettings,
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("llm_configured", &self.llm.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Responder {
    /// Create a responder. `llm = None` means no provider is configured and
    /// every FAQ miss is answered with the apology text.
    pub fn new(
        store: Arc<dyn RecordStore>,
        llm: Option<Arc<dyn ChatCompletion>>,
        settings: ResponderSettings,
    ) -> Self {
        Self {
            store,
            llm,
            settings,
        }
    }

    /// Reply to `text` within `conversation_id`. Always non-empty.
    ///
    /// `user_message_id` is the persisted row of this turn. The LLM context
    /// is the window of messages created before it, so turns that arrived
    /// later never leak into an earlier prompt. Without a persisted row the
    /// most recent window is used.
    pub async fn respond(
        &self,
        text: &str,
        conversation_id: ConversationId,
        user_message_id: Option<MessageId>,
    ) -> String {
        let folded = text.trim().to_lowercase();

        match self.store.list_enabled_faqs().await {
            Ok(faqs) => {
                if let Some(entry) = match_faq(&faqs, &folded) {
                    log::debug!(
                        "[Responder] FAQ {} matched in conversation {}",
                        entry.id,
                        conversation_id
                    );
                    if let Err(e) = self.store.increment_faq_view(entry.id).await {
                        log::warn!("[Responder] Failed to bump view count of FAQ {}: {}", entry.id, e);
                    }
                    return entry.answer.clone();
                }
            }
            Err(e) => log::warn!("[Responder] Failed to load FAQ entries: {}", e),
        }

        let Some(llm) = &self.llm else {
            log::info!(
                "[Responder] No LLM provider configured, conversation {} gets the fallback reply",
                conversation_id
            );
            return NO_PROVIDER_REPLY.to_string();
        };

        let limit = self.settings.history_limit;
        let history = match user_message_id {
            Some(before) => {
                self.store
                    .list_messages_before(conversation_id, before, limit)
                    .await
            }
            None => self.store.list_messages(conversation_id, Some(limit)).await,
        };
        let history = history.unwrap_or_else(|e| {
            log::warn!(
                "[Responder] Failed to load history of conversation {}: {}",
                conversation_id,
                e
            );
            Vec::new()
        });

        let messages = build_prompt(&history, text);
        match llm
            .complete(
                &messages,
                &self.settings.model,
                self.settings.max_tokens,
                self.settings.temperature,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                log::error!(
                    "[Responder] LLM call failed for conversation {}: {}",
                    conversation_id,
                    e
                );
                APOLOGY_REPLY.to_string()
            }
        }
    }
}

/// First entry in `faqs` that answers `folded_text`.
pub fn match_faq<'a>(faqs: &'a [FaqEntry], folded_text: &str) -> Option<&'a FaqEntry> {
    faqs.iter()
        .filter(|faq| faq.enabled)
        .find(|faq| faq.matches(folded_text))
}

/// System persona, then prior history, then the new turn.
fn build_prompt(history: &[Message], text: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    messages.extend(
        history
            .iter()
            .map(|m| ChatMessage::new(m.sender.api_role(), m.content.clone())),
    );
    messages.push(ChatMessage::user(text));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::store::{MemoryStore, MessageKind, Sender};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted provider that records every request it sees.
    struct FakeLlm {
        reply: Result<String, LlmError>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl FakeLlm {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(err: LlmError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(err),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatCompletion for FakeLlm {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _model: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            self.reply.clone()
        }
    }

    fn queue_faq() -> FaqEntry {
        FaqEntry {
            id: 1,
            question: "如何排队叫号".to_string(),
            answer: "请在场站入口扫码取号，叫号后按提示进场。".to_string(),
            category: "排队".to_string(),
            keywords: "排队,叫号".to_string(),
            view_count: 0,
            enabled: true,
        }
    }

    fn responder(store: Arc<MemoryStore>, llm: Option<Arc<FakeLlm>>) -> Responder {
        Responder::new(
            store,
            llm.map(|l| l as Arc<dyn ChatCompletion>),
            ResponderSettings::default(),
        )
    }

    #[tokio::test]
    async fn keyword_match_answers_without_llm() {
        let store = Arc::new(MemoryStore::with_faqs(vec![queue_faq()]));
        let llm = FakeLlm::replying("should not be used");
        let responder = responder(store.clone(), Some(llm.clone()));

        let reply = responder.respond("怎么排队", 1, None).await;

        assert_eq!(reply, queue_faq().answer);
        assert_eq!(store.faq(1).unwrap().view_count, 1);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn question_containment_matches_case_insensitively() {
        let mut entry = queue_faq();
        entry.keywords = String::new();
        entry.question = "Opening Hours".to_string();
        entry.answer = "24/7".to_string();
        let store = Arc::new(MemoryStore::with_faqs(vec![entry]));
        let responder = responder(store, None);

        assert_eq!(responder.respond("what are your OPENING hours?", 1, None).await, "24/7");
        assert_eq!(responder.respond("opening", 1, None).await, "24/7");
    }

    #[test]
    fn first_enabled_match_wins() {
        let mut disabled = queue_faq();
        disabled.id = 1;
        disabled.enabled = false;
        disabled.answer = "disabled".to_string();
        let mut second = queue_faq();
        second.id = 2;
        second.answer = "second".to_string();
        let mut third = queue_faq();
        third.id = 3;
        third.answer = "third".to_string();

        let faqs = vec![disabled, second, third];
        assert_eq!(match_faq(&faqs, "排队").map(|f| f.id), Some(2));
        assert!(match_faq(&faqs, "天气").is_none());
    }

    #[tokio::test]
    async fn miss_without_provider_returns_apology() {
        let store = Arc::new(MemoryStore::with_faqs(vec![queue_faq()]));
        let responder = responder(store, None);
        assert_eq!(responder.respond("今天天气如何", 1, None).await, NO_PROVIDER_REPLY);
    }

    #[tokio::test]
    async fn provider_error_returns_apology() {
        let store = Arc::new(MemoryStore::new());
        let llm = FakeLlm::failing(LlmError::Provider {
            status: 500,
            body: "boom".to_string(),
        });
        let responder = responder(store, Some(llm.clone()));

        assert_eq!(responder.respond("hello", 1, None).await, APOLOGY_REPLY);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn history_window_and_roles_are_sent() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.find_or_create_conversation(1, "s").await.unwrap();
        for i in 0..6 {
            store
                .create_message(conv.id, Sender::User, &format!("q{i}"), MessageKind::Text)
                .await
                .unwrap();
            store
                .create_message(conv.id, Sender::Assistant, &format!("a{i}"), MessageKind::Text)
                .await
                .unwrap();
        }
        // Already persisted by the pipeline before respond().
        let latest = store
            .create_message(conv.id, Sender::User, "latest", MessageKind::Text)
            .await
            .unwrap();

        let llm = FakeLlm::replying("generated");
        let responder = responder(store, Some(llm.clone()));
        assert_eq!(
            responder.respond("latest", conv.id, Some(latest.id)).await,
            "generated"
        );

        let calls = llm.calls.lock().unwrap();
        let sent = &calls[0];
        assert_eq!(sent[0], ChatMessage::system(SYSTEM_PROMPT));
        assert_eq!(sent.last(), Some(&ChatMessage::user("latest")));
        // System, the 10 messages before this turn, then the turn.
        assert_eq!(sent.len(), 1 + 10 + 1);
        assert_eq!(sent[1], ChatMessage::new("user", "q1"));
        assert_eq!(sent[10], ChatMessage::new("assistant", "a5"));
        assert_eq!(sent.iter().filter(|m| m.content == "latest").count(), 1);
    }

    #[tokio::test]
    async fn later_turns_are_not_context_for_earlier_ones() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.find_or_create_conversation(1, "s").await.unwrap();
        let q1 = store
            .create_message(conv.id, Sender::User, "q1", MessageKind::Text)
            .await
            .unwrap();
        store
            .create_message(conv.id, Sender::User, "q2", MessageKind::Text)
            .await
            .unwrap();

        let llm = FakeLlm::replying("r1");
        let responder = responder(store, Some(llm.clone()));
        responder.respond("q1", conv.id, Some(q1.id)).await;

        let calls = llm.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user("q1")]
        );
    }

    #[tokio::test]
    async fn repeated_question_keeps_its_earlier_occurrence() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.find_or_create_conversation(1, "s").await.unwrap();
        store
            .create_message(conv.id, Sender::User, "hello", MessageKind::Text)
            .await
            .unwrap();
        store
            .create_message(conv.id, Sender::Assistant, "hi there", MessageKind::Text)
            .await
            .unwrap();
        let again = store
            .create_message(conv.id, Sender::User, "hello", MessageKind::Text)
            .await
            .unwrap();

        let llm = FakeLlm::replying("hi again");
        let responder = responder(store, Some(llm.clone()));
        responder.respond("hello", conv.id, Some(again.id)).await;

        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls[0].len(), 4);
        assert_eq!(calls[0][1], ChatMessage::user("hello"));
        assert_eq!(calls[0][2], ChatMessage::new("assistant", "hi there"));
        assert_eq!(calls[0][3], ChatMessage::user("hello"));
    }

    #[test]
    fn system_messages_are_presented_as_user_turns() {
        let history = vec![Message {
            id: 1,
            conversation_id: 1,
            sequence: 1,
            sender: Sender::System,
            content: "notice".to_string(),
            kind: MessageKind::Text,
            created_at: chrono::Utc::now(),
        }];
        let prompt = build_prompt(&history, "hi");
        assert_eq!(prompt[1], ChatMessage::new("user", "notice"));
        assert_eq!(prompt.len(), 3);
    }
}
