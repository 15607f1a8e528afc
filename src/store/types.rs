//! Record types shared by the store, the responder and the pipeline.

// Rust guideline compliant 2026-02

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated end-user identifier.
pub type UserId = u64;

/// Conversation primary key.
pub type ConversationId = u64;

/// Message primary key (store-global, monotonically increasing).
pub type MessageId = u64;

/// FAQ entry primary key.
pub type FaqId = u64;

/// Lifecycle of a conversation.
///
/// A conversation only moves `Open` → `Closed` through the explicit end
/// action; disconnecting leaves it open so the user can resume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Accepting new turns.
    Open,
    /// Ended by the user.
    Closed,
}

/// A conversation grouping the messages of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Primary key.
    pub id: ConversationId,
    /// Client-visible session identifier.
    pub session_id: String,
    /// Owner.
    pub user_id: UserId,
    /// Current lifecycle status.
    pub status: ConversationStatus,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The end user.
    User,
    /// The responder (FAQ answer or LLM completion).
    Assistant,
    /// Server-generated notices.
    System,
}

impl Sender {
    /// Chat-completion role for this sender. Only assistant turns are sent
    /// as `"assistant"`; everything else is presented to the model as user
    /// input.
    pub fn api_role(self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::User | Self::System => "user",
        }
    }
}

/// Payload kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// Image reference.
    Image,
    /// File reference.
    File,
}

impl MessageKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }

    /// Parse a wire `type` value. Unknown names yield `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// One persisted message. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Primary key.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Position within the conversation, starting at 1.
    pub sequence: u64,
    /// Author class.
    pub sender: Sender,
    /// Body text.
    pub content: String,
    /// Payload kind.
    pub kind: MessageKind,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A canned question/answer pair matched before any LLM call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqEntry {
    /// Primary key.
    pub id: FaqId,
    /// Canonical question text.
    pub question: String,
    /// Answer returned on a match.
    pub answer: String,
    /// Grouping label.
    #[serde(default)]
    pub category: String,
    /// Comma-separated keyword list.
    #[serde(default)]
    pub keywords: String,
    /// Approximate popularity counter.
    #[serde(default)]
    pub view_count: u64,
    /// Disabled entries are never matched.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl FaqEntry {
    /// Trimmed, case-folded, non-empty keywords of this entry.
    pub fn folded_keywords(&self) -> impl Iterator<Item = String> + '_ {
        self.keywords
            .split(',')
            .map(|keyword| keyword.trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
    }

    /// Whether this entry answers `folded_text` (already case-folded).
    ///
    /// Matches on any keyword contained in the text, or on substring
    /// containment between the text and the question in either direction.
    /// An empty question never matches by containment.
    pub fn matches(&self, folded_text: &str) -> bool {
        if self
            .folded_keywords()
            .any(|keyword| folded_text.contains(&keyword))
        {
            return true;
        }

        let question = self.question.trim().to_lowercase();
        if question.is_empty() || folded_text.is_empty() {
            return false;
        }
        folded_text.contains(&question) || question.contains(folded_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn faq(question: &str, keywords: &str) -> FaqEntry {
        FaqEntry {
            id: 1,
            question: question.to_string(),
            answer: "answer".to_string(),
            category: String::new(),
            keywords: keywords.to_string(),
            view_count: 0,
            enabled: true,
        }
    }

    #[test]
    fn keywords_are_trimmed_folded_and_non_empty() {
        let entry = faq("q", " Queue , ,排队,,TICKET ");
        let keywords: Vec<String> = entry.folded_keywords().collect();
        assert_eq!(keywords, vec!["queue", "排队", "ticket"]);
    }

    #[test]
    fn keyword_containment_matches() {
        let entry = faq("如何取号", "排队");
        assert!(entry.matches("怎么排队"));
        assert!(!entry.matches("运单查询"));
    }

    #[test]
    fn question_containment_matches_both_directions() {
        let entry = faq("where is the entrance", "");
        assert!(entry.matches("excuse me, where is the entrance?"));
        assert!(entry.matches("entrance"));
        assert!(!entry.matches("opening hours"));
    }

    #[test]
    fn empty_question_never_matches_by_containment() {
        let entry = faq("   ", "");
        assert!(!entry.matches("anything at all"));
    }

    #[test]
    fn sender_roles() {
        assert_eq!(Sender::Assistant.api_role(), "assistant");
        assert_eq!(Sender::User.api_role(), "user");
        assert_eq!(Sender::System.api_role(), "user");
    }

    #[test]
    fn message_kind_wire_names() {
        assert_eq!(MessageKind::from_wire("image"), Some(MessageKind::Image));
        assert_eq!(MessageKind::from_wire("ping"), None);
        assert_eq!(MessageKind::File.as_str(), "file");
    }

    #[test]
    fn faq_seed_defaults() {
        let entry: FaqEntry =
            serde_json::from_str(r#"{"id":3,"question":"q","answer":"a"}"#).unwrap();
        assert!(entry.enabled);
        assert_eq!(entry.view_count, 0);
        assert!(entry.keywords.is_empty());
    }
}
