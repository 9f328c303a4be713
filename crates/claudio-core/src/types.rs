use std::fmt;

use serde::{Deserialize, Serialize};

/// The chat platform a message arrived from (or is destined to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    WhatsApp,
    Alexa,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Telegram => write!(f, "telegram"),
            Platform::WhatsApp => write!(f, "whatsapp"),
            Platform::Alexa => write!(f, "alexa"),
        }
    }
}

/// Selectable Claude model tier. `/opus`, `/sonnet`, `/haiku` map 1:1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Opus,
    Sonnet,
    Haiku,
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Opus => write!(f, "opus"),
            Model::Sonnet => write!(f, "sonnet"),
            Model::Haiku => write!(f, "haiku"),
        }
    }
}

impl std::str::FromStr for Model {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opus" => Ok(Model::Opus),
            "sonnet" => Ok(Model::Sonnet),
            "haiku" => Ok(Model::Haiku),
            other => Err(crate::error::CoreError::InvalidModel(other.to_string())),
        }
    }
}

/// A reference to a piece of media attached to an inbound message.
/// Carries only the platform's opaque file handle — downloading happens
/// later via a `PlatformClient`, not at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    /// Platform-specific file id (Telegram `file_id`, WhatsApp media id, ...).
    pub file_id: String,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

/// Context carried when the inbound message is a reply to a previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyContext {
    pub replied_to_name: String,
    pub quoted_text: String,
}

/// The kind of content the message actually carries, used for WhatsApp's
/// "accept or reject" gate (spec.md §4.6 step 3) and for early-exit checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Document,
    Audio,
    Voice,
    Unsupported,
}

/// Platform-agnostic envelope produced by each platform's parser.
///
/// This is the single shape the message pipeline operates on — it never
/// branches on platform again after parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub platform: Platform,
    pub update_id: i64,
    pub chat_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub image: Option<MediaRef>,
    pub extra_images: Vec<MediaRef>,
    pub document: Option<MediaRef>,
    pub voice: Option<MediaRef>,
    pub reply_to: Option<ReplyContext>,
    pub media_group_id: Option<String>,
}

impl ParsedMessage {
    /// True when there is nothing actionable in the message (spec.md §4.6 step 4).
    pub fn is_empty(&self) -> bool {
        let has_text = self.text.as_deref().is_some_and(|t| !t.is_empty());
        let has_caption = self.caption.as_deref().is_some_and(|t| !t.is_empty());
        has_text.not()
            && has_caption.not()
            && self.image.is_none()
            && self.document.is_none()
            && self.voice.is_none()
    }
}

/// Small extension trait so `is_empty` above reads naturally; avoids pulling
/// in a crate just for boolean `.not()`.
trait BoolExt {
    fn not(self) -> bool;
}
impl BoolExt for bool {
    fn not(self) -> bool {
        !self
    }
}

/// The unit of per-conversation ordering (spec.md §3 "Chat queue key").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatQueueKey {
    pub bot_id: String,
    pub chat_id: String,
}

impl ChatQueueKey {
    pub fn new(bot_id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            chat_id: chat_id.into(),
        }
    }
}

impl fmt::Display for ChatQueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bot_id, self.chat_id)
    }
}

/// One row of conversation history (spec.md §3 "Conversation history row").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRow {
    pub id: i64,
    pub role: HistoryRole,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

impl fmt::Display for HistoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryRole::User => write!(f, "user"),
            HistoryRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Token-usage row persisted best-effort after each AI invocation
/// (spec.md §3 "Token usage row").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRow {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_parses_known_values() {
        assert_eq!("opus".parse::<Model>().unwrap(), Model::Opus);
        assert_eq!("sonnet".parse::<Model>().unwrap(), Model::Sonnet);
        assert_eq!("haiku".parse::<Model>().unwrap(), Model::Haiku);
    }

    #[test]
    fn model_rejects_unknown_value() {
        assert!("gpt4".parse::<Model>().is_err());
    }

    #[test]
    fn chat_queue_key_displays_as_pair() {
        let key = ChatQueueKey::new("b1", "999");
        assert_eq!(key.to_string(), "b1:999");
    }

    #[test]
    fn parsed_message_is_empty_with_no_content() {
        let msg = ParsedMessage {
            platform: Platform::Telegram,
            update_id: 1,
            chat_id: "1".into(),
            message_id: "1".into(),
            sender_id: "1".into(),
            kind: MessageKind::Text,
            text: None,
            caption: None,
            image: None,
            extra_images: vec![],
            document: None,
            voice: None,
            reply_to: None,
            media_group_id: None,
        };
        assert!(msg.is_empty());
    }

    #[test]
    fn parsed_message_not_empty_with_text() {
        let mut msg_empty = ParsedMessage {
            platform: Platform::Telegram,
            update_id: 1,
            chat_id: "1".into(),
            message_id: "1".into(),
            sender_id: "1".into(),
            kind: MessageKind::Text,
            text: None,
            caption: None,
            image: None,
            extra_images: vec![],
            document: None,
            voice: None,
            reply_to: None,
            media_group_id: None,
        };
        msg_empty.text = Some("hello".to_string());
        assert!(!msg_empty.is_empty());
    }
}
