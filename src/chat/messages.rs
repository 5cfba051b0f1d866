//! Chat frame types
//!
//! Field names follow what the chat backend emits on `/ws/chat/<id>/`.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub type MessageId = i64;
pub type UserId = i64;

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Post a new message to the conversation
#[derive(Debug, Clone, Serialize)]
pub struct PostMessagePayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub content: String,
}

impl PostMessagePayload {
    pub fn new(content: String) -> Self {
        Self {
            msg_type: "message",
            content,
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// `chat_message`: a message was posted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PostedMessageFrame")]
pub struct PostedMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub filename: Option<String>,
    pub sticker_url: Option<String>,
    pub timestamp: String,
}

/// `chat_message` as received; the id comes as `id`, `message_id` or both
#[derive(Deserialize)]
struct PostedMessageFrame {
    id: Option<MessageId>,
    message_id: Option<MessageId>,
    sender_id: UserId,
    sender_name: String,
    sender_avatar: Option<String>,
    content: Option<String>,
    file_url: Option<String>,
    filename: Option<String>,
    sticker_url: Option<String>,
    timestamp: String,
}

impl TryFrom<PostedMessageFrame> for PostedMessage {
    type Error = &'static str;

    fn try_from(frame: PostedMessageFrame) -> Result<Self, Self::Error> {
        let id = frame.id.or(frame.message_id).ok_or("missing message id")?;
        Ok(Self {
            id,
            sender_id: frame.sender_id,
            sender_name: frame.sender_name,
            sender_avatar: frame.sender_avatar,
            content: frame.content,
            file_url: frame.file_url,
            filename: frame.filename,
            sticker_url: frame.sticker_url,
            timestamp: frame.timestamp,
        })
    }
}

/// What a posted message shows, in display precedence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Sticker { url: String },
    File { url: String, name: String },
    Text(String),
}

impl PostedMessage {
    pub fn is_own(&self, current_user_id: Option<UserId>) -> bool {
        current_user_id == Some(self.sender_id)
    }

    /// Sticker wins over file, file over text
    pub fn body(&self) -> MessageBody {
        if let Some(url) = &self.sticker_url {
            return MessageBody::Sticker { url: url.clone() };
        }
        if let Some(url) = &self.file_url {
            return MessageBody::File {
                url: url.clone(),
                name: self.filename.clone().unwrap_or_else(|| "File".to_string()),
            };
        }
        MessageBody::Text(self.content.clone().unwrap_or_default())
    }

    /// Accepts RFC 3339 as well as the backend's `YYYY-MM-DD HH:MM:SS[.f]+HH:MM`
    pub fn timestamp_parsed(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .or_else(|_| DateTime::parse_from_str(&self.timestamp, "%Y-%m-%d %H:%M:%S%.f%:z"))
            .ok()
    }

    /// `HH:MM` for the message bubble
    pub fn display_time(&self) -> Option<String> {
        self.timestamp_parsed()
            .map(|ts| ts.format("%H:%M").to_string())
    }
}

/// `edit_message`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EditedMessage {
    pub id: MessageId,
    pub content: String,
}

/// `delete_message`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeletedMessage {
    pub id: MessageId,
}

/// `pin_message`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PinnedMessage {
    pub message_id: MessageId,
    pub content: String,
}

/// `unpin_message`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnpinnedMessage {}
