use serde::{Deserialize, Serialize};

use crate::domain::{MessageId, PresenceStatus, UserId};

/// Frames the client writes to the room socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Message {
        message: String,
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
    },
    EditMessage {
        message: String,
        message_id: MessageId,
        username: String,
    },
    DeleteMessage {
        message_id: MessageId,
    },
    Reaction {
        message_id: MessageId,
        emoji: String,
    },
    ReadReceipt {
        message_id: MessageId,
    },
    Typing {
        username: String,
    },
    TypingStopped {
        username: String,
    },
}

impl OutboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Message { .. } => "message",
            OutboundEvent::EditMessage { .. } => "edit_message",
            OutboundEvent::DeleteMessage { .. } => "delete_message",
            OutboundEvent::Reaction { .. } => "reaction",
            OutboundEvent::ReadReceipt { .. } => "read_receipt",
            OutboundEvent::Typing { .. } => "typing",
            OutboundEvent::TypingStopped { .. } => "typing_stopped",
        }
    }
}

fn default_is_typing() -> bool {
    true
}

/// Frames the room broadcasts to every connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    ChatMessage {
        message_id: MessageId,
        message: String,
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    TypingStatus {
        user_id: UserId,
        username: String,
        #[serde(default = "default_is_typing")]
        is_typing: bool,
    },
    MessageReaction {
        message_id: MessageId,
        emoji: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    ReadReceipt {
        message_id: MessageId,
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    UserStatus {
        user_id: UserId,
        status: PresenceStatus,
    },
    MessageEdit {
        message_id: MessageId,
        message: String,
    },
    MessageDelete {
        message_id: MessageId,
    },
    /// Any `type` this client does not know about yet.
    #[serde(other)]
    Unrecognized,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::ChatMessage { .. } => "chat_message",
            InboundEvent::TypingStatus { .. } => "typing_status",
            InboundEvent::MessageReaction { .. } => "message_reaction",
            InboundEvent::ReadReceipt { .. } => "read_receipt",
            InboundEvent::UserStatus { .. } => "user_status",
            InboundEvent::MessageEdit { .. } => "message_edit",
            InboundEvent::MessageDelete { .. } => "message_delete",
            InboundEvent::Unrecognized => "unrecognized",
        }
    }
}
