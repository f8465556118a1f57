//! Maps local user actions onto wire events. Pure: no I/O, no state of its own.

use shared::{domain::MessageId, protocol::OutboundEvent};

use crate::composer::CompositionMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAction {
    Send {
        text: String,
        file_url: Option<String>,
    },
    /// Posted once the upload collaborator has returned a URL.
    ShareFile {
        filename: String,
        file_url: String,
    },
    TypingStarted,
    TypingStopped,
    React {
        message_id: MessageId,
        emoji: String,
    },
    /// Only issued after the user confirmed the deletion.
    Delete {
        message_id: MessageId,
    },
    MarkRead {
        message_id: MessageId,
    },
}

/// Returns `None` when the action produces nothing to send.
pub fn encode(action: LocalAction, mode: &CompositionMode, username: &str) -> Option<OutboundEvent> {
    let username = username.to_string();
    match action {
        LocalAction::Send { text, file_url } => encode_send(&text, file_url, mode, username),
        LocalAction::ShareFile { filename, file_url } => Some(OutboundEvent::Message {
            message: format!("Shared a file: {filename}"),
            username,
            parent_id: None,
            file_url: Some(file_url),
        }),
        LocalAction::TypingStarted => Some(OutboundEvent::Typing { username }),
        LocalAction::TypingStopped => Some(OutboundEvent::TypingStopped { username }),
        LocalAction::React { message_id, emoji } => {
            Some(OutboundEvent::Reaction { message_id, emoji })
        }
        LocalAction::Delete { message_id } => Some(OutboundEvent::DeleteMessage { message_id }),
        LocalAction::MarkRead { message_id } => Some(OutboundEvent::ReadReceipt { message_id }),
    }
}

fn encode_send(
    text: &str,
    file_url: Option<String>,
    mode: &CompositionMode,
    username: String,
) -> Option<OutboundEvent> {
    let message = text.trim().to_string();
    let file_url = file_url.filter(|url| !url.trim().is_empty());
    if message.is_empty() && file_url.is_none() {
        return None;
    }

    match mode {
        // An edit replaces the body only; an empty body would be a delete in disguise.
        CompositionMode::Editing(message_id) => (!message.is_empty()).then(|| {
            OutboundEvent::EditMessage {
                message,
                message_id: message_id.clone(),
                username,
            }
        }),
        CompositionMode::ReplyingTo(parent_id) => Some(OutboundEvent::Message {
            message,
            username,
            parent_id: Some(parent_id.clone()),
            file_url,
        }),
        CompositionMode::Idle => Some(OutboundEvent::Message {
            message,
            username,
            parent_id: None,
            file_url,
        }),
    }
}
