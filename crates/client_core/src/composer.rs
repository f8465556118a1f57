//! The single active compose mode. Client-local; it only reaches the wire as
//! an annotation on the next send.

use shared::{domain::MessageId, protocol::OutboundEvent};

use crate::{
    encoder::{encode, LocalAction},
    error::StateError,
    store::ConversationStore,
};

const REPLY_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CompositionMode {
    #[default]
    Idle,
    ReplyingTo(MessageId),
    Editing(MessageId),
}

#[derive(Debug, Default)]
pub struct Composer {
    mode: CompositionMode,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> &CompositionMode {
        &self.mode
    }

    /// Switches to reply mode, discarding any edit in progress. Returns a short
    /// preview of the parent for the input hint.
    pub fn begin_reply(
        &mut self,
        store: &ConversationStore,
        id: &MessageId,
    ) -> Result<String, StateError> {
        let parent = store.live_message(id)?;
        let preview = parent.body.chars().take(REPLY_PREVIEW_CHARS).collect();
        self.mode = CompositionMode::ReplyingTo(id.clone());
        Ok(preview)
    }

    /// Switches to edit mode, discarding any reply in progress. Returns the
    /// current body to prefill the input.
    pub fn begin_edit(
        &mut self,
        store: &ConversationStore,
        id: &MessageId,
    ) -> Result<String, StateError> {
        let message = store.live_message(id)?;
        if !store.is_own(message) {
            return Err(StateError::NotAuthor(id.clone()));
        }
        let body = message.body.clone();
        self.mode = CompositionMode::Editing(id.clone());
        Ok(body)
    }

    /// Returns `true` if there was something to cancel.
    pub fn cancel(&mut self) -> bool {
        std::mem::take(&mut self.mode) != CompositionMode::Idle
    }

    /// Encodes a send under the current mode without leaving it. Call
    /// [`Composer::reset`] once the frame has actually gone out.
    pub fn draft(
        &self,
        text: &str,
        file_url: Option<String>,
        username: &str,
    ) -> Option<OutboundEvent> {
        let action = LocalAction::Send {
            text: text.to_string(),
            file_url,
        };
        encode(action, &self.mode, username)
    }

    /// [`Composer::draft`] followed by a reset when a frame was produced.
    pub fn submit(
        &mut self,
        text: &str,
        file_url: Option<String>,
        username: &str,
    ) -> Option<OutboundEvent> {
        let event = self.draft(text, file_url, username)?;
        self.mode = CompositionMode::Idle;
        Some(event)
    }

    pub fn reset(&mut self) {
        self.mode = CompositionMode::Idle;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::store::{LocalUser, Message};

    fn store_with(messages: &[(&str, &str, &str)]) -> ConversationStore {
        let mut store = ConversationStore::new(LocalUser::new("alice"), Duration::from_secs(1));
        for (id, author, body) in messages {
            store
                .apply_new_message(Message {
                    id: MessageId::new(*id),
                    author_id: None,
                    author_name: author.to_string(),
                    body: body.to_string(),
                    created_at: Utc::now(),
                    file_ref: None,
                    parent_id: None,
                    edited: false,
                    deleted: false,
                })
                .expect("insert");
        }
        store
    }

    #[test]
    fn reply_then_send_returns_to_idle() {
        let store = store_with(&[("1", "bob", "what time?")]);
        let mut composer = Composer::new();

        let preview = composer
            .begin_reply(&store, &MessageId::new("1"))
            .expect("reply");
        assert_eq!(preview, "what time?");
        assert_eq!(
            composer.mode(),
            &CompositionMode::ReplyingTo(MessageId::new("1"))
        );

        let event = composer.submit("noon", None, "alice").expect("event");
        assert!(matches!(event, OutboundEvent::Message { parent_id: Some(_), .. }));
        assert_eq!(composer.mode(), &CompositionMode::Idle);
    }

    #[test]
    fn reply_preview_is_truncated() {
        let long = "x".repeat(120);
        let store = store_with(&[("1", "bob", long.as_str())]);
        let mut composer = Composer::new();
        let preview = composer
            .begin_reply(&store, &MessageId::new("1"))
            .expect("reply");
        assert_eq!(preview.chars().count(), 50);
    }

    #[test]
    fn last_mode_wins_between_reply_and_edit() {
        let store = store_with(&[("1", "bob", "hi"), ("2", "alice", "helo")]);
        let mut composer = Composer::new();

        composer
            .begin_reply(&store, &MessageId::new("1"))
            .expect("reply");
        let body = composer
            .begin_edit(&store, &MessageId::new("2"))
            .expect("edit");
        assert_eq!(body, "helo");
        assert_eq!(composer.mode(), &CompositionMode::Editing(MessageId::new("2")));

        composer
            .begin_reply(&store, &MessageId::new("1"))
            .expect("reply");
        assert_eq!(
            composer.mode(),
            &CompositionMode::ReplyingTo(MessageId::new("1"))
        );
    }

    #[test]
    fn editing_someone_elses_message_is_rejected() {
        let store = store_with(&[("1", "bob", "hi")]);
        let mut composer = Composer::new();
        assert_eq!(
            composer.begin_edit(&store, &MessageId::new("1")),
            Err(StateError::NotAuthor(MessageId::new("1")))
        );
        assert_eq!(composer.mode(), &CompositionMode::Idle);
    }

    #[test]
    fn unknown_or_deleted_targets_leave_mode_unchanged() {
        let mut store = store_with(&[("1", "bob", "hi")]);
        store.apply_delete(&MessageId::new("1")).expect("delete");
        let mut composer = Composer::new();

        assert!(composer.begin_reply(&store, &MessageId::new("1")).is_err());
        assert!(composer.begin_reply(&store, &MessageId::new("9")).is_err());
        assert_eq!(composer.mode(), &CompositionMode::Idle);
    }

    #[test]
    fn suppressed_send_keeps_the_mode() {
        let store = store_with(&[("1", "bob", "hi")]);
        let mut composer = Composer::new();
        composer
            .begin_reply(&store, &MessageId::new("1"))
            .expect("reply");

        assert_eq!(composer.submit("   ", None, "alice"), None);
        assert!(matches!(composer.mode(), CompositionMode::ReplyingTo(_)));

        let drafted = composer.draft("later", None, "alice").expect("draft");
        assert!(matches!(drafted, OutboundEvent::Message { parent_id: Some(_), .. }));
        assert!(matches!(composer.mode(), CompositionMode::ReplyingTo(_)));
        assert!(composer.cancel());
        assert!(!composer.cancel());
    }
}
