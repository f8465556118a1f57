//! Client-side view of one room: messages, reactions, read receipts,
//! presence and remote typing indicators.
//!
//! Every mutation is synchronous and leaves the store consistent no matter the
//! order events arrive in. Mutations that reference a message the store has
//! never seen are dropped with a [`StateError`] rather than deferred.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use chrono::{DateTime, Utc};
use shared::domain::{MessageId, PresenceStatus, UserId};
use tokio::time::Instant;

use crate::error::StateError;

/// Outcome of a store mutation. `Ok(None)` is an idempotent no-op.
pub type Applied = Result<Option<StoreChange>, StateError>;

/// Identity of the user running this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub username: String,
    pub user_id: Option<UserId>,
}

impl LocalUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn is(&self, user_id: Option<&UserId>, username: Option<&str>) -> bool {
        let id_matches = matches!((&self.user_id, user_id), (Some(own), Some(other)) if own == other);
        id_matches || username == Some(self.username.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub author_id: Option<UserId>,
    pub author_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub file_ref: Option<String>,
    pub parent_id: Option<MessageId>,
    pub edited: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionAggregate {
    pub emoji: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub username: Option<String>,
}

/// Actions the UI may offer for a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Affordances {
    pub reply: bool,
    pub react: bool,
    pub edit: bool,
    pub delete: bool,
}

#[derive(Debug, Clone)]
struct TypingIndicator {
    username: String,
    expires_at: Instant,
}

/// Change notifications handed to the rendering collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    MessageInserted(MessageId),
    MessageEdited(MessageId),
    MessageDeleted(MessageId),
    ReactionChanged {
        message_id: MessageId,
        emoji: String,
        count: u32,
    },
    ReceiptAdded {
        message_id: MessageId,
        user_id: UserId,
    },
    PresenceChanged {
        user_id: UserId,
        status: PresenceStatus,
    },
    TypingChanged {
        user_id: UserId,
        username: String,
        is_typing: bool,
    },
    /// Presence and typing were dropped after a reconnect.
    StaleStateCleared,
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    local: LocalUser,
    typing_linger: Duration,
    order: Vec<MessageId>,
    messages: HashMap<MessageId, Message>,
    reactions: HashMap<MessageId, BTreeMap<String, u32>>,
    receipts: HashMap<MessageId, BTreeMap<UserId, Option<String>>>,
    presence: HashMap<UserId, PresenceStatus>,
    typing: HashMap<UserId, TypingIndicator>,
}

impl ConversationStore {
    pub fn new(local: LocalUser, typing_linger: Duration) -> Self {
        Self {
            local,
            typing_linger,
            order: Vec::new(),
            messages: HashMap::new(),
            reactions: HashMap::new(),
            receipts: HashMap::new(),
            presence: HashMap::new(),
            typing: HashMap::new(),
        }
    }

    pub fn local_user(&self) -> &LocalUser {
        &self.local
    }

    pub fn apply_new_message(&mut self, message: Message) -> Applied {
        if self.messages.contains_key(&message.id) {
            return Ok(None);
        }
        let id = message.id.clone();
        self.order.push(id.clone());
        self.messages.insert(id.clone(), message);
        Ok(Some(StoreChange::MessageInserted(id)))
    }

    pub fn apply_edit(&mut self, id: &MessageId, body: impl Into<String>) -> Applied {
        let message = self.live_message_mut(id)?;
        message.body = body.into();
        message.edited = true;
        Ok(Some(StoreChange::MessageEdited(id.clone())))
    }

    /// Tombstones the message. It stays in the store so replies keep a parent.
    pub fn apply_delete(&mut self, id: &MessageId) -> Applied {
        let message = self
            .messages
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownMessage(id.clone()))?;
        if message.deleted {
            return Ok(None);
        }
        message.deleted = true;
        message.body.clear();
        message.file_ref = None;
        self.reactions.remove(id);
        Ok(Some(StoreChange::MessageDeleted(id.clone())))
    }

    /// Reactor identity is not tracked: a repeated reaction from the same user
    /// increments the count again.
    pub fn apply_reaction(&mut self, id: &MessageId, emoji: &str) -> Applied {
        self.live_message_mut(id)?;
        let count = self
            .reactions
            .entry(id.clone())
            .or_default()
            .entry(emoji.to_string())
            .or_insert(0);
        *count = count.saturating_add(1);
        Ok(Some(StoreChange::ReactionChanged {
            message_id: id.clone(),
            emoji: emoji.to_string(),
            count: *count,
        }))
    }

    pub fn apply_read_receipt(
        &mut self,
        id: &MessageId,
        user_id: &UserId,
        username: Option<&str>,
    ) -> Applied {
        if !self.messages.contains_key(id) {
            return Err(StateError::UnknownMessage(id.clone()));
        }
        let receipts = self.receipts.entry(id.clone()).or_default();
        if receipts.contains_key(user_id) {
            return Ok(None);
        }
        receipts.insert(user_id.clone(), username.map(str::to_string));
        Ok(Some(StoreChange::ReceiptAdded {
            message_id: id.clone(),
            user_id: user_id.clone(),
        }))
    }

    /// Last write wins; presence updates carry no ordering information.
    pub fn apply_presence(&mut self, user_id: &UserId, status: PresenceStatus) -> Applied {
        if self.presence.insert(user_id.clone(), status) == Some(status) {
            return Ok(None);
        }
        Ok(Some(StoreChange::PresenceChanged {
            user_id: user_id.clone(),
            status,
        }))
    }

    /// Remote users only. Each `typing` refreshes the linger deadline.
    pub fn apply_typing_status(
        &mut self,
        user_id: &UserId,
        username: &str,
        is_typing: bool,
        now: Instant,
    ) -> Applied {
        if self.local.is(Some(user_id), Some(username)) {
            return Ok(None);
        }

        if !is_typing {
            return Ok(self.typing.remove(user_id).map(|entry| StoreChange::TypingChanged {
                user_id: user_id.clone(),
                username: entry.username,
                is_typing: false,
            }));
        }

        let previous = self.typing.insert(
            user_id.clone(),
            TypingIndicator {
                username: username.to_string(),
                expires_at: now + self.typing_linger,
            },
        );
        if previous.is_some() {
            return Ok(None);
        }
        Ok(Some(StoreChange::TypingChanged {
            user_id: user_id.clone(),
            username: username.to_string(),
            is_typing: true,
        }))
    }

    /// Clears every remote typing indicator whose linger has run out.
    pub fn expire_typing(&mut self, now: Instant) -> Vec<StoreChange> {
        let expired: Vec<UserId> = self
            .typing
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(user_id, _)| user_id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|user_id| {
                self.typing
                    .remove(&user_id)
                    .map(|entry| StoreChange::TypingChanged {
                        user_id,
                        username: entry.username,
                        is_typing: false,
                    })
            })
            .collect()
    }

    pub fn next_typing_expiry(&self) -> Option<Instant> {
        self.typing.values().map(|entry| entry.expires_at).min()
    }

    /// There is no snapshot resync, so presence and typing cannot be trusted
    /// after the connection is re-established.
    pub fn clear_stale(&mut self) -> Option<StoreChange> {
        if self.presence.is_empty() && self.typing.is_empty() {
            return None;
        }
        self.presence.clear();
        self.typing.clear();
        Some(StoreChange::StaleStateCleared)
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Messages in arrival order, tombstones included.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.order.iter().filter_map(|id| self.messages.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn last_seen_id(&self) -> Option<&MessageId> {
        self.order.last()
    }

    pub fn reactions(&self, id: &MessageId) -> Vec<ReactionAggregate> {
        self.reactions
            .get(id)
            .map(|by_emoji| {
                by_emoji
                    .iter()
                    .map(|(emoji, count)| ReactionAggregate {
                        emoji: emoji.clone(),
                        count: *count,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn reaction_count(&self, id: &MessageId, emoji: &str) -> u32 {
        self.reactions
            .get(id)
            .and_then(|by_emoji| by_emoji.get(emoji))
            .copied()
            .unwrap_or(0)
    }

    pub fn receipts(&self, id: &MessageId) -> Vec<ReadReceipt> {
        self.receipts
            .get(id)
            .map(|by_user| {
                by_user
                    .iter()
                    .map(|(user_id, username)| ReadReceipt {
                        user_id: user_id.clone(),
                        username: username.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn presence(&self, user_id: &UserId) -> Option<PresenceStatus> {
        self.presence.get(user_id).copied()
    }

    /// Usernames currently shown as typing, sorted for stable display.
    pub fn typing_users(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .typing
            .values()
            .map(|entry| entry.username.clone())
            .collect();
        names.sort();
        names
    }

    pub fn affordances(&self, id: &MessageId) -> Affordances {
        let Some(message) = self.messages.get(id) else {
            return Affordances::default();
        };
        if message.deleted {
            return Affordances::default();
        }
        let own = self.is_own(message);
        Affordances {
            reply: true,
            react: true,
            edit: own,
            delete: own,
        }
    }

    pub fn is_own(&self, message: &Message) -> bool {
        self.local
            .is(message.author_id.as_ref(), Some(message.author_name.as_str()))
    }

    /// Looks up a message that can still be edited or reacted to.
    pub fn live_message(&self, id: &MessageId) -> Result<&Message, StateError> {
        let message = self
            .messages
            .get(id)
            .ok_or_else(|| StateError::UnknownMessage(id.clone()))?;
        if message.deleted {
            return Err(StateError::MessageDeleted(id.clone()));
        }
        Ok(message)
    }

    fn live_message_mut(&mut self, id: &MessageId) -> Result<&mut Message, StateError> {
        let message = self
            .messages
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownMessage(id.clone()))?;
        if message.deleted {
            return Err(StateError::MessageDeleted(id.clone()));
        }
        Ok(message)
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
