//! Decodes inbound frames and applies them to the store, one at a time.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use shared::{domain::MessageId, protocol::InboundEvent};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    error::ProtocolError,
    store::{Applied, ConversationStore, Message, StoreChange},
};

/// What a single inbound frame did to the store.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub changes: Vec<StoreChange>,
    /// Newly inserted messages the local user should acknowledge.
    pub read_receipts: Vec<MessageId>,
}

#[derive(Deserialize)]
struct KindProbe {
    #[serde(rename = "type")]
    kind: String,
}

pub fn decode_frame(raw: &str) -> Result<InboundEvent, ProtocolError> {
    serde_json::from_str(raw).map_err(|err| ProtocolError::Malformed(err.to_string()))
}

/// Decodes and applies one raw frame. Malformed frames and unknown kinds never
/// reach the store.
pub fn route_frame(store: &mut ConversationStore, raw: &str, now: Instant) -> Dispatch {
    match decode_frame(raw) {
        Ok(InboundEvent::Unrecognized) => {
            let kind = serde_json::from_str::<KindProbe>(raw)
                .map(|probe| probe.kind)
                .unwrap_or_default();
            debug!(%kind, "ignoring unrecognized inbound event");
            Dispatch::default()
        }
        Ok(event) => apply_event(store, event, now),
        Err(err) => {
            warn!(error = %err, frame_len = raw.len(), "dropping inbound frame");
            Dispatch::default()
        }
    }
}

pub fn apply_event(store: &mut ConversationStore, event: InboundEvent, now: Instant) -> Dispatch {
    let kind = event.kind();
    let mut dispatch = Dispatch::default();

    let applied: Applied = match event {
        InboundEvent::ChatMessage {
            message_id,
            message,
            username,
            user_id,
            parent_id,
            file_url,
            timestamp,
        } => store.apply_new_message(Message {
            id: message_id,
            author_id: user_id,
            author_name: username,
            body: message,
            created_at: parse_timestamp(timestamp.as_deref()),
            file_ref: file_url.filter(|url| !url.is_empty()),
            parent_id,
            edited: false,
            deleted: false,
        }),
        InboundEvent::TypingStatus {
            user_id,
            username,
            is_typing,
        } => store.apply_typing_status(&user_id, &username, is_typing, now),
        InboundEvent::MessageReaction {
            message_id, emoji, ..
        } => store.apply_reaction(&message_id, &emoji),
        InboundEvent::ReadReceipt {
            message_id,
            user_id,
            username,
        } => store.apply_read_receipt(&message_id, &user_id, username.as_deref()),
        InboundEvent::UserStatus { user_id, status } => store.apply_presence(&user_id, status),
        InboundEvent::MessageEdit {
            message_id,
            message,
        } => store.apply_edit(&message_id, message),
        InboundEvent::MessageDelete { message_id } => store.apply_delete(&message_id),
        InboundEvent::Unrecognized => Ok(None),
    };

    match applied {
        Ok(Some(change)) => {
            if let StoreChange::MessageInserted(id) = &change {
                dispatch.read_receipts.push(id.clone());
            }
            dispatch.changes.push(change);
        }
        Ok(None) => debug!(kind, "inbound event was a no-op"),
        Err(err) => debug!(kind, error = %err, "inbound event dropped"),
    }

    dispatch
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return Utc::now();
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
