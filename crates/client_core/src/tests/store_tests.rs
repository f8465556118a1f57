use super::*;

fn store() -> ConversationStore {
    ConversationStore::new(
        LocalUser::new("alice").with_user_id(UserId::new("1")),
        Duration::from_millis(1000),
    )
}

fn message(id: &str, author: &str) -> Message {
    Message {
        id: MessageId::new(id),
        author_id: None,
        author_name: author.to_string(),
        body: format!("body of {id}"),
        created_at: Utc::now(),
        file_ref: None,
        parent_id: None,
        edited: false,
        deleted: false,
    }
}

#[test]
fn duplicate_delivery_inserts_once() {
    let mut store = store();
    let first = store.apply_new_message(message("5", "bob")).expect("insert");
    let second = store.apply_new_message(message("5", "bob")).expect("dup");

    assert_eq!(first, Some(StoreChange::MessageInserted(MessageId::new("5"))));
    assert_eq!(second, None);
    assert_eq!(store.len(), 1);
}

#[test]
fn repeated_reactions_increment_the_count() {
    let mut store = store();
    store.apply_new_message(message("5", "bob")).expect("insert");
    let id = MessageId::new("5");

    for _ in 0..4 {
        store.apply_reaction(&id, "👍").expect("reaction");
    }
    store.apply_reaction(&id, "🎉").expect("reaction");

    assert_eq!(store.reaction_count(&id, "👍"), 4);
    assert_eq!(
        store.reactions(&id),
        vec![
            ReactionAggregate {
                emoji: "🎉".into(),
                count: 1
            },
            ReactionAggregate {
                emoji: "👍".into(),
                count: 4
            },
        ]
    );
}

#[test]
fn read_receipts_are_idempotent() {
    let mut store = store();
    store.apply_new_message(message("5", "bob")).expect("insert");
    let id = MessageId::new("5");
    let bob = UserId::new("2");

    let first = store
        .apply_read_receipt(&id, &bob, Some("bob"))
        .expect("receipt");
    let second = store
        .apply_read_receipt(&id, &bob, Some("bob"))
        .expect("receipt");

    assert!(first.is_some());
    assert_eq!(second, None);
    assert_eq!(store.receipts(&id).len(), 1);
}

#[test]
fn mutations_on_unknown_messages_leave_the_store_untouched() {
    let mut store = store();
    store.apply_new_message(message("5", "bob")).expect("insert");
    let before = format!("{:?}", store.messages().collect::<Vec<_>>());
    let ghost = MessageId::new("99");

    assert_eq!(
        store.apply_edit(&ghost, "x"),
        Err(StateError::UnknownMessage(ghost.clone()))
    );
    assert_eq!(
        store.apply_delete(&ghost),
        Err(StateError::UnknownMessage(ghost.clone()))
    );
    assert_eq!(
        store.apply_reaction(&ghost, "👍"),
        Err(StateError::UnknownMessage(ghost.clone()))
    );
    assert!(store
        .apply_read_receipt(&ghost, &UserId::new("2"), None)
        .is_err());

    assert_eq!(before, format!("{:?}", store.messages().collect::<Vec<_>>()));
    assert!(store.reactions(&ghost).is_empty());
    assert!(store.receipts(&ghost).is_empty());
}

#[test]
fn message_lifecycle_ends_in_a_retained_tombstone() {
    let mut store = store();
    let id = MessageId::new("5");
    store.apply_new_message(message("5", "bob")).expect("insert");
    store.apply_reaction(&id, "👍").expect("reaction");

    store.apply_edit(&id, "hi there").expect("edit");
    let edited = store.message(&id).expect("message");
    assert_eq!(edited.body, "hi there");
    assert!(edited.edited);
    assert!(!edited.deleted);

    let change = store.apply_delete(&id).expect("delete");
    assert_eq!(change, Some(StoreChange::MessageDeleted(id.clone())));
    let tombstone = store.message(&id).expect("tombstone retained");
    assert!(tombstone.deleted);
    assert!(tombstone.body.is_empty());
    assert!(store.reactions(&id).is_empty());
    assert_eq!(store.affordances(&id), Affordances::default());
    assert_eq!(store.len(), 1);

    assert_eq!(store.apply_delete(&id), Ok(None));
    assert_eq!(
        store.apply_reaction(&id, "👍"),
        Err(StateError::MessageDeleted(id.clone()))
    );
    assert_eq!(
        store.apply_edit(&id, "resurrect"),
        Err(StateError::MessageDeleted(id))
    );
}

#[test]
fn replies_keep_their_parent_after_it_is_deleted() {
    let mut store = store();
    store.apply_new_message(message("1", "bob")).expect("insert");
    let mut reply = message("2", "carol");
    reply.parent_id = Some(MessageId::new("1"));
    store.apply_new_message(reply).expect("insert");

    store.apply_delete(&MessageId::new("1")).expect("delete");

    let parent_id = store
        .message(&MessageId::new("2"))
        .and_then(|m| m.parent_id.clone())
        .expect("parent id");
    assert!(store.message(&parent_id).is_some());
}

#[test]
fn edit_and_delete_are_only_offered_for_own_messages() {
    let mut store = store();
    store.apply_new_message(message("1", "alice")).expect("insert");
    store.apply_new_message(message("2", "bob")).expect("insert");

    let own = store.affordances(&MessageId::new("1"));
    assert!(own.edit && own.delete && own.reply && own.react);

    let theirs = store.affordances(&MessageId::new("2"));
    assert!(theirs.reply && theirs.react);
    assert!(!theirs.edit && !theirs.delete);
}

#[test]
fn presence_is_last_write_wins() {
    let mut store = store();
    let bob = UserId::new("2");

    assert!(store
        .apply_presence(&bob, PresenceStatus::Online)
        .expect("presence")
        .is_some());
    assert_eq!(
        store.apply_presence(&bob, PresenceStatus::Online),
        Ok(None)
    );
    store
        .apply_presence(&bob, PresenceStatus::Offline)
        .expect("presence");
    assert_eq!(store.presence(&bob), Some(PresenceStatus::Offline));
}

#[test]
fn own_typing_echoes_are_ignored() {
    let mut store = store();
    let now = Instant::now();

    assert_eq!(
        store.apply_typing_status(&UserId::new("1"), "alice", true, now),
        Ok(None)
    );
    assert_eq!(
        store.apply_typing_status(&UserId::new("77"), "alice", true, now),
        Ok(None)
    );
    assert!(store.typing_users().is_empty());
}

#[test]
fn remote_typing_lingers_then_expires() {
    let mut store = store();
    let bob = UserId::new("2");
    let start = Instant::now();

    let change = store
        .apply_typing_status(&bob, "bob", true, start)
        .expect("typing");
    assert!(matches!(
        change,
        Some(StoreChange::TypingChanged {
            is_typing: true,
            ..
        })
    ));

    let refreshed_at = start + Duration::from_millis(600);
    assert_eq!(
        store.apply_typing_status(&bob, "bob", true, refreshed_at),
        Ok(None)
    );
    assert_eq!(
        store.next_typing_expiry(),
        Some(refreshed_at + Duration::from_millis(1000))
    );

    assert!(store
        .expire_typing(start + Duration::from_millis(1000))
        .is_empty());
    let expired = store.expire_typing(refreshed_at + Duration::from_millis(1000));
    assert_eq!(
        expired,
        vec![StoreChange::TypingChanged {
            user_id: bob,
            username: "bob".into(),
            is_typing: false,
        }]
    );
    assert!(store.typing_users().is_empty());
}

#[test]
fn clear_stale_drops_presence_and_typing_but_keeps_messages() {
    let mut store = store();
    store.apply_new_message(message("5", "bob")).expect("insert");
    store
        .apply_presence(&UserId::new("2"), PresenceStatus::Online)
        .expect("presence");
    store
        .apply_typing_status(&UserId::new("2"), "bob", true, Instant::now())
        .expect("typing");

    assert_eq!(store.clear_stale(), Some(StoreChange::StaleStateCleared));
    assert_eq!(store.presence(&UserId::new("2")), None);
    assert!(store.typing_users().is_empty());
    assert_eq!(store.len(), 1);
    assert_eq!(store.clear_stale(), None);
}
