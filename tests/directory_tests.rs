// Contact directory tests
// Cover unread counters, the display cap, pair:new handling and the
// debounced search.

mod common;
use common::{paired_client, setup_logging, test_client};

use std::time::Duration;

use tokio::time::advance;

use base64::Engine;

use parley::directory::filter_entries;
use parley::models::{Contact, ContactEntry, SharedKey, SHARED_KEY_SIZE, UNREAD_DISPLAY_CAP};
use parley::transport::{ContactRecord, PushEvent};

fn entry(id: &str, username: &str) -> ContactEntry {
    ContactEntry::new(Contact::new(
        id,
        username,
        SharedKey::from_bytes([0u8; SHARED_KEY_SIZE]),
    ))
}

#[tokio::test]
async fn test_unread_is_zero_exactly_while_active() {
    let (mut client, backend, card, _search_rx) = paired_client("alice").await;

    client.open_conversation(&card.id).await.unwrap();
    assert_eq!(client.active_conversation(), Some(card.id.as_str()));
    assert_eq!(client.directory.contacts().await[0].unread, 0);

    // While active, live messages merge into the buffer and never count
    let incoming = backend.push_incoming(&card.id, "one").await;
    client
        .handle_push(PushEvent::MsgNew {
            peer_id: card.id.clone(),
            message: incoming,
        })
        .await;
    assert_eq!(client.directory.contacts().await[0].unread, 0);

    // Inactive: the counter is non-decreasing as messages arrive
    client.close_conversation().await;
    assert_eq!(client.active_conversation(), None);
    for body in ["two", "three", "four"] {
        let incoming = backend.push_incoming(&card.id, body).await;
        client
            .handle_push(PushEvent::MsgNew {
                peer_id: card.id.clone(),
                message: incoming,
            })
            .await;
    }
    assert_eq!(client.directory.contacts().await[0].unread, 3);

    // Opening the conversation resets it to zero
    client.open_conversation(&card.id).await.unwrap();
    assert_eq!(client.directory.contacts().await[0].unread, 0);
}

#[tokio::test]
async fn test_unread_display_cap_only_affects_rendering() {
    let (client, _backend, card, _search_rx) = paired_client("alice").await;

    for _ in 0..150 {
        client.directory.on_msg_new(&card.id).await;
    }

    assert_eq!(client.directory.contacts().await[0].unread, UNREAD_DISPLAY_CAP);
    let entries = client.directory.entries().await;
    assert_eq!(entries[0].unread(), 150);
}

#[tokio::test]
async fn test_message_for_unknown_contact_is_swallowed() {
    let (client, _backend, _search_rx) = test_client("alice");
    assert!(!client.directory.on_msg_new("nobody").await);
    assert!(client.directory.contacts().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_pair_new_is_ignored() {
    let (client, _backend, card, _search_rx) = paired_client("alice").await;

    let duplicate = Contact::new(
        card.id.clone(),
        "imposter",
        SharedKey::from_bytes([9u8; SHARED_KEY_SIZE]),
    );
    client.directory.on_pair_new(duplicate).await;

    let contacts = client.directory.contacts().await;
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].username, "remote");
}

#[tokio::test(start_paused = true)]
async fn test_debounced_search_keeps_only_the_last_call() {
    let (client, _backend, _card, mut search_rx) = paired_client("alice").await;

    // A burst of keystrokes: only the final term is evaluated
    client.directory.search("r").await;
    advance(Duration::from_millis(100)).await;
    client.directory.search("re").await;
    advance(Duration::from_millis(100)).await;
    client.directory.search("nomatch").await;

    advance(Duration::from_millis(300)).await;
    tokio::task::yield_now().await;

    let results = search_rx.recv().await.unwrap();
    assert!(results.is_empty(), "only the last term should be evaluated");
    assert!(
        search_rx.try_recv().is_err(),
        "earlier evaluations must have been cancelled"
    );

    // A later search still works
    client.directory.search("remote").await;
    advance(Duration::from_millis(300)).await;
    tokio::task::yield_now().await;
    let results = search_rx.recv().await.unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn test_filter_matches_username_and_id() {
    setup_logging();
    let entries = vec![
        entry("7f3a", "Alice"),
        entry("9b2c", "bob"),
        entry("c4d1", "Carol"),
    ];

    // Case-insensitive over username
    let hits = filter_entries(&entries, "ALI");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].username, "Alice");

    // Substring over id
    let hits = filter_entries(&entries, "b2");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "9b2c");

    // Blank matches everything
    assert_eq!(filter_entries(&entries, "  ").len(), 3);

    // No match
    assert!(filter_entries(&entries, "zzz").is_empty());
}

#[tokio::test]
async fn test_persisted_contacts_load_at_startup() {
    let (client, backend, _search_rx) = test_client("alice");

    let key = [3u8; SHARED_KEY_SIZE];
    backend
        .insert_contact_record(ContactRecord {
            id: "peer-9".to_string(),
            username: "carol".to_string(),
            shared_key: base64::engine::general_purpose::STANDARD.encode(key),
        })
        .await;
    backend.install_key("peer-9", key).await;
    client.startup().await;

    let contacts = client.directory.contacts().await;
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].username, "carol");

    // The loaded contact behaves like any freshly paired one
    let incoming = backend.push_incoming("peer-9", "hello again").await;
    client
        .handle_push(PushEvent::MsgNew {
            peer_id: "peer-9".to_string(),
            message: incoming,
        })
        .await;
    assert_eq!(client.directory.contacts().await[0].unread, 1);
}

#[tokio::test]
async fn test_sync_progress_is_mirrored_on_the_entry() {
    let (mut client, backend, card, _search_rx) = paired_client("alice").await;
    backend.seed_history(&card.id, &["one", "two"]).await;

    client.open_conversation(&card.id).await.unwrap();

    let entries = client.directory.entries().await;
    assert_eq!(entries[0].last_sync_cursor, Some(1));
    assert!(entries[0].has_more_history);
}
