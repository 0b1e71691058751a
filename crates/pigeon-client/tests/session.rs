//! Whole-session scenarios: two clients, one shared remote store, one
//! shared presence store, and a simulated network link.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use pigeon_client::{
    ChatSession, ConversationId, DeliveryStatus, Message, MessageBody, MessageId, NetStatus,
    PresenceView, SessionConfig, UserId,
};
use pigeon_presence::testing::InMemoryPresence;
use pigeon_sync::testing::{test_users, InMemoryRemote};
use pigeon_sync::DocPath;

fn config(user: &UserId, dir: &tempfile::TempDir) -> SessionConfig {
    let mut cfg = SessionConfig::new(user.clone());
    cfg.db_path = Some(dir.path().join(format!("{user}.db")));
    cfg.heartbeat_interval = Duration::from_millis(20);
    cfg.staleness_threshold = Duration::from_millis(200);
    cfg
}

async fn session(
    user: &UserId,
    dir: &tempfile::TempDir,
    remote: &InMemoryRemote,
    presence: &InMemoryPresence,
    net_tx: &watch::Sender<NetStatus>,
) -> ChatSession {
    ChatSession::start(
        config(user, dir),
        Arc::new(remote.clone()),
        Arc::new(presence.clone()),
        net_tx.subscribe(),
    )
    .await
    .unwrap()
}

/// Poll a session's local cache until the message reaches `expected`.
async fn wait_for_status(
    session: &ChatSession,
    conv: &ConversationId,
    id: MessageId,
    expected: DeliveryStatus,
) -> Message {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let messages = session.local_messages(conv.clone()).await.unwrap();
        if let Some(msg) = messages.iter().find(|m| m.id == id) {
            if msg.status == expected {
                return msg.clone();
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "message {id} never reached {expected}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn remote_unread(remote: &InMemoryRemote, conv: &ConversationId, user: &UserId) -> i64 {
    remote
        .raw_doc(&DocPath::Conversation(conv.clone()))
        .and_then(|f| {
            f.get("unread")
                .and_then(Value::as_object)
                .and_then(|m| m.get(user.as_str()))
                .and_then(Value::as_i64)
        })
        .unwrap_or(0)
}

async fn wait_for_unread(remote: &InMemoryRemote, conv: &ConversationId, user: &UserId, expected: i64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while remote_unread(remote, conv, user) != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "unread counter for {user} never reached {expected}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn offline_send_reaches_read_after_reconnect() {
    let remote = InMemoryRemote::new();
    let presence = InMemoryPresence::new();
    let (net_tx, _net_rx) = watch::channel(NetStatus::ONLINE);
    let (alice, bob) = test_users();
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();

    let alice_session = session(&alice, &alice_dir, &remote, &presence, &net_tx).await;
    let bob_session = session(&bob, &bob_dir, &remote, &presence, &net_tx).await;

    let conv = alice_session.ensure_direct_conversation(&bob).await.unwrap();

    let noop: pigeon_client::MessagesCallback = Arc::new(|_| {});
    alice_session.subscribe_conversation(conv.id.clone(), noop.clone());
    bob_session.subscribe_conversation(conv.id.clone(), noop);
    bob_session.set_focused(&conv.id, true).await.unwrap();

    // The link goes down.
    remote.set_online(false);
    net_tx.send(NetStatus::OFFLINE).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The send still returns instantly, queued locally.
    let msg = alice_session
        .send(conv.id.clone(), MessageBody::Text("are you there?".into()))
        .await
        .unwrap();
    assert_eq!(msg.status, DeliveryStatus::Sending);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(remote
        .raw_doc(&DocPath::Message(conv.id.clone(), msg.id))
        .is_none());
    let cached = wait_for_status(&alice_session, &conv.id, msg.id, DeliveryStatus::Sending).await;
    assert!(!cached.synced);

    // The link comes back: the retry queue drains, both listeners respawn,
    // and bob's focused client walks the message to `read`.
    remote.set_online(true);
    net_tx.send(NetStatus::ONLINE).unwrap();

    let read = wait_for_status(&alice_session, &conv.id, msg.id, DeliveryStatus::Read).await;
    assert!(read.synced);
    assert!(read.read_by.contains(&bob));

    alice_session.shutdown().await;
    bob_session.shutdown().await;
}

#[tokio::test]
async fn focus_gain_read_marks_messages_delivered_while_unfocused() {
    let remote = InMemoryRemote::new();
    let presence = InMemoryPresence::new();
    let (net_tx, _net_rx) = watch::channel(NetStatus::ONLINE);
    let (alice, bob) = test_users();
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();

    let alice_session = session(&alice, &alice_dir, &remote, &presence, &net_tx).await;
    let bob_session = session(&bob, &bob_dir, &remote, &presence, &net_tx).await;

    let conv = alice_session.ensure_direct_conversation(&bob).await.unwrap();

    // Bob is subscribed but has the conversation closed.
    let noop: pigeon_client::MessagesCallback = Arc::new(|_| {});
    alice_session.subscribe_conversation(conv.id.clone(), noop.clone());
    bob_session.subscribe_conversation(conv.id.clone(), noop);

    let mut sent = Vec::new();
    for text in ["one", "two", "three"] {
        let msg = alice_session
            .send(conv.id.clone(), MessageBody::Text(text.into()))
            .await
            .unwrap();
        sent.push(msg);
    }

    // Unfocused, the messages stop at `delivered` and the badge counts up.
    for msg in &sent {
        wait_for_status(&bob_session, &conv.id, msg.id, DeliveryStatus::Delivered).await;
    }
    wait_for_unread(&remote, &conv.id, &bob, 3).await;

    // Opening the conversation advances the whole backlog to `read` and
    // zeroes the counter.
    bob_session.set_focused(&conv.id, true).await.unwrap();
    for msg in &sent {
        let read = wait_for_status(&bob_session, &conv.id, msg.id, DeliveryStatus::Read).await;
        assert!(read.read_by.contains(&bob));
    }
    wait_for_unread(&remote, &conv.id, &bob, 0).await;

    // The sender sees the receipts too.
    for msg in &sent {
        wait_for_status(&alice_session, &conv.id, msg.id, DeliveryStatus::Read).await;
    }

    alice_session.shutdown().await;
    bob_session.shutdown().await;
}

#[tokio::test]
async fn unread_counters_accumulate_and_reset_through_the_session() {
    let remote = InMemoryRemote::new();
    let presence = InMemoryPresence::new();
    let (net_tx, _net_rx) = watch::channel(NetStatus::ONLINE);
    let (alice, bob) = test_users();
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();

    let alice_session = session(&alice, &alice_dir, &remote, &presence, &net_tx).await;
    let bob_session = session(&bob, &bob_dir, &remote, &presence, &net_tx).await;

    let conv = alice_session.ensure_direct_conversation(&bob).await.unwrap();
    for text in ["one", "two", "three"] {
        alice_session
            .send(conv.id.clone(), MessageBody::Text(text.into()))
            .await
            .unwrap();
    }
    wait_for_unread(&remote, &conv.id, &bob, 3).await;

    // Opening the conversation zeroes the badge; doing it again is a no-op.
    bob_session.mark_read(&conv.id).await.unwrap();
    wait_for_unread(&remote, &conv.id, &bob, 0).await;
    bob_session.mark_read(&conv.id).await.unwrap();
    assert_eq!(remote_unread(&remote, &conv.id, &bob), 0);

    // The sender's own counter never moved.
    assert_eq!(remote_unread(&remote, &conv.id, &alice), 0);

    alice_session.shutdown().await;
    bob_session.shutdown().await;
}

#[tokio::test]
async fn presence_is_visible_across_sessions_until_sign_out() {
    let remote = InMemoryRemote::new();
    let presence = InMemoryPresence::new();
    let (net_tx, _net_rx) = watch::channel(NetStatus::ONLINE);
    let (alice, bob) = test_users();
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();

    let alice_session = session(&alice, &alice_dir, &remote, &presence, &net_tx).await;
    let bob_session = session(&bob, &bob_dir, &remote, &presence, &net_tx).await;

    let (view_tx, mut view_rx) = mpsc::unbounded_channel::<PresenceView>();
    let _handle = bob_session.observe_presence(
        &alice,
        Arc::new(move |view| {
            let _ = view_tx.send(view);
        }),
    );

    let first = timeout(Duration::from_secs(2), view_rx.recv())
        .await
        .expect("no presence update")
        .unwrap();
    assert!(first.online);

    alice_session.shutdown().await;

    // Heartbeats may still be in flight; drain until the offline record.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let view = timeout(Duration::from_secs(2), view_rx.recv())
            .await
            .expect("no presence update")
            .unwrap();
        if !view.online {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "observer never saw alice go offline"
        );
    }

    bob_session.shutdown().await;
}
