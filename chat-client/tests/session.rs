//! End-to-end session scenarios over the mock transport and history.
//!
//! Each test starts a full Synchronizer, so snapshot loading, the live
//! channel reader and the merge pump all run as real tasks.

use chrono::{TimeZone, Utc};
use livechat_client::{
    ChatConfig, MemoryIdentityStore, MockHistory, MockTransport, SessionEvent, SnapshotState,
    Synchronizer,
};
use livechat_core::{Backoff, ConnectionStatus, ReconnectPolicy};
use livechat_types::{ChatMessage, FetchError, Identity, SendError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn config() -> ChatConfig {
    ChatConfig::default()
        .with_keep_alive(None)
        .with_send_timeout(Duration::from_millis(500))
        .with_reconnect(ReconnectPolicy::new(3, Backoff::Fixed { delay_ms: 0 }))
}

fn message(sender: &str, content: &str, secs: i64) -> ChatMessage {
    ChatMessage::new(sender, content, Utc.timestamp_opt(secs, 0).unwrap())
}

async fn start(transport: &MockTransport, history: &MockHistory) -> Synchronizer<MockTransport> {
    Synchronizer::start(
        Identity::new("alice").unwrap(),
        &config(),
        transport.clone(),
        history.clone(),
        Arc::new(MemoryIdentityStore::new()),
    )
    .await
    .unwrap()
}

async fn wait_for_view(session: &Synchronizer<MockTransport>, len: usize) -> Vec<ChatMessage> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let view = session.current_view().await;
            if view.len() >= len {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("view did not reach expected length")
}

async fn next_status(events: &mut broadcast::Receiver<SessionEvent>) -> ConnectionStatus {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let SessionEvent::Status(status) = events.recv().await.unwrap() {
                return status;
            }
        }
    })
    .await
    .expect("status change expected")
}

fn summary(view: &[ChatMessage]) -> Vec<(&str, &str)> {
    view.iter()
        .map(|m| (m.sender.as_str(), m.content.as_str()))
        .collect()
}

// ===========================================
// Merge Ordering Tests
// ===========================================

/// History first, then a newer live message: both, in time order.
#[tokio::test]
async fn snapshot_then_live_message() {
    let transport = MockTransport::new();
    let history = MockHistory::with_messages(&[message("a", "hi", 100)]);
    let session = start(&transport, &history).await;

    assert_eq!(
        session.snapshot_settled().await,
        SnapshotState::Loaded { count: 1 }
    );
    transport.push_message(&message("b", "yo", 200));

    let view = wait_for_view(&session, 2).await;
    assert_eq!(summary(&view), vec![("a", "hi"), ("b", "yo")]);
}

/// A live message that the snapshot also contains appears exactly once.
#[tokio::test]
async fn live_before_snapshot_is_deduplicated() {
    let transport = MockTransport::new();
    let history = MockHistory::with_messages(&[message("a", "hi", 100)]);
    history.hold();
    let session = start(&transport, &history).await;

    transport.push_message(&message("a", "hi", 100));
    wait_for_view(&session, 1).await;

    history.release();
    assert_eq!(
        session.snapshot_settled().await,
        SnapshotState::Loaded { count: 1 }
    );
    assert_eq!(summary(&session.current_view().await), vec![("a", "hi")]);
}

/// A late snapshot slots older history in front of live messages.
#[tokio::test]
async fn late_snapshot_sorts_before_live() {
    let transport = MockTransport::new();
    let history = MockHistory::with_messages(&[message("a", "old", 10), message("b", "older", 5)]);
    history.hold();
    let session = start(&transport, &history).await;

    transport.push_message(&message("c", "new", 50));
    wait_for_view(&session, 1).await;
    history.release();

    let view = wait_for_view(&session, 3).await;
    assert_eq!(
        summary(&view),
        vec![("b", "older"), ("a", "old"), ("c", "new")]
    );
}

// ===========================================
// Outbound Tests
// ===========================================

/// Whitespace-only input is refused before reaching the hub.
#[tokio::test]
async fn empty_dispatch_is_refused() {
    let transport = MockTransport::new();
    let session = start(&transport, &MockHistory::new()).await;

    assert_eq!(
        session.dispatcher().dispatch("").await,
        Err(SendError::EmptyContent)
    );
    assert_eq!(transport.send_count(), 0);
}

/// Sent messages enter the view through the hub's echo, once.
#[tokio::test]
async fn dispatched_message_arrives_via_echo() {
    let transport = MockTransport::new();
    transport.set_echo(true);
    let session = start(&transport, &MockHistory::new()).await;

    session.dispatcher().dispatch("hello").await.unwrap();

    let view = wait_for_view(&session, 1).await;
    assert_eq!(summary(&view), vec![("alice", "hello")]);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(session.current_view().await.len(), 1);
}

// ===========================================
// Connection Resilience Tests
// ===========================================

/// A dropped connection reconnects without disturbing the view.
#[tokio::test]
async fn reconnect_keeps_view() {
    let transport = MockTransport::new();
    let history = MockHistory::with_messages(&[message("a", "hi", 100)]);
    let session = start(&transport, &history).await;
    session.snapshot_settled().await;
    let mut events = session.subscribe();
    assert_eq!(session.status().await, ConnectionStatus::Connected);

    transport.drop_connection();

    assert_eq!(next_status(&mut events).await, ConnectionStatus::Reconnecting);
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
    assert_eq!(session.status().await, ConnectionStatus::Connected);
    assert_eq!(summary(&session.current_view().await), vec![("a", "hi")]);

    tokio::time::sleep(Duration::from_millis(30)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::Status(_)),
            "unexpected extra status event {:?}",
            event
        );
    }

    transport.push_message(&message("b", "back", 200));
    let view = wait_for_view(&session, 2).await;
    assert_eq!(summary(&view), vec![("a", "hi"), ("b", "back")]);
}

/// A failed history load leaves the live channel fully functional.
#[tokio::test]
async fn unreachable_history_keeps_live_channel() {
    let transport = MockTransport::new();
    let history = MockHistory::new();
    history.push_error(FetchError::Unreachable("connection refused".into()));
    let session = start(&transport, &history).await;

    assert_eq!(
        session.snapshot_settled().await,
        SnapshotState::Failed(FetchError::Unreachable("connection refused".into()))
    );
    assert_eq!(session.status().await, ConnectionStatus::Connected);

    transport.push_message(&message("b", "still here", 1));
    let view = wait_for_view(&session, 1).await;
    assert_eq!(summary(&view), vec![("b", "still here")]);
}

/// A hub that refuses the first connect leaves the session in Failed.
#[tokio::test]
async fn failed_connect_is_a_status_not_an_error() {
    let transport = MockTransport::new();
    transport.fail_next_connect("refused");
    let history = MockHistory::with_messages(&[message("a", "hi", 1)]);
    let session = start(&transport, &history).await;

    assert_eq!(session.status().await, ConnectionStatus::Failed);
    assert_eq!(
        session.dispatcher().dispatch("hi").await,
        Err(SendError::NotConnected)
    );
    assert_eq!(
        session.snapshot_settled().await,
        SnapshotState::Loaded { count: 1 }
    );
}

// ===========================================
// Teardown Tests
// ===========================================

/// Nothing merges after shutdown, and a new session can start.
#[tokio::test]
async fn shutdown_then_restart() {
    let transport = MockTransport::new();
    let identities = MemoryIdentityStore::new();
    let session = Synchronizer::start(
        Identity::new("alice").unwrap(),
        &config(),
        transport.clone(),
        MockHistory::new(),
        Arc::new(identities.clone()),
    )
    .await
    .unwrap();

    session.shutdown().await;
    transport.push_message(&message("a", "ghost", 1));

    let next = Synchronizer::start(
        Identity::new("bob").unwrap(),
        &config(),
        MockTransport::new(),
        MockHistory::new(),
        Arc::new(identities),
    )
    .await
    .unwrap();
    assert_eq!(next.identity().as_str(), "bob");
    assert!(next.current_view().await.is_empty());
}
