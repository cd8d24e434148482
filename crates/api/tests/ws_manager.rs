//! Unit tests for `WsManager`.
//!
//! These tests exercise the connection manager directly, without performing
//! any HTTP upgrades. They verify add/remove semantics, room membership,
//! targeted delivery and graceful shutdown behaviour.

use axum::extract::ws::Message;
use waypoint_api::gateway::PeerSignal;
use waypoint_api::ws::{environment_room, user_room, WsManager};

// ---------------------------------------------------------------------------
// Test: new manager starts with zero connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_manager_has_zero_connections() {
    let manager = WsManager::new();

    assert_eq!(manager.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: add() registers the connection in its environment room
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_joins_environment_room() {
    let manager = WsManager::new();

    let _rx = manager.add("conn-1".to_string(), "env-1").await;

    assert_eq!(manager.connection_count().await, 1);
    assert_eq!(manager.room_members(&environment_room("env-1")).await, vec!["conn-1"]);
}

// ---------------------------------------------------------------------------
// Test: remove() with unknown ID is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_unknown_id_is_noop() {
    let manager = WsManager::new();

    let _rx = manager.add("conn-1".to_string(), "env-1").await;
    manager.remove("nonexistent").await;

    assert_eq!(manager.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: join() on an unknown connection reports false
// ---------------------------------------------------------------------------

#[tokio::test]
async fn join_unknown_connection_fails() {
    let manager = WsManager::new();

    assert!(!manager.join("ghost", "room").await);
}

// ---------------------------------------------------------------------------
// Test: signal_room() skips the excluded sender and non-members
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signal_room_excludes_sender() {
    let manager = WsManager::new();
    let room = user_room("env-1", "u1");
    let signal = PeerSignal::StepChanged {
        content_id: "c1".into(),
        step_cvid: "cv1".into(),
    };

    let mut a = manager.add("a".to_string(), "env-1").await;
    let mut b = manager.add("b".to_string(), "env-1").await;
    let mut c = manager.add("c".to_string(), "env-1").await;
    manager.join("a", &room).await;
    manager.join("b", &room).await;

    let sent = manager.signal_room(&room, signal.clone(), Some("a")).await;

    assert_eq!(sent, 1);
    assert!(a.peer.try_recv().is_err());
    assert_eq!(b.peer.try_recv().ok(), Some(signal));
    assert!(c.peer.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: send() reaches only the addressed connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_targets_one_connection() {
    let manager = WsManager::new();

    let mut a = manager.add("a".to_string(), "env-1").await;
    let mut b = manager.add("b".to_string(), "env-1").await;

    assert!(manager.send("a", Message::Text("hello".into())).await);
    assert!(!manager.send("ghost", Message::Text("hello".into())).await);

    assert!(matches!(a.messages.try_recv(), Ok(Message::Text(_))));
    assert!(b.messages.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: signal_room() stops reaching a connection after leave()
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signal_room_respects_leave() {
    let manager = WsManager::new();
    let room = user_room("env-1", "u1");
    let signal = PeerSignal::StepChanged {
        content_id: "c1".into(),
        step_cvid: "cv2".into(),
    };

    let mut b = manager.add("b".to_string(), "env-1").await;
    manager.join("b", &room).await;
    assert_eq!(manager.signal_room(&room, signal.clone(), None).await, 1);
    assert_eq!(b.peer.try_recv().ok(), Some(signal.clone()));

    manager.leave("b", &room).await;
    assert_eq!(manager.signal_room(&room, signal, None).await, 0);
}

// ---------------------------------------------------------------------------
// Test: shutdown_all() sends Close and clears all connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_all_sends_close_and_clears() {
    let manager = WsManager::new();

    let mut rx1 = manager.add("conn-1".to_string(), "env-1").await;
    let mut rx2 = manager.add("conn-2".to_string(), "env-2").await;

    manager.shutdown_all().await;

    assert_eq!(manager.connection_count().await, 0);
    assert!(matches!(rx1.messages.recv().await, Some(Message::Close(None))));
    assert!(matches!(rx2.messages.recv().await, Some(Message::Close(None))));
}

// ---------------------------------------------------------------------------
// Test: ping_all() reaches every connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_all_sends_ping() {
    let manager = WsManager::new();
    let mut rx = manager.add("conn-1".to_string(), "env-1").await;

    manager.ping_all().await;

    assert!(matches!(rx.messages.recv().await, Some(Message::Ping(_))));
}
