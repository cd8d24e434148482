//! Integration tests for the SDK connection loop against a stand-in gateway.

mod common;

use assert_matches::assert_matches;
use common::{eventually, kinds, sdk_config, TestGateway, CLIENT_ID, TEST_TOKEN};
use serde_json::json;
use waypoint_core::attributes::Attributes;
use waypoint_core::protocol::{ClientMessage, ServerMessage};
use waypoint_core::session::SdkContentSession;
use waypoint_sdk::element::MemoryDocument;
use waypoint_sdk::Waypoint;

fn flow_session(id: &str) -> SdkContentSession {
    serde_json::from_value(json!({
        "id": id,
        "type": "flow",
        "content": {"id": "f1", "type": "flow"},
        "version": {"id": "f1-v1", "steps": [{"id": "st1", "cvid": "a"}]}
    }))
    .expect("valid session")
}

fn attrs(value: serde_json::Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Test: the socket URL carries token and client id, and connect opens with
// a handshake batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_sends_handshake_batch() {
    let mut gateway = TestGateway::start().await;
    let mut sdk = Waypoint::new();
    sdk.init(sdk_config(&gateway)).expect("init");

    let mut socket = gateway.accept().await;
    assert_eq!(
        socket.path,
        format!("/v2/ws?token={TEST_TOKEN}&clientId={CLIENT_ID}")
    );
    let handshake = socket.recv_handshake().await;
    assert_eq!(
        kinds(&handshake),
        vec!["BeginBatch", "UpdateClientContext", "EndBatch"]
    );

    assert!(sdk.identify("u1", &attrs(json!({"plan": "pro"}))).expect("identify"));
    assert_matches!(
        socket.recv().await,
        ClientMessage::UpsertUser(u) if u.external_user_id == "u1"
    );

    sdk.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: server messages update the snapshot and subscribers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_sessions_reach_the_snapshot() {
    let mut gateway = TestGateway::start().await;
    let mut sdk = Waypoint::new();
    sdk.init(sdk_config(&gateway)).expect("init");
    let mut socket = gateway.accept().await;
    socket.recv_handshake().await;

    let changes = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = std::sync::Arc::clone(&changes);
    let _sub = sdk
        .subscribe(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })
        .expect("subscribe");

    socket.send(ServerMessage::SetFlowSession(flow_session("s1"))).await;
    eventually(|| {
        sdk.snapshot()
            .map(|s| s.flow_session.is_some())
            .unwrap_or(false)
    })
    .await;

    let snapshot = sdk.snapshot().expect("snapshot");
    assert!(snapshot.connected);
    assert_eq!(snapshot.flow_session.map(|s| s.id), Some("s1".to_string()));
    assert!(changes.load(std::sync::atomic::Ordering::SeqCst) >= 1);

    sdk.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: tracked conditions are answered with toggles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tracked_condition_is_reported() {
    let mut gateway = TestGateway::start().await;
    let mut sdk = Waypoint::new();
    sdk.init(sdk_config(&gateway)).expect("init");
    let mut socket = gateway.accept().await;
    socket.recv_handshake().await;

    let track = serde_json::from_value(json!({
        "contentId": "f1",
        "contentType": "flow",
        "versionId": "f1-v1",
        "condition": {
            "id": "e1",
            "type": "element",
            "data": {
                "elementData": {"type": "manual", "customSelector": "#save"},
                "logic": "present"
            }
        }
    }))
    .expect("track condition");
    socket.send(ServerMessage::TrackClientCondition(track)).await;
    eventually(|| {
        sdk.snapshot()
            .map(|s| !s.track_conditions.is_empty())
            .unwrap_or(false)
    })
    .await;

    let mut doc = MemoryDocument::new();
    doc.append(None, &["#save"]);
    assert_eq!(sdk.observe(&doc).expect("observe"), 1);

    assert_matches!(
        socket.recv().await,
        ClientMessage::ToggleClientCondition(t) if t.condition_id == "e1" && t.is_active
    );

    sdk.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: a dropped socket clears local sessions and reconnects with the
// identity replayed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_clears_slots_and_replays_identity() {
    let mut gateway = TestGateway::start().await;
    let mut sdk = Waypoint::new();
    sdk.init(sdk_config(&gateway)).expect("init");

    let mut socket = gateway.accept().await;
    socket.recv_handshake().await;
    sdk.identify("u1", &Attributes::new()).expect("identify");
    sdk.set_page_url("https://app.example.com/home").expect("page url");
    socket.recv().await;
    socket.recv().await;

    socket.send(ServerMessage::SetFlowSession(flow_session("s1"))).await;
    eventually(|| {
        sdk.snapshot()
            .map(|s| s.flow_session.is_some())
            .unwrap_or(false)
    })
    .await;

    socket.close().await;

    let mut socket = gateway.accept().await;
    let handshake = socket.recv_handshake().await;
    // The gateway re-pushes sessions after the handshake; until then the
    // slots stay empty.
    assert!(sdk.snapshot().expect("snapshot").flow_session.is_none());
    assert_eq!(
        kinds(&handshake),
        vec!["BeginBatch", "UpsertUser", "UpdateClientContext", "EndBatch"]
    );
    assert_matches!(
        &handshake[2],
        ClientMessage::UpdateClientContext(c) if c.page_url.as_deref() == Some("https://app.example.com/home")
    );

    sdk.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: undecodable server frames are dropped without closing the socket
// ---------------------------------------------------------------------------

#[tokio::test]
async fn garbage_frames_are_ignored() {
    let mut gateway = TestGateway::start().await;
    let mut sdk = Waypoint::new();
    sdk.init(sdk_config(&gateway)).expect("init");
    let mut socket = gateway.accept().await;
    socket.recv_handshake().await;

    socket.send_raw("not json").await;
    socket.send(ServerMessage::SetFlowSession(flow_session("s1"))).await;
    eventually(|| {
        sdk.snapshot()
            .map(|s| s.flow_session.is_some())
            .unwrap_or(false)
    })
    .await;

    sdk.shutdown().await;
}
