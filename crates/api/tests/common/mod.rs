#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::Message;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use waypoint_api::config::{ServerConfig, StoreBackend};
use waypoint_api::gateway::ClientConnection;
use waypoint_api::router::build_app_router;
use waypoint_api::state::AppState;
use waypoint_api::store::{
    ContentStore, EnvironmentRecord, MemoryStore, PublishedContentRecord, StoreError, StoreResult,
    Stores,
};
use waypoint_core::attributes::AttributeDefinition;
use waypoint_api::ws::{WsManager, WsReceivers};
use waypoint_core::protocol::{decode_server_frame, ClientMessage, ServerMessage, UpsertUserData};

pub const TEST_TOKEN: &str = "test-token";
pub const ENV_ID: &str = "env-1";
pub const PROJECT_ID: &str = "project-1";

/// Build a test `ServerConfig` with safe defaults and the in-memory backend.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        client_data_ttl_secs: 3600,
        lock_ttl_secs: 10,
        store_backend: StoreBackend::Memory,
        database_url: None,
    }
}

pub fn environment() -> EnvironmentRecord {
    EnvironmentRecord {
        id: ENV_ID.to_string(),
        project_id: PROJECT_ID.to_string(),
        name: "Production".to_string(),
    }
}

/// Application state over a fresh in-memory store holding one environment
/// reachable with [`TEST_TOKEN`].
pub async fn test_state() -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store.insert_environment(TEST_TOKEN, environment()).await;

    let state = AppState {
        pool: None,
        config: Arc::new(test_config()),
        ws_manager: Arc::new(WsManager::new()),
        event_bus: Arc::new(waypoint_events::EventBus::default()),
        stores: Stores::memory(store.clone()),
    };
    (state, store)
}

/// Content store that fails to load one content id and delegates the rest.
pub struct BrokenContent {
    pub inner: Arc<MemoryStore>,
    pub broken_id: &'static str,
}

#[async_trait::async_trait]
impl ContentStore for BrokenContent {
    async fn find_environment_by_token(&self, token: &str) -> StoreResult<Option<EnvironmentRecord>> {
        self.inner.find_environment_by_token(token).await
    }

    async fn list_published(&self, environment_id: &str) -> StoreResult<Vec<PublishedContentRecord>> {
        self.inner.list_published(environment_id).await
    }

    async fn find_published(
        &self,
        environment_id: &str,
        content_id: &str,
    ) -> StoreResult<Option<PublishedContentRecord>> {
        if content_id == self.broken_id {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.find_published(environment_id, content_id).await
    }

    async fn attribute_definitions(&self, environment_id: &str) -> StoreResult<Vec<AttributeDefinition>> {
        self.inner.attribute_definitions(environment_id).await
    }

    async fn register_definitions(
        &self,
        environment_id: &str,
        definitions: &[AttributeDefinition],
    ) -> StoreResult<()> {
        self.inner.register_definitions(environment_id, definitions).await
    }
}

/// Like [`test_state`], but loading `broken_id` fails with a database error.
pub async fn broken_content_state(broken_id: &'static str) -> (AppState, Arc<MemoryStore>) {
    let (mut state, store) = test_state().await;
    state.stores.content = Arc::new(BrokenContent {
        inner: store.clone(),
        broken_id,
    });
    (state, store)
}

/// Build the full application router with the production middleware stack.
pub fn build_test_app(state: AppState) -> Router {
    build_app_router(state, &test_config())
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Content fixtures
// ---------------------------------------------------------------------------

/// A published two-step flow. Auto-start is enabled only when `auto_start`
/// is given.
pub fn flow(content_id: &str, auto_start: Option<Value>) -> PublishedContentRecord {
    content(content_id, "flow", auto_start, json!(null))
}

/// A published checklist with one manual task per id in `tasks`.
pub fn checklist(content_id: &str, tasks: &[&str]) -> PublishedContentRecord {
    let items: Vec<Value> = tasks
        .iter()
        .map(|id| json!({"id": id, "name": format!("Task {id}")}))
        .collect();
    content(content_id, "checklist", None, json!({"items": items}))
}

pub fn content(
    content_id: &str,
    content_type: &str,
    auto_start: Option<Value>,
    checklist: Value,
) -> PublishedContentRecord {
    let mut version = json!({
        "id": format!("{content_id}-v1"),
        "config": {
            "enabledAutoStartRules": auto_start.is_some(),
            "autoStartRules": auto_start.unwrap_or_else(|| json!([])),
        },
        "steps": [
            {"id": format!("{content_id}-s1"), "cvid": "cv1", "name": "Welcome"},
            {"id": format!("{content_id}-s2"), "cvid": "cv2", "name": "Next"},
        ],
    });
    if !checklist.is_null() {
        version["checklist"] = checklist;
    }
    PublishedContentRecord {
        content_id: content_id.to_string(),
        content_type: serde_json::from_value(json!(content_type)).unwrap(),
        name: Some(format!("Content {content_id}")),
        version: serde_json::from_value(version).unwrap(),
    }
}

pub fn element_rule(id: &str) -> Value {
    json!({"id": id, "type": "element", "data": {
        "elementData": {"type": "manual", "customSelector": "#save"},
        "logic": "present",
    }})
}

pub fn wait_rule(id: &str, seconds: u64) -> Value {
    json!({"id": id, "type": "wait", "data": {"second": seconds}})
}

// ---------------------------------------------------------------------------
// Gateway helpers
// ---------------------------------------------------------------------------

/// Open a gateway connection for `client_id` without a real socket.
pub async fn connect(state: &AppState, client_id: &str) -> (ClientConnection, WsReceivers) {
    let mut conn = ClientConnection::new(state.clone(), environment(), client_id.to_string());
    let receivers = conn.connect().await.unwrap();
    (conn, receivers)
}

pub fn upsert_user(external_user_id: &str) -> ClientMessage {
    ClientMessage::UpsertUser(UpsertUserData {
        external_user_id: external_user_id.to_string(),
        attributes: Default::default(),
    })
}

/// Every server message queued for the connection so far.
pub fn drain(receivers: &mut WsReceivers) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = receivers.messages.try_recv() {
        if let Message::Text(text) = message {
            messages.push(decode_server_frame(text.as_str()).unwrap());
        }
    }
    messages
}

/// Message kinds, for order assertions.
pub fn kinds(messages: &[ServerMessage]) -> Vec<&'static str> {
    messages.iter().map(ServerMessage::kind).collect()
}
