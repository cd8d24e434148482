//! Storage seams of the gateway.
//!
//! The gateway reads published content and end-user facts, and keeps one
//! durable [`SocketClientData`] document per browser client. Every store is
//! a trait object so the gateway runs unchanged against Postgres in
//! production and against process-local maps in tests.

pub mod memory;
pub mod postgres;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use waypoint_core::attributes::{AttributeDefinition, Attributes};
use waypoint_core::client_data::SocketClientData;
use waypoint_core::conditions::{ContentState, EventOccurrence};
use waypoint_core::session::{ContentType, ContentVersion};
use waypoint_core::types::{ContentId, EnvironmentId, Timestamp};
use waypoint_events::GatewayEvent;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store-layer failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock '{0}' is held by another owner")]
    LockHeld(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An environment an SDK token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentRecord {
    pub id: EnvironmentId,
    pub project_id: String,
    pub name: String,
}

/// The published version of one content in one environment.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedContentRecord {
    pub content_id: ContentId,
    pub content_type: ContentType,
    pub name: Option<String>,
    pub version: ContentVersion,
}

/// Partial update of a user's history for one content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentStatePatch {
    pub actived: Option<bool>,
    pub seen: Option<bool>,
    pub completed: Option<bool>,
}

impl ContentStatePatch {
    /// Fold a later patch into this one; fields the later patch sets win.
    pub fn merge(&mut self, later: ContentStatePatch) {
        self.actived = later.actived.or(self.actived);
        self.seen = later.seen.or(self.seen);
        self.completed = later.completed.or(self.completed);
    }

    pub fn apply_to(&self, state: &mut ContentState) {
        if let Some(actived) = self.actived {
            state.actived = actived;
        }
        if let Some(seen) = self.seen {
            state.seen = seen;
        }
        if let Some(completed) = self.completed {
            state.completed = completed;
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Environments, published content and attribute definitions.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn find_environment_by_token(&self, token: &str) -> StoreResult<Option<EnvironmentRecord>>;

    async fn list_published(&self, environment_id: &str) -> StoreResult<Vec<PublishedContentRecord>>;

    async fn find_published(
        &self,
        environment_id: &str,
        content_id: &str,
    ) -> StoreResult<Option<PublishedContentRecord>>;

    async fn attribute_definitions(&self, environment_id: &str) -> StoreResult<Vec<AttributeDefinition>>;

    /// Record definitions for attribute codes seen for the first time.
    async fn register_definitions(
        &self,
        environment_id: &str,
        definitions: &[AttributeDefinition],
    ) -> StoreResult<()>;
}

/// End-user facts: attribute snapshots, segments, content history, events.
#[async_trait]
pub trait BizStore: Send + Sync {
    async fn user_attributes(&self, environment_id: &str, external_user_id: &str) -> StoreResult<Attributes>;

    async fn save_user(
        &self,
        environment_id: &str,
        external_user_id: &str,
        attributes: &Attributes,
    ) -> StoreResult<()>;

    async fn company_attributes(
        &self,
        environment_id: &str,
        external_company_id: &str,
    ) -> StoreResult<Attributes>;

    async fn save_company(
        &self,
        environment_id: &str,
        external_company_id: &str,
        attributes: &Attributes,
    ) -> StoreResult<()>;

    async fn membership_attributes(
        &self,
        environment_id: &str,
        external_user_id: &str,
        external_company_id: &str,
    ) -> StoreResult<Attributes>;

    async fn save_membership(
        &self,
        environment_id: &str,
        external_user_id: &str,
        external_company_id: &str,
        attributes: &Attributes,
    ) -> StoreResult<()>;

    async fn segments(&self, environment_id: &str, external_user_id: &str) -> StoreResult<HashSet<String>>;

    async fn content_states(
        &self,
        environment_id: &str,
        external_user_id: &str,
    ) -> StoreResult<HashMap<ContentId, ContentState>>;

    async fn update_content_state(
        &self,
        environment_id: &str,
        external_user_id: &str,
        content_id: &str,
        patch: ContentStatePatch,
    ) -> StoreResult<()>;

    async fn record_event(&self, event: &GatewayEvent) -> StoreResult<()>;

    async fn events(
        &self,
        environment_id: &str,
        external_user_id: &str,
        since: Option<Timestamp>,
    ) -> StoreResult<Vec<EventOccurrence>>;
}

/// Durable per-client documents with a TTL.
#[async_trait]
pub trait ClientDataStore: Send + Sync {
    /// The unexpired document for `socket_id`, if any.
    async fn get(&self, socket_id: &str) -> StoreResult<Option<SocketClientData>>;

    /// Replace the whole document and restart its TTL.
    async fn set(&self, data: &SocketClientData, ttl_secs: u64) -> StoreResult<()>;

    async fn delete(&self, socket_id: &str) -> StoreResult<()>;

    /// Drop expired documents, returning how many were removed.
    async fn purge_expired(&self) -> StoreResult<u64>;
}

/// Short-lived token locks.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Take `key` for `ttl_secs` under `token`. Returns `false` when another
    /// unexpired holder exists.
    async fn try_acquire(&self, key: &str, token: &str, ttl_secs: u64) -> StoreResult<bool>;

    /// Release `key` only if it is still held under `token`.
    async fn release(&self, key: &str, token: &str) -> StoreResult<bool>;
}

/// The full set of stores the gateway needs.
#[derive(Clone)]
pub struct Stores {
    pub content: Arc<dyn ContentStore>,
    pub biz: Arc<dyn BizStore>,
    pub client_data: Arc<dyn ClientDataStore>,
    pub locks: Arc<dyn LockStore>,
}

impl Stores {
    /// All stores backed by one in-memory store.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            content: store.clone(),
            biz: store.clone(),
            client_data: store.clone(),
            locks: store,
        }
    }

    /// All stores backed by Postgres.
    pub fn postgres(pool: waypoint_db::DbPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            content: store.clone(),
            biz: store.clone(),
            client_data: store.clone(),
            locks: store,
        }
    }
}

/// Key of the lock serialising content starts for one end user.
pub fn start_content_lock_key(environment_id: &str, external_user_id: &str) -> String {
    format!("start-content:{environment_id}:{external_user_id}")
}
