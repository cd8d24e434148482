//! Process-local implementation of every store trait.
//!
//! Used for `STORE_BACKEND=memory` and by the integration tests. Expiry is
//! checked lazily on read, and [`ClientDataStore::purge_expired`] sweeps the
//! rest.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::sync::RwLock;
use waypoint_core::attributes::{AttributeDefinition, Attributes};
use waypoint_core::client_data::SocketClientData;
use waypoint_core::conditions::{ContentState, EventOccurrence};
use waypoint_core::hashing::sha256_hex;
use waypoint_core::types::{ContentId, Timestamp};
use waypoint_events::GatewayEvent;

use super::{
    BizStore, ClientDataStore, ContentStatePatch, ContentStore, EnvironmentRecord, LockStore,
    PublishedContentRecord, StoreResult,
};

type UserKey = (String, String);
type MembershipKey = (String, String, String);

#[derive(Default)]
struct Inner {
    /// Keyed by token hash.
    environments: HashMap<String, EnvironmentRecord>,
    published: HashMap<String, Vec<PublishedContentRecord>>,
    definitions: HashMap<String, Vec<AttributeDefinition>>,
    users: HashMap<UserKey, Attributes>,
    companies: HashMap<UserKey, Attributes>,
    memberships: HashMap<MembershipKey, Attributes>,
    segments: HashMap<UserKey, HashSet<String>>,
    content_states: HashMap<UserKey, HashMap<ContentId, ContentState>>,
    events: Vec<GatewayEvent>,
    client_data: HashMap<String, (SocketClientData, Expiry)>,
    locks: HashMap<String, (String, Expiry)>,
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

fn key(environment_id: &str, id: &str) -> UserKey {
    (environment_id.to_string(), id.to_string())
}

/// `None` never expires.
type Expiry = Option<Timestamp>;

/// A TTL past the representable time range means no expiry.
fn expiry(ttl_secs: u64) -> Expiry {
    let ttl = TimeDelta::try_seconds(i64::try_from(ttl_secs).ok()?)?;
    Utc::now().checked_add_signed(ttl)
}

fn is_live(expires_at: Expiry, now: Timestamp) -> bool {
    expires_at.map_or(true, |at| at > now)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an environment reachable with `token`.
    pub async fn insert_environment(&self, token: &str, record: EnvironmentRecord) {
        let hash = sha256_hex(token.as_bytes());
        self.inner.write().await.environments.insert(hash, record);
    }

    /// Publish `record` in `environment_id`, replacing an earlier version of
    /// the same content.
    pub async fn publish(&self, environment_id: &str, record: PublishedContentRecord) {
        let mut inner = self.inner.write().await;
        let published = inner.published.entry(environment_id.to_string()).or_default();
        published.retain(|p| p.content_id != record.content_id);
        published.push(record);
    }

    pub async fn add_segment_member(&self, environment_id: &str, segment_id: &str, external_user_id: &str) {
        self.inner
            .write()
            .await
            .segments
            .entry(key(environment_id, external_user_id))
            .or_default()
            .insert(segment_id.to_string());
    }

    /// Every event recorded so far, oldest first.
    pub async fn recorded_events(&self) -> Vec<GatewayEvent> {
        self.inner.read().await.events.clone()
    }

    pub async fn content_state(
        &self,
        environment_id: &str,
        external_user_id: &str,
        content_id: &str,
    ) -> ContentState {
        self.inner
            .read()
            .await
            .content_states
            .get(&key(environment_id, external_user_id))
            .and_then(|states| states.get(content_id).copied())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn find_environment_by_token(&self, token: &str) -> StoreResult<Option<EnvironmentRecord>> {
        let hash = sha256_hex(token.as_bytes());
        Ok(self.inner.read().await.environments.get(&hash).cloned())
    }

    async fn list_published(&self, environment_id: &str) -> StoreResult<Vec<PublishedContentRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .published
            .get(environment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_published(
        &self,
        environment_id: &str,
        content_id: &str,
    ) -> StoreResult<Option<PublishedContentRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .published
            .get(environment_id)
            .and_then(|list| list.iter().find(|p| p.content_id == content_id).cloned()))
    }

    async fn attribute_definitions(&self, environment_id: &str) -> StoreResult<Vec<AttributeDefinition>> {
        Ok(self
            .inner
            .read()
            .await
            .definitions
            .get(environment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn register_definitions(
        &self,
        environment_id: &str,
        definitions: &[AttributeDefinition],
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let known = inner.definitions.entry(environment_id.to_string()).or_default();
        for definition in definitions {
            let exists = known
                .iter()
                .any(|d| d.biz_type == definition.biz_type && d.code_name == definition.code_name);
            if !exists {
                known.push(definition.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BizStore for MemoryStore {
    async fn user_attributes(&self, environment_id: &str, external_user_id: &str) -> StoreResult<Attributes> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .get(&key(environment_id, external_user_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_user(
        &self,
        environment_id: &str,
        external_user_id: &str,
        attributes: &Attributes,
    ) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .users
            .insert(key(environment_id, external_user_id), attributes.clone());
        Ok(())
    }

    async fn company_attributes(
        &self,
        environment_id: &str,
        external_company_id: &str,
    ) -> StoreResult<Attributes> {
        Ok(self
            .inner
            .read()
            .await
            .companies
            .get(&key(environment_id, external_company_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_company(
        &self,
        environment_id: &str,
        external_company_id: &str,
        attributes: &Attributes,
    ) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .companies
            .insert(key(environment_id, external_company_id), attributes.clone());
        Ok(())
    }

    async fn membership_attributes(
        &self,
        environment_id: &str,
        external_user_id: &str,
        external_company_id: &str,
    ) -> StoreResult<Attributes> {
        let k = (
            environment_id.to_string(),
            external_user_id.to_string(),
            external_company_id.to_string(),
        );
        Ok(self.inner.read().await.memberships.get(&k).cloned().unwrap_or_default())
    }

    async fn save_membership(
        &self,
        environment_id: &str,
        external_user_id: &str,
        external_company_id: &str,
        attributes: &Attributes,
    ) -> StoreResult<()> {
        let k = (
            environment_id.to_string(),
            external_user_id.to_string(),
            external_company_id.to_string(),
        );
        self.inner.write().await.memberships.insert(k, attributes.clone());
        Ok(())
    }

    async fn segments(&self, environment_id: &str, external_user_id: &str) -> StoreResult<HashSet<String>> {
        Ok(self
            .inner
            .read()
            .await
            .segments
            .get(&key(environment_id, external_user_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn content_states(
        &self,
        environment_id: &str,
        external_user_id: &str,
    ) -> StoreResult<HashMap<ContentId, ContentState>> {
        Ok(self
            .inner
            .read()
            .await
            .content_states
            .get(&key(environment_id, external_user_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn update_content_state(
        &self,
        environment_id: &str,
        external_user_id: &str,
        content_id: &str,
        patch: ContentStatePatch,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let state = inner
            .content_states
            .entry(key(environment_id, external_user_id))
            .or_default()
            .entry(content_id.to_string())
            .or_default();
        patch.apply_to(state);
        Ok(())
    }

    async fn record_event(&self, event: &GatewayEvent) -> StoreResult<()> {
        self.inner.write().await.events.push(event.clone());
        Ok(())
    }

    async fn events(
        &self,
        environment_id: &str,
        external_user_id: &str,
        since: Option<Timestamp>,
    ) -> StoreResult<Vec<EventOccurrence>> {
        Ok(self
            .inner
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.environment_id == environment_id)
            .filter(|e| e.external_user_id.as_deref() == Some(external_user_id))
            .filter(|e| since.map_or(true, |since| e.timestamp >= since))
            .map(|e| EventOccurrence {
                code: e.code().to_string(),
                occurred_at: e.timestamp,
            })
            .collect())
    }
}

#[async_trait]
impl ClientDataStore for MemoryStore {
    async fn get(&self, socket_id: &str) -> StoreResult<Option<SocketClientData>> {
        let now = Utc::now();
        Ok(self
            .inner
            .read()
            .await
            .client_data
            .get(socket_id)
            .filter(|(_, expires_at)| is_live(*expires_at, now))
            .map(|(data, _)| data.clone()))
    }

    async fn set(&self, data: &SocketClientData, ttl_secs: u64) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .client_data
            .insert(data.socket_id.clone(), (data.clone(), expiry(ttl_secs)));
        Ok(())
    }

    async fn delete(&self, socket_id: &str) -> StoreResult<()> {
        self.inner.write().await.client_data.remove(socket_id);
        Ok(())
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let before = inner.client_data.len();
        inner.client_data.retain(|_, (_, expires_at)| is_live(*expires_at, now));
        Ok((before - inner.client_data.len()) as u64)
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl_secs: u64) -> StoreResult<bool> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let held = inner
            .locks
            .get(key)
            .is_some_and(|(_, expires_at)| is_live(*expires_at, now));
        if held {
            return Ok(false);
        }
        inner
            .locks
            .insert(key.to_string(), (token.to_string(), expiry(ttl_secs)));
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.locks.get(key) {
            Some((holder, _)) if holder == token => {
                inner.locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> EnvironmentRecord {
        EnvironmentRecord {
            id: "env-1".into(),
            project_id: "proj-1".into(),
            name: "Production".into(),
        }
    }

    #[tokio::test]
    async fn resolves_environment_by_token() {
        let store = MemoryStore::new();
        store.insert_environment("secret-token", env()).await;

        let found = store.find_environment_by_token("secret-token").await.unwrap();
        assert_eq!(found, Some(env()));
        assert!(store.find_environment_by_token("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = MemoryStore::new();
        assert!(store.try_acquire("k", "a", 10).await.unwrap());
        assert!(!store.try_acquire("k", "b", 10).await.unwrap());
        assert!(!store.release("k", "b").await.unwrap());
        assert!(store.release("k", "a").await.unwrap());
        assert!(store.try_acquire("k", "b", 10).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_taken() {
        let store = MemoryStore::new();
        assert!(store.try_acquire("k", "a", 0).await.unwrap());
        assert!(store.try_acquire("k", "b", 10).await.unwrap());
    }

    #[tokio::test]
    async fn client_data_expires() {
        let store = MemoryStore::new();
        let data = SocketClientData::new("sock-1", "env-1");

        store.set(&data, 0).await.unwrap();
        assert!(store.get("sock-1").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);

        store.set(&data, 60).await.unwrap();
        assert_eq!(store.get("sock-1").await.unwrap().map(|d| d.socket_id), Some("sock-1".into()));
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ttl_past_time_range_never_expires() {
        let store = MemoryStore::new();
        let data = SocketClientData::new("sock-1", "env-1");

        store.set(&data, u64::MAX).await.unwrap();
        assert!(store.get("sock-1").await.unwrap().is_some());
        assert_eq!(store.purge_expired().await.unwrap(), 0);

        assert!(store.try_acquire("k", "a", i64::MAX as u64 / 1000).await.unwrap());
        assert!(!store.try_acquire("k", "b", 10).await.unwrap());
    }

    #[tokio::test]
    async fn content_state_patch_keeps_unmentioned_flags() {
        let store = MemoryStore::new();
        let patch = ContentStatePatch {
            actived: Some(true),
            seen: Some(true),
            ..Default::default()
        };
        store.update_content_state("env-1", "u1", "c1", patch).await.unwrap();
        let patch = ContentStatePatch {
            completed: Some(true),
            ..Default::default()
        };
        store.update_content_state("env-1", "u1", "c1", patch).await.unwrap();

        let state = store.content_state("env-1", "u1", "c1").await;
        assert!(state.actived && state.seen && state.completed);
    }

    #[tokio::test]
    async fn definitions_register_once() {
        use waypoint_core::attributes::{AttributeBizType, AttributeType};
        let store = MemoryStore::new();
        let def = AttributeDefinition {
            code_name: "plan".into(),
            biz_type: AttributeBizType::User,
            data_type: AttributeType::String,
        };
        store.register_definitions("env-1", &[def.clone()]).await.unwrap();
        store.register_definitions("env-1", &[def]).await.unwrap();
        assert_eq!(store.attribute_definitions("env-1").await.unwrap().len(), 1);
    }
}
