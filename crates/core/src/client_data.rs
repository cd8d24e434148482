//! Server-held snapshot of what one browser connection is showing.
//!
//! [`SocketClientData`] is keyed by the client's stable connection id and
//! survives short disconnects. It is only ever replaced as a whole; partial
//! updates go through [`SocketClientDataPatch`], which never drops fields it
//! does not mention.

use std::collections::{HashMap, HashSet};

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::conditions::RulesCondition;
use crate::protocol::ClientContext;
use crate::session::{ContentType, SdkContentSession, SessionSlot};
use crate::types::{ConditionId, ContentId, EnvironmentId, Timestamp, VersionId};

/// A condition the browser has been asked to observe and report on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackCondition {
    pub content_id: ContentId,
    pub content_type: ContentType,
    pub version_id: VersionId,
    pub condition: RulesCondition,
}

impl TrackCondition {
    pub fn condition_id(&self) -> &str {
        &self.condition.id
    }
}

/// A server-started wait timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitTimerCondition {
    pub content_id: ContentId,
    pub version_id: VersionId,
    pub condition_id: ConditionId,
    pub wait_seconds: u64,
    pub started_at: Timestamp,
}

impl WaitTimerCondition {
    /// When the timer is due. `None` when the wait runs past the
    /// representable time range, which means the timer never fires.
    pub fn fire_at(&self) -> Option<Timestamp> {
        let secs = i64::try_from(self.wait_seconds).ok()?;
        let wait = TimeDelta::try_seconds(secs)?;
        self.started_at.checked_add_signed(wait)
    }

    /// Time left before firing, relative to `now`. Zero once due, `None`
    /// for a timer that never fires.
    pub fn remaining(&self, now: Timestamp) -> Option<std::time::Duration> {
        let fire_at = self.fire_at()?;
        Some((fire_at - now).to_std().unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketClientData {
    pub socket_id: String,
    pub environment_id: EnvironmentId,
    #[serde(default)]
    pub external_user_id: Option<String>,
    #[serde(default)]
    pub external_company_id: Option<String>,
    #[serde(default)]
    pub client_context: ClientContext,
    #[serde(default)]
    pub track_conditions: Vec<TrackCondition>,
    #[serde(default)]
    pub wait_timers: Vec<WaitTimerCondition>,
    /// Verdicts reported back for tracked conditions.
    #[serde(default)]
    pub client_conditions: HashMap<ConditionId, bool>,
    #[serde(default)]
    pub fired_wait_timers: HashSet<ConditionId>,
    #[serde(default)]
    pub flow_session: Option<SdkContentSession>,
    #[serde(default)]
    pub checklist_session: Option<SdkContentSession>,
    #[serde(default)]
    pub last_activated_flow_session: Option<SdkContentSession>,
    #[serde(default)]
    pub last_activated_checklist_session: Option<SdkContentSession>,
    pub last_updated: Timestamp,
}

impl SocketClientData {
    pub fn new(socket_id: impl Into<String>, environment_id: impl Into<EnvironmentId>) -> Self {
        Self {
            socket_id: socket_id.into(),
            environment_id: environment_id.into(),
            external_user_id: None,
            external_company_id: None,
            client_context: ClientContext::default(),
            track_conditions: Vec::new(),
            wait_timers: Vec::new(),
            client_conditions: HashMap::new(),
            fired_wait_timers: HashSet::new(),
            flow_session: None,
            checklist_session: None,
            last_activated_flow_session: None,
            last_activated_checklist_session: None,
            last_updated: Utc::now(),
        }
    }

    pub fn session(&self, slot: SessionSlot) -> Option<&SdkContentSession> {
        match slot {
            SessionSlot::Flow => self.flow_session.as_ref(),
            SessionSlot::Checklist => self.checklist_session.as_ref(),
        }
    }

    /// The slot currently holding the session with `session_id`.
    pub fn find_session(&self, session_id: &str) -> Option<(SessionSlot, &SdkContentSession)> {
        SessionSlot::ALL
            .into_iter()
            .find_map(|slot| self.session(slot).filter(|s| s.id == session_id).map(|s| (slot, s)))
    }

    pub fn active_sessions(&self) -> impl Iterator<Item = &SdkContentSession> {
        self.flow_session.iter().chain(self.checklist_session.iter())
    }

    pub fn is_tracking(&self, condition_id: &str) -> bool {
        self.track_conditions.iter().any(|t| t.condition.id == condition_id)
    }

    pub fn has_wait_timer(&self, condition_id: &str) -> bool {
        self.wait_timers.iter().any(|t| t.condition_id == condition_id)
    }

    /// Immutable merge: returns the updated snapshot.
    pub fn merged(&self, patch: SocketClientDataPatch) -> Self {
        let mut next = self.clone();
        next.apply(patch);
        next
    }

    /// Apply `patch` in place. Fields the patch leaves as `None` are kept.
    pub fn apply(&mut self, patch: SocketClientDataPatch) {
        let SocketClientDataPatch {
            external_user_id,
            external_company_id,
            client_context,
            track_conditions,
            wait_timers,
            client_conditions,
            fired_wait_timers,
            flow_session,
            checklist_session,
            last_activated_flow_session,
            last_activated_checklist_session,
        } = patch;

        if let Some(v) = external_user_id {
            self.external_user_id = v;
        }
        if let Some(v) = external_company_id {
            self.external_company_id = v;
        }
        if let Some(v) = client_context {
            self.client_context = v;
        }
        if let Some(v) = track_conditions {
            self.track_conditions = v;
        }
        if let Some(v) = wait_timers {
            self.wait_timers = v;
        }
        if let Some(v) = client_conditions {
            self.client_conditions = v;
        }
        if let Some(v) = fired_wait_timers {
            self.fired_wait_timers = v;
        }
        if let Some(v) = flow_session {
            self.flow_session = v;
        }
        if let Some(v) = checklist_session {
            self.checklist_session = v;
        }
        if let Some(v) = last_activated_flow_session {
            self.last_activated_flow_session = v;
        }
        if let Some(v) = last_activated_checklist_session {
            self.last_activated_checklist_session = v;
        }
        self.last_updated = Utc::now();
    }
}

/// Partial update of a [`SocketClientData`]. The outer `Option` means
/// "leave unchanged"; for nullable fields the inner `Option` is the new value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SocketClientDataPatch {
    pub external_user_id: Option<Option<String>>,
    pub external_company_id: Option<Option<String>>,
    pub client_context: Option<ClientContext>,
    pub track_conditions: Option<Vec<TrackCondition>>,
    pub wait_timers: Option<Vec<WaitTimerCondition>>,
    pub client_conditions: Option<HashMap<ConditionId, bool>>,
    pub fired_wait_timers: Option<HashSet<ConditionId>>,
    pub flow_session: Option<Option<SdkContentSession>>,
    pub checklist_session: Option<Option<SdkContentSession>>,
    pub last_activated_flow_session: Option<Option<SdkContentSession>>,
    pub last_activated_checklist_session: Option<Option<SdkContentSession>>,
}

impl SocketClientDataPatch {
    /// Patch that replaces the session in `slot`.
    pub fn session(slot: SessionSlot, session: Option<SdkContentSession>) -> Self {
        match slot {
            SessionSlot::Flow => Self {
                flow_session: Some(session),
                ..Default::default()
            },
            SessionSlot::Checklist => Self {
                checklist_session: Some(session),
                ..Default::default()
            },
        }
    }

    /// Patch that replaces the session in `slot` and records it as the last
    /// activated one.
    pub fn activate(slot: SessionSlot, session: SdkContentSession) -> Self {
        let mut patch = Self::session(slot, Some(session.clone()));
        match slot {
            SessionSlot::Flow => patch.last_activated_flow_session = Some(Some(session)),
            SessionSlot::Checklist => patch.last_activated_checklist_session = Some(Some(session)),
        }
        patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow(id: &str) -> SdkContentSession {
        serde_json::from_value(json!({
            "id": id,
            "type": "flow",
            "content": {"id": format!("content-{id}"), "type": "flow"},
            "version": {"id": "v1"}
        }))
        .expect("valid session")
    }

    #[test]
    fn patch_keeps_unspecified_fields() {
        let mut data = SocketClientData::new("client-1", "env-1");
        data.external_user_id = Some("u1".to_string());
        data.client_conditions.insert("c1".to_string(), true);

        let next = data.merged(SocketClientDataPatch::session(SessionSlot::Flow, Some(flow("s1"))));

        assert_eq!(next.external_user_id.as_deref(), Some("u1"));
        assert_eq!(next.client_conditions.get("c1"), Some(&true));
        assert_eq!(next.flow_session.as_ref().map(|s| s.id.as_str()), Some("s1"));
        assert!(data.flow_session.is_none());
    }

    #[test]
    fn patch_can_clear_nullable_fields() {
        let mut data = SocketClientData::new("client-1", "env-1");
        data.apply(SocketClientDataPatch::activate(SessionSlot::Flow, flow("s1")));
        data.apply(SocketClientDataPatch::session(SessionSlot::Flow, None));

        assert!(data.flow_session.is_none());
        assert_eq!(
            data.last_activated_flow_session.as_ref().map(|s| s.id.as_str()),
            Some("s1")
        );
    }

    #[test]
    fn find_session_searches_both_slots() {
        let mut data = SocketClientData::new("client-1", "env-1");
        data.apply(SocketClientDataPatch::session(SessionSlot::Flow, Some(flow("s1"))));
        assert!(matches!(data.find_session("s1"), Some((SessionSlot::Flow, _))));
        assert!(data.find_session("s2").is_none());
        assert_eq!(data.active_sessions().count(), 1);
    }

    #[test]
    fn wait_timer_remaining_saturates() {
        let started_at = Utc::now();
        let timer = WaitTimerCondition {
            content_id: "c".to_string(),
            version_id: "v".to_string(),
            condition_id: "w".to_string(),
            wait_seconds: 5,
            started_at,
        };
        assert_eq!(timer.remaining(started_at), Some(std::time::Duration::from_secs(5)));
        assert_eq!(
            timer.remaining(started_at + chrono::Duration::seconds(9)),
            Some(std::time::Duration::ZERO)
        );
    }

    #[test]
    fn wait_past_time_range_never_fires() {
        let started_at = Utc::now();
        for wait_seconds in [10_000_000_000_000, u64::MAX] {
            let timer = WaitTimerCondition {
                content_id: "c".to_string(),
                version_id: "v".to_string(),
                condition_id: "w".to_string(),
                wait_seconds,
                started_at,
            };
            assert_eq!(timer.fire_at(), None);
            assert_eq!(timer.remaining(started_at), None);
        }
    }

    #[test]
    fn serde_roundtrip_preserves_snapshot() {
        let mut data = SocketClientData::new("client-1", "env-1");
        data.fired_wait_timers.insert("w1".to_string());
        let text = serde_json::to_string(&data).expect("serializes");
        let back: SocketClientData = serde_json::from_str(&text).expect("deserializes");
        assert_eq!(back, data);
    }
}
