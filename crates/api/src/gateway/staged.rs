//! End-user writes held back until their transition commits.
//!
//! [`StagedWrites`] collects the attribute snapshots, content history and
//! attribute definitions a transition produces. The synchronizer reads
//! through it so a later message in the same batch sees what an earlier one
//! wrote, and the connection flushes it together with the client data only
//! when the whole transition succeeded. A transition that fails leaves the
//! biz stores untouched.

use std::collections::HashMap;

use waypoint_core::attributes::{AttributeDefinition, Attributes};
use waypoint_core::conditions::ContentState;
use waypoint_core::types::ContentId;

use crate::store::{ContentStatePatch, StoreResult, Stores};

type MembershipKey = (String, String);

/// Pending writes for one environment, keyed by external ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedWrites {
    users: HashMap<String, Attributes>,
    companies: HashMap<String, Attributes>,
    memberships: HashMap<MembershipKey, Attributes>,
    content_states: HashMap<(String, ContentId), ContentStatePatch>,
    definitions: Vec<AttributeDefinition>,
}

impl StagedWrites {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.companies.is_empty()
            && self.memberships.is_empty()
            && self.content_states.is_empty()
            && self.definitions.is_empty()
    }

    pub fn save_user(&mut self, external_user_id: &str, attributes: Attributes) {
        self.users.insert(external_user_id.to_string(), attributes);
    }

    pub fn save_company(&mut self, external_company_id: &str, attributes: Attributes) {
        self.companies.insert(external_company_id.to_string(), attributes);
    }

    pub fn save_membership(
        &mut self,
        external_user_id: &str,
        external_company_id: &str,
        attributes: Attributes,
    ) {
        self.memberships.insert(
            (external_user_id.to_string(), external_company_id.to_string()),
            attributes,
        );
    }

    pub fn update_content_state(&mut self, external_user_id: &str, content_id: &str, patch: ContentStatePatch) {
        self.content_states
            .entry((external_user_id.to_string(), content_id.to_string()))
            .or_default()
            .merge(patch);
    }

    /// Stage definitions; codes already staged for the same biz type are
    /// kept as first seen.
    pub fn register_definitions(&mut self, definitions: Vec<AttributeDefinition>) {
        for definition in definitions {
            let known = self
                .definitions
                .iter()
                .any(|d| d.code_name == definition.code_name && d.biz_type == definition.biz_type);
            if !known {
                self.definitions.push(definition);
            }
        }
    }

    pub fn user(&self, external_user_id: &str) -> Option<&Attributes> {
        self.users.get(external_user_id)
    }

    pub fn company(&self, external_company_id: &str) -> Option<&Attributes> {
        self.companies.get(external_company_id)
    }

    pub fn membership(&self, external_user_id: &str, external_company_id: &str) -> Option<&Attributes> {
        self.memberships
            .get(&(external_user_id.to_string(), external_company_id.to_string()))
    }

    /// Apply staged history patches for `external_user_id` over `states`.
    pub fn overlay_content_states(
        &self,
        external_user_id: &str,
        states: &mut HashMap<ContentId, ContentState>,
    ) {
        for ((user, content_id), patch) in &self.content_states {
            if user == external_user_id {
                patch.apply_to(states.entry(content_id.clone()).or_default());
            }
        }
    }

    /// Add staged definitions whose code is not yet defined.
    pub fn overlay_definitions(&self, definitions: &mut Vec<AttributeDefinition>) {
        for staged in &self.definitions {
            let defined = definitions
                .iter()
                .any(|d| d.code_name == staged.code_name && d.biz_type == staged.biz_type);
            if !defined {
                definitions.push(staged.clone());
            }
        }
    }

    /// Write everything to the stores.
    pub async fn flush(&self, stores: &Stores, environment_id: &str) -> StoreResult<()> {
        for (user, attributes) in &self.users {
            stores.biz.save_user(environment_id, user, attributes).await?;
        }
        for (company, attributes) in &self.companies {
            stores.biz.save_company(environment_id, company, attributes).await?;
        }
        for ((user, company), attributes) in &self.memberships {
            stores
                .biz
                .save_membership(environment_id, user, company, attributes)
                .await?;
        }
        for ((user, content_id), patch) in &self.content_states {
            stores
                .biz
                .update_content_state(environment_id, user, content_id, *patch)
                .await?;
        }
        if !self.definitions.is_empty() {
            stores
                .content
                .register_definitions(environment_id, &self.definitions)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn later_patches_win_per_field() {
        let mut staged = StagedWrites::default();
        staged.update_content_state(
            "u1",
            "c1",
            ContentStatePatch {
                actived: Some(true),
                seen: Some(true),
                completed: None,
            },
        );
        staged.update_content_state(
            "u1",
            "c1",
            ContentStatePatch {
                actived: Some(false),
                ..Default::default()
            },
        );

        let mut states = HashMap::new();
        staged.overlay_content_states("u1", &mut states);
        let state = &states["c1"];
        assert!(!state.actived && state.seen && !state.completed);

        let mut other = HashMap::new();
        staged.overlay_content_states("u2", &mut other);
        assert!(other.is_empty());
    }

    #[test]
    fn staged_attributes_shadow_until_flushed() {
        let mut staged = StagedWrites::default();
        assert!(staged.is_empty());
        staged.save_user("u1", attrs(json!({"plan": "pro"})));
        staged.save_membership("u1", "acme", attrs(json!({"role": "admin"})));

        assert_eq!(staged.user("u1"), Some(&attrs(json!({"plan": "pro"}))));
        assert!(staged.user("u2").is_none());
        assert!(staged.membership("u1", "acme").is_some());
        assert!(staged.company("acme").is_none());
        assert!(!staged.is_empty());
    }
}
