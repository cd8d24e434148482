//! Content sessions: the runtime instance of a published content version
//! shown to one end user.
//!
//! A browser client holds at most one flow session and one checklist
//! session at a time. The two slots are independent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attributes::AttributeDefinition;
use crate::conditions::ids::regenerate_condition_ids;
use crate::conditions::RulesCondition;
use crate::element::ElementSelector;
use crate::error::CoreError;
use crate::types::{ContentId, SessionId, VersionId};

// ---------------------------------------------------------------------------
// Content kinds and slots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Flow,
    Checklist,
    Launcher,
    Banner,
    Survey,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flow => "flow",
            Self::Checklist => "checklist",
            Self::Launcher => "launcher",
            Self::Banner => "banner",
            Self::Survey => "survey",
        }
    }

    /// The session slot this content type occupies, if it has one.
    pub fn slot(self) -> Option<SessionSlot> {
        match self {
            Self::Flow => Some(SessionSlot::Flow),
            Self::Checklist => Some(SessionSlot::Checklist),
            _ => None,
        }
    }
}

/// One of the two independent session slots of a browser client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionSlot {
    Flow,
    Checklist,
}

impl SessionSlot {
    pub const ALL: [SessionSlot; 2] = [SessionSlot::Flow, SessionSlot::Checklist];

    pub fn content_type(self) -> ContentType {
        match self {
            Self::Flow => ContentType::Flow,
            Self::Checklist => ContentType::Checklist,
        }
    }
}

// ---------------------------------------------------------------------------
// Version payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentConfig {
    #[serde(default)]
    pub enabled_auto_start_rules: bool,
    #[serde(default)]
    pub auto_start_rules: Vec<RulesCondition>,
    #[serde(default)]
    pub enabled_hide_rules: bool,
    #[serde(default)]
    pub hide_rules: Vec<RulesCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    /// Stable id shared by all copies of this step across versions.
    pub cvid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ElementSelector>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clicked_actions: Vec<RulesCondition>,
    #[serde(default)]
    pub complete_conditions: Vec<RulesCondition>,
    #[serde(default)]
    pub only_show_task: bool,
    #[serde(default)]
    pub only_show_task_conditions: Vec<RulesCondition>,
    #[serde(default)]
    pub is_clicked: bool,
    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistData {
    #[serde(default)]
    pub button_text: String,
    #[serde(default)]
    pub items: Vec<ChecklistItem>,
}

impl ChecklistData {
    pub fn item(&self, item_id: &str) -> Option<&ChecklistItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn all_completed(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|i| i.is_completed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentVersion {
    pub id: VersionId,
    #[serde(default)]
    pub config: ContentConfig,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<ChecklistData>,
}

impl ContentVersion {
    /// A copy of this version under `new_id` in which every nested condition
    /// id has been regenerated.
    pub fn duplicate(&self, new_id: VersionId) -> Self {
        let mut copy = self.clone();
        copy.id = new_id;
        copy.config.auto_start_rules = regenerate_condition_ids(&self.config.auto_start_rules);
        copy.config.hide_rules = regenerate_condition_ids(&self.config.hide_rules);
        if let Some(checklist) = copy.checklist.as_mut() {
            for item in &mut checklist.items {
                item.clicked_actions = regenerate_condition_ids(&item.clicked_actions);
                item.complete_conditions = regenerate_condition_ids(&item.complete_conditions);
                item.only_show_task_conditions =
                    regenerate_condition_ids(&item.only_show_task_conditions);
            }
        }
        copy
    }

    /// Every condition tree owned by this version.
    pub fn condition_trees(&self) -> Vec<&[RulesCondition]> {
        let mut trees = vec![
            self.config.auto_start_rules.as_slice(),
            self.config.hide_rules.as_slice(),
        ];
        if let Some(checklist) = &self.checklist {
            for item in &checklist.items {
                trees.push(&item.clicked_actions);
                trees.push(&item.complete_conditions);
                trees.push(&item.only_show_task_conditions);
            }
        }
        trees
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSummary {
    pub id: ContentId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStep {
    pub id: String,
    pub cvid: String,
}

/// A content session as pushed to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkContentSession {
    pub id: SessionId,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default)]
    pub draft_mode: bool,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    pub content: ContentSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<CurrentStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expand_pending: Option<bool>,
    pub version: ContentVersion,
}

impl SdkContentSession {
    pub fn content_id(&self) -> &str {
        &self.content.id
    }

    pub fn content_name(&self) -> &str {
        self.content.name.as_deref().unwrap_or("")
    }

    pub fn version_id(&self) -> &str {
        &self.version.id
    }

    pub fn slot(&self) -> Option<SessionSlot> {
        self.content_type.slot()
    }

    pub fn is_draft(&self) -> bool {
        self.draft_mode
    }

    pub fn is_expand_pending(&self) -> bool {
        self.expand_pending.unwrap_or(false)
    }

    pub fn steps(&self) -> &[Step] {
        &self.version.steps
    }

    pub fn step_by_cvid(&self, cvid: &str) -> Option<&Step> {
        self.version.steps.iter().find(|s| s.cvid == cvid)
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.current_step
            .as_ref()
            .and_then(|c| self.step_by_cvid(&c.cvid))
    }

    /// Index of the current step, or `0` when none is set.
    pub fn current_step_index(&self) -> usize {
        self.current_step
            .as_ref()
            .and_then(|c| self.version.steps.iter().position(|s| s.cvid == c.cvid))
            .unwrap_or(0)
    }

    pub fn is_last_step(&self) -> bool {
        let len = self.version.steps.len();
        len == 0 || self.current_step_index() + 1 == len
    }

    pub fn checklist_items(&self) -> &[ChecklistItem] {
        self.version
            .checklist
            .as_ref()
            .map(|c| c.items.as_slice())
            .unwrap_or(&[])
    }

    pub fn theme(&self) -> Option<&Value> {
        self.version.theme.as_ref()
    }

    pub fn auto_start_rules(&self) -> &[RulesCondition] {
        &self.version.config.auto_start_rules
    }

    /// Hide rules, or an empty slice when they are disabled.
    pub fn hide_rules(&self) -> &[RulesCondition] {
        if self.version.config.enabled_hide_rules {
            &self.version.config.hide_rules
        } else {
            &[]
        }
    }

    /// Move to the step with the given cvid.
    pub fn go_to_step(&mut self, step_cvid: &str) -> Result<(), CoreError> {
        let step = self
            .step_by_cvid(step_cvid)
            .ok_or_else(|| CoreError::NotFound {
                entity: "Step",
                id: step_cvid.to_string(),
            })?;
        self.current_step = Some(CurrentStep {
            id: step.id.clone(),
            cvid: step.cvid.clone(),
        });
        Ok(())
    }

    fn checklist_item_mut(&mut self, item_id: &str) -> Result<&mut ChecklistItem, CoreError> {
        self.version
            .checklist
            .as_mut()
            .and_then(|c| c.items.iter_mut().find(|i| i.id == item_id))
            .ok_or_else(|| CoreError::NotFound {
                entity: "ChecklistItem",
                id: item_id.to_string(),
            })
    }

    pub fn mark_task_clicked(&mut self, item_id: &str) -> Result<(), CoreError> {
        self.checklist_item_mut(item_id)?.is_clicked = true;
        Ok(())
    }

    /// Mark a task completed. Returns `false` when it already was.
    pub fn mark_task_completed(&mut self, item_id: &str) -> Result<bool, CoreError> {
        let item = self.checklist_item_mut(item_id)?;
        let changed = !item.is_completed;
        item.is_completed = true;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::ids::collect_condition_ids;
    use crate::conditions::{ConditionKind, Operator};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn session_json() -> Value {
        json!({
            "id": "s1",
            "type": "checklist",
            "content": {"id": "c1", "type": "checklist"},
            "version": {
                "id": "v1",
                "config": {
                    "enabledHideRules": false,
                    "hideRules": [{"id": "h1", "type": "task-is-clicked"}]
                },
                "steps": [
                    {"id": "st1", "cvid": "a"},
                    {"id": "st2", "cvid": "b"}
                ],
                "checklist": {
                    "items": [{
                        "id": "t1",
                        "name": "Invite a teammate",
                        "completeConditions": [{"id": "cc1", "type": "task-is-clicked"}]
                    }]
                }
            }
        })
    }

    fn session() -> SdkContentSession {
        serde_json::from_value(session_json()).expect("valid session")
    }

    #[test]
    fn accessors_fall_back_defensively() {
        let s = session();
        assert_eq!(s.content_name(), "");
        assert!(!s.is_expand_pending());
        assert!(s.current_step().is_none());
        assert_eq!(s.current_step_index(), 0);
        assert!(s.hide_rules().is_empty());
        assert_eq!(s.slot(), Some(SessionSlot::Checklist));
        assert_eq!(s.checklist_items().len(), 1);
    }

    #[test]
    fn go_to_step_moves_and_rejects_unknown() {
        let mut s = session();
        s.go_to_step("b").expect("known step");
        assert_eq!(s.current_step().map(|st| st.id.as_str()), Some("st2"));
        assert!(s.is_last_step());

        assert_matches!(s.go_to_step("zzz"), Err(CoreError::NotFound { entity: "Step", .. }));
        assert_eq!(s.current_step_index(), 1);
    }

    #[test]
    fn task_completion_reports_first_change_only() {
        let mut s = session();
        assert!(s.mark_task_completed("t1").expect("task"));
        assert!(!s.mark_task_completed("t1").expect("task"));
        assert!(s.mark_task_clicked("missing").is_err());
    }

    #[test]
    fn duplicate_regenerates_every_tree() {
        let mut version = session().version;
        version.config.auto_start_rules = vec![RulesCondition::group(
            Operator::And,
            vec![RulesCondition::new(Operator::And, ConditionKind::TaskIsClicked)],
        )];

        let copy = version.duplicate("v2".to_string());
        assert_eq!(copy.id, "v2");

        let ids = |v: &ContentVersion| -> Vec<String> {
            v.condition_trees()
                .into_iter()
                .flat_map(collect_condition_ids)
                .collect()
        };
        let (before, after) = (ids(&version), ids(&copy));
        assert_eq!(before.len(), after.len());
        assert!(before.iter().all(|id| !after.contains(id)));
    }
}
