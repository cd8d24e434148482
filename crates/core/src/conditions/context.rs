//! Facts a condition tree is evaluated against.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeBizType, AttributeDefinition, AttributeType, Attributes};
use crate::element::ElementObservation;
use crate::types::{ConditionId, ContentId, Timestamp};

/// A single occurrence of a tracked event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventOccurrence {
    pub code: String,
    pub occurred_at: Timestamp,
}

/// What the end user has done with a piece of content so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentState {
    pub actived: bool,
    pub seen: bool,
    pub completed: bool,
}

/// Everything the evaluator may consult.
///
/// Missing facts are not errors: a leaf whose facts are absent either
/// evaluates to inactive (attributes, events, content history) or reports
/// pending (DOM-backed leaves, wait timers) until the owner of the fact
/// supplies it.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub user_attributes: Attributes,
    pub company_attributes: Attributes,
    pub membership_attributes: Attributes,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub current_url: Option<String>,
    pub now: Timestamp,
    pub events: Vec<EventOccurrence>,
    pub contents: HashMap<ContentId, ContentState>,
    pub segments: HashSet<String>,
    /// DOM observations keyed by the condition that asked for them.
    pub elements: HashMap<ConditionId, ElementObservation>,
    /// Verdicts reported by the browser for client-tracked conditions.
    pub client_conditions: HashMap<ConditionId, bool>,
    pub fired_wait_timers: HashSet<ConditionId>,
    pub task_clicked: bool,
}

impl EvaluationContext {
    /// An empty context anchored at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            ..Default::default()
        }
    }

    pub fn attributes(&self, biz_type: AttributeBizType) -> &Attributes {
        match biz_type {
            AttributeBizType::User => &self.user_attributes,
            AttributeBizType::Company => &self.company_attributes,
            AttributeBizType::Membership => &self.membership_attributes,
        }
    }

    /// Declared data type of an attribute, if a definition is known.
    pub fn attribute_type(&self, biz_type: AttributeBizType, code_name: &str) -> Option<AttributeType> {
        self.attribute_definitions
            .iter()
            .find(|d| d.biz_type == biz_type && d.code_name == code_name)
            .map(|d| d.data_type)
    }

    pub fn content_state(&self, content_id: &str) -> ContentState {
        self.contents.get(content_id).copied().unwrap_or_default()
    }
}
