//! Rules-condition trees used for targeting (auto-start, hide, checklist
//! task completion) and their evaluation.
//!
//! On the wire a condition is the loosely-typed record
//! `{ id, type, operators, data, conditions? }`. In memory it is a
//! [`RulesCondition`] whose [`ConditionKind`] carries one statically typed
//! payload per leaf kind, plus a [`ConditionKind::Group`] holding child
//! conditions. Records whose `type` is unknown or whose `data` does not fit
//! the kind are kept as [`ConditionKind::Unsupported`] so a single malformed
//! rule never prevents the rest of a tree from loading.

pub mod context;
pub mod evaluator;
pub mod ids;

mod attribute;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::element::ElementSelector;
use crate::types::{ConditionId, ContentId, Timestamp};

pub use context::{ContentState, EvaluationContext, EventOccurrence};
pub use evaluator::{
    aggregate_activation, evaluate_rules_conditions, is_conditions_actived, Activation,
    EvaluatedCondition, EvaluationOptions,
};

// ---------------------------------------------------------------------------
// Operators and condition types
// ---------------------------------------------------------------------------

/// How a node's children (or a top-level list) are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    #[default]
    And,
    Or,
}

/// Field-less discriminant of [`ConditionKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionType {
    UserAttr,
    CompanyAttr,
    MembershipAttr,
    CurrentPage,
    Event,
    Content,
    Segment,
    Element,
    TextInput,
    TextFill,
    Time,
    Wait,
    TaskIsClicked,
    Group,
    Unsupported,
}

impl ConditionType {
    /// Wire name of the condition type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserAttr => "user-attr",
            Self::CompanyAttr => "company-attr",
            Self::MembershipAttr => "membership-attr",
            Self::CurrentPage => "current-page",
            Self::Event => "event",
            Self::Content => "content",
            Self::Segment => "segment",
            Self::Element => "element",
            Self::TextInput => "text-input",
            Self::TextFill => "text-fill",
            Self::Time => "time",
            Self::Wait => "wait",
            Self::TaskIsClicked => "task-is-clicked",
            Self::Group => "group",
            Self::Unsupported => "unsupported",
        }
    }

    /// Leaf types only the browser can decide (they need the live DOM).
    pub fn is_client_only(self) -> bool {
        matches!(self, Self::Element | Self::TextInput | Self::TextFill)
    }
}

// ---------------------------------------------------------------------------
// Per-kind payloads
// ---------------------------------------------------------------------------

/// Comparator used by attribute conditions. Which comparators apply depends
/// on the attribute's data type; a comparator that does not apply to the
/// type evaluates to inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeLogic {
    // String / shared
    Is,
    Not,
    Contains,
    NotContain,
    StartsWith,
    EndsWith,
    Empty,
    Any,
    // Number
    IsLessThan,
    IsLessThanOrEqualTo,
    IsGreaterThan,
    IsGreaterThanOrEqualTo,
    Between,
    // Boolean
    True,
    False,
    // List
    IncludesAtLeastOne,
    IncludesAll,
    NotIncludesAtLeastOne,
    NotIncludesAll,
    // DateTime (relative, in days)
    LessThan,
    Exactly,
    MoreThan,
    // DateTime (absolute)
    Before,
    On,
    After,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeConditionData {
    pub attr_code: String,
    pub logic: AttributeLogic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list_values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageConditionData {
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

fn default_at_least() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConditionData {
    pub event_code: String,
    #[serde(default = "default_at_least")]
    pub at_least: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within_days: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentLogic {
    Actived,
    Unactived,
    Seen,
    Unseen,
    Completed,
    Uncompleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentConditionData {
    pub content_id: ContentId,
    pub logic: ContentLogic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentLogic {
    Is,
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentConditionData {
    pub segment_id: String,
    pub logic: SegmentLogic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementLogic {
    Present,
    Unpresent,
    Disabled,
    Undisabled,
    Clicked,
    Unclicked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementConditionData {
    pub element_data: ElementSelector,
    pub logic: ElementLogic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextLogic {
    Is,
    Not,
    Contains,
    NotContain,
    StartsWith,
    EndsWith,
    Match,
    Unmatch,
    Any,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInputConditionData {
    pub element_data: ElementSelector,
    pub logic: TextLogic,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextFillConditionData {
    pub element_data: ElementSelector,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeConditionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConditionData {
    /// Seconds to wait after the timer starts.
    pub second: u64,
}

// ---------------------------------------------------------------------------
// RulesCondition
// ---------------------------------------------------------------------------

/// One node of a rules-condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionKind {
    UserAttr(AttributeConditionData),
    CompanyAttr(AttributeConditionData),
    MembershipAttr(AttributeConditionData),
    CurrentPage(PageConditionData),
    Event(EventConditionData),
    Content(ContentConditionData),
    Segment(SegmentConditionData),
    Element(ElementConditionData),
    TextInput(TextInputConditionData),
    TextFill(TextFillConditionData),
    Time(TimeConditionData),
    Wait(WaitConditionData),
    TaskIsClicked,
    Group(Vec<RulesCondition>),
    /// Unknown type or malformed payload, kept verbatim.
    Unsupported { type_name: String, data: Value },
}

impl ConditionKind {
    pub fn condition_type(&self) -> ConditionType {
        match self {
            Self::UserAttr(_) => ConditionType::UserAttr,
            Self::CompanyAttr(_) => ConditionType::CompanyAttr,
            Self::MembershipAttr(_) => ConditionType::MembershipAttr,
            Self::CurrentPage(_) => ConditionType::CurrentPage,
            Self::Event(_) => ConditionType::Event,
            Self::Content(_) => ConditionType::Content,
            Self::Segment(_) => ConditionType::Segment,
            Self::Element(_) => ConditionType::Element,
            Self::TextInput(_) => ConditionType::TextInput,
            Self::TextFill(_) => ConditionType::TextFill,
            Self::Time(_) => ConditionType::Time,
            Self::Wait(_) => ConditionType::Wait,
            Self::TaskIsClicked => ConditionType::TaskIsClicked,
            Self::Group(_) => ConditionType::Group,
            Self::Unsupported { .. } => ConditionType::Unsupported,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCondition", into = "RawCondition")]
pub struct RulesCondition {
    pub id: ConditionId,
    pub operators: Operator,
    pub kind: ConditionKind,
}

impl RulesCondition {
    /// Create a node with a freshly generated id.
    pub fn new(operators: Operator, kind: ConditionKind) -> Self {
        Self {
            id: ids::new_condition_id(),
            operators,
            kind,
        }
    }

    /// Create a group node with a freshly generated id.
    pub fn group(operators: Operator, conditions: Vec<RulesCondition>) -> Self {
        Self::new(operators, ConditionKind::Group(conditions))
    }

    pub fn condition_type(&self) -> ConditionType {
        self.kind.condition_type()
    }

    /// Children of a group node; empty for leaves.
    pub fn children(&self) -> &[RulesCondition] {
        match &self.kind {
            ConditionKind::Group(children) => children,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Wire representation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawCondition {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    operators: Operator,
    #[serde(default)]
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conditions: Option<Vec<RawCondition>>,
}

fn typed<T, F>(type_name: &str, data: Value, wrap: F) -> ConditionKind
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> ConditionKind,
{
    match serde_json::from_value::<T>(data.clone()) {
        Ok(payload) => wrap(payload),
        Err(e) => {
            tracing::warn!(condition_type = type_name, error = %e, "Malformed condition data");
            ConditionKind::Unsupported {
                type_name: type_name.to_string(),
                data,
            }
        }
    }
}

impl From<RawCondition> for RulesCondition {
    fn from(raw: RawCondition) -> Self {
        let data = if raw.data.is_null() {
            Value::Object(Default::default())
        } else {
            raw.data
        };
        let name = raw.kind.as_str();

        let kind = match name {
            "user-attr" => typed(name, data, ConditionKind::UserAttr),
            "company-attr" => typed(name, data, ConditionKind::CompanyAttr),
            "membership-attr" => typed(name, data, ConditionKind::MembershipAttr),
            "current-page" => typed(name, data, ConditionKind::CurrentPage),
            "event" => typed(name, data, ConditionKind::Event),
            "content" => typed(name, data, ConditionKind::Content),
            "segment" => typed(name, data, ConditionKind::Segment),
            "element" => typed(name, data, ConditionKind::Element),
            "text-input" => typed(name, data, ConditionKind::TextInput),
            "text-fill" => typed(name, data, ConditionKind::TextFill),
            "time" => typed(name, data, ConditionKind::Time),
            "wait" => typed(name, data, ConditionKind::Wait),
            "task-is-clicked" => ConditionKind::TaskIsClicked,
            "group" => ConditionKind::Group(
                raw.conditions
                    .unwrap_or_default()
                    .into_iter()
                    .map(RulesCondition::from)
                    .collect(),
            ),
            other => {
                tracing::warn!(condition_type = other, "Unknown condition type");
                ConditionKind::Unsupported {
                    type_name: other.to_string(),
                    data,
                }
            }
        };

        Self {
            id: raw.id,
            operators: raw.operators,
            kind,
        }
    }
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

impl From<RulesCondition> for RawCondition {
    fn from(condition: RulesCondition) -> Self {
        let kind = condition.condition_type().as_str().to_string();
        let empty = || Value::Object(Default::default());

        let (kind, data, conditions) = match condition.kind {
            ConditionKind::UserAttr(d)
            | ConditionKind::CompanyAttr(d)
            | ConditionKind::MembershipAttr(d) => (kind, to_value(&d), None),
            ConditionKind::CurrentPage(d) => (kind, to_value(&d), None),
            ConditionKind::Event(d) => (kind, to_value(&d), None),
            ConditionKind::Content(d) => (kind, to_value(&d), None),
            ConditionKind::Segment(d) => (kind, to_value(&d), None),
            ConditionKind::Element(d) => (kind, to_value(&d), None),
            ConditionKind::TextInput(d) => (kind, to_value(&d), None),
            ConditionKind::TextFill(d) => (kind, to_value(&d), None),
            ConditionKind::Time(d) => (kind, to_value(&d), None),
            ConditionKind::Wait(d) => (kind, to_value(&d), None),
            ConditionKind::TaskIsClicked => (kind, empty(), None),
            ConditionKind::Group(children) => (
                kind,
                empty(),
                Some(children.into_iter().map(RawCondition::from).collect()),
            ),
            ConditionKind::Unsupported { type_name, data } => (type_name, data, None),
        };

        Self {
            id: condition.id,
            kind,
            operators: condition.operators,
            data,
            conditions,
        }
    }
}
