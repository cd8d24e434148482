//! Rules-condition evaluator -- pure logic, no I/O.
//!
//! Every leaf kind has its own strategy returning an [`Activation`]. Leaves
//! whose facts live in the browser (elements, typed text) or behind a timer
//! report [`Activation::Pending`] until those facts are supplied; the caller
//! re-evaluates when a watcher, timer, or attribute store signals a change.
//!
//! Groups evaluate every child depth-first in order and then reduce with
//! their own operator. Reduction is three-valued: under AND any inactive
//! child wins, under OR any active child wins, and otherwise a pending child
//! makes the group pending. An empty list is active.

use std::collections::HashSet;

use regex::Regex;
use serde::Serialize;

use super::context::EvaluationContext;
use super::{
    attribute, ConditionKind, ConditionType, ContentLogic, ElementLogic, EventConditionData,
    Operator, RulesCondition, SegmentLogic, TextInputConditionData, TextLogic, TimeConditionData,
};
use crate::attributes::AttributeBizType;
use crate::element::ElementObservation;
use crate::types::ConditionId;
use crate::url_pattern::is_match_url_pattern;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of evaluating one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Active,
    Inactive,
    Pending,
}

impl From<bool> for Activation {
    fn from(value: bool) -> Self {
        if value {
            Self::Active
        } else {
            Self::Inactive
        }
    }
}

impl Activation {
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    pub fn is_pending(self) -> bool {
        self == Self::Pending
    }

    /// The decided value, if any.
    pub fn decided(self) -> Option<bool> {
        match self {
            Self::Active => Some(true),
            Self::Inactive => Some(false),
            Self::Pending => None,
        }
    }
}

/// An evaluated node, mirroring the shape of the input tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedCondition {
    pub id: ConditionId,
    pub condition_type: ConditionType,
    pub operators: Operator,
    pub activation: Activation,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<EvaluatedCondition>,
}

impl EvaluatedCondition {
    pub fn is_actived(&self) -> bool {
        self.activation.is_active()
    }
}

/// Knobs for a single evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct EvaluationOptions {
    /// When set, leaf types outside this set are not evaluated and report
    /// pending.
    pub evaluate_only: Option<HashSet<ConditionType>>,
}

impl EvaluationOptions {
    pub fn only<I: IntoIterator<Item = ConditionType>>(types: I) -> Self {
        Self {
            evaluate_only: Some(types.into_iter().collect()),
        }
    }

    fn allows(&self, condition_type: ConditionType) -> bool {
        self.evaluate_only
            .as_ref()
            .map_or(true, |set| set.contains(&condition_type))
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Evaluate a list of conditions, returning one result per input node.
pub fn evaluate_rules_conditions(
    conditions: &[RulesCondition],
    ctx: &EvaluationContext,
    options: &EvaluationOptions,
) -> Vec<EvaluatedCondition> {
    conditions
        .iter()
        .map(|c| evaluate_condition(c, ctx, options))
        .collect()
}

/// Combine the results of a top-level list.
///
/// A top-level list has no owning group, so it is combined with the
/// operator of its first element (AND when empty).
pub fn aggregate_activation(evaluated: &[EvaluatedCondition]) -> Activation {
    let operator = evaluated.first().map(|c| c.operators).unwrap_or_default();
    reduce(operator, evaluated.iter().map(|c| c.activation))
}

/// Returns `true` when the top-level list is decidedly active. An empty
/// list is active.
pub fn is_conditions_actived(evaluated: &[EvaluatedCondition]) -> bool {
    aggregate_activation(evaluated).is_active()
}

fn reduce(operator: Operator, activations: impl Iterator<Item = Activation>) -> Activation {
    let (dominant, neutral) = match operator {
        Operator::And => (Activation::Inactive, Activation::Active),
        Operator::Or => (Activation::Active, Activation::Inactive),
    };
    let mut seen_any = false;
    let mut pending = false;
    for activation in activations {
        seen_any = true;
        if activation == dominant {
            return dominant;
        }
        pending |= activation.is_pending();
    }
    if !seen_any {
        return Activation::Active;
    }
    if pending {
        Activation::Pending
    } else {
        neutral
    }
}

fn evaluate_condition(
    condition: &RulesCondition,
    ctx: &EvaluationContext,
    options: &EvaluationOptions,
) -> EvaluatedCondition {
    let condition_type = condition.condition_type();

    let (activation, conditions) = match &condition.kind {
        ConditionKind::Group(children) => {
            let evaluated = evaluate_rules_conditions(children, ctx, options);
            let activation = reduce(condition.operators, evaluated.iter().map(|c| c.activation));
            (activation, evaluated)
        }
        _ if !options.allows(condition_type) => (Activation::Pending, Vec::new()),
        kind => (evaluate_leaf(&condition.id, kind, ctx), Vec::new()),
    };

    EvaluatedCondition {
        id: condition.id.clone(),
        condition_type,
        operators: condition.operators,
        activation,
        conditions,
    }
}

// ---------------------------------------------------------------------------
// Leaf strategies
// ---------------------------------------------------------------------------

fn evaluate_leaf(id: &str, kind: &ConditionKind, ctx: &EvaluationContext) -> Activation {
    match kind {
        ConditionKind::UserAttr(d) => attribute::evaluate(AttributeBizType::User, d, ctx).into(),
        ConditionKind::CompanyAttr(d) => {
            attribute::evaluate(AttributeBizType::Company, d, ctx).into()
        }
        ConditionKind::MembershipAttr(d) => {
            attribute::evaluate(AttributeBizType::Membership, d, ctx).into()
        }
        ConditionKind::CurrentPage(d) => match (&ctx.current_url, ctx.client_conditions.get(id)) {
            (Some(url), _) => is_match_url_pattern(url, &d.includes, &d.excludes).into(),
            (None, Some(reported)) => (*reported).into(),
            (None, None) => Activation::Pending,
        },
        ConditionKind::Event(d) => evaluate_event(d, ctx).into(),
        ConditionKind::Content(d) => {
            let state = ctx.content_state(&d.content_id);
            match d.logic {
                ContentLogic::Actived => state.actived,
                ContentLogic::Unactived => !state.actived,
                ContentLogic::Seen => state.seen,
                ContentLogic::Unseen => !state.seen,
                ContentLogic::Completed => state.completed,
                ContentLogic::Uncompleted => !state.completed,
            }
            .into()
        }
        ConditionKind::Segment(d) => {
            let member = ctx.segments.contains(&d.segment_id);
            match d.logic {
                SegmentLogic::Is => member,
                SegmentLogic::Not => !member,
            }
            .into()
        }
        ConditionKind::Element(d) => from_browser(id, ctx, |obs| match d.logic {
            ElementLogic::Present => obs.is_present(),
            ElementLogic::Unpresent => !obs.is_present(),
            ElementLogic::Disabled => obs.found && obs.disabled,
            ElementLogic::Undisabled => obs.found && !obs.disabled,
            ElementLogic::Clicked => obs.clicked,
            ElementLogic::Unclicked => !obs.clicked,
        }),
        ConditionKind::TextInput(d) => from_browser(id, ctx, |obs| evaluate_text_input(d, obs)),
        ConditionKind::TextFill(_) => from_browser(id, ctx, |obs| obs.found && obs.filled),
        ConditionKind::Time(d) => evaluate_time(d, ctx).into(),
        ConditionKind::Wait(_) => {
            if ctx.fired_wait_timers.contains(id) {
                Activation::Active
            } else {
                Activation::Pending
            }
        }
        ConditionKind::TaskIsClicked => ctx.task_clicked.into(),
        ConditionKind::Unsupported { .. } => Activation::Inactive,
        // Groups are reduced by `evaluate_condition`.
        ConditionKind::Group(_) => Activation::Inactive,
    }
}

/// Resolve a DOM-backed leaf: a verdict reported by the browser wins, then a
/// local observation, otherwise the leaf is pending.
fn from_browser<F>(id: &str, ctx: &EvaluationContext, decide: F) -> Activation
where
    F: FnOnce(&ElementObservation) -> bool,
{
    if let Some(reported) = ctx.client_conditions.get(id) {
        return (*reported).into();
    }
    match ctx.elements.get(id) {
        Some(obs) => decide(obs).into(),
        None => Activation::Pending,
    }
}

fn evaluate_event(data: &EventConditionData, ctx: &EvaluationContext) -> bool {
    // A window reaching back past the representable range has no lower bound.
    let since = data.within_days.and_then(|days| {
        chrono::TimeDelta::try_days(i64::from(days)).and_then(|window| ctx.now.checked_sub_signed(window))
    });
    let count = ctx
        .events
        .iter()
        .filter(|e| e.code == data.event_code)
        .filter(|e| since.map_or(true, |since| e.occurred_at >= since))
        .count();
    count >= data.at_least.max(1) as usize
}

fn evaluate_time(data: &TimeConditionData, ctx: &EvaluationContext) -> bool {
    let after_start = data.start_time.map_or(true, |start| ctx.now >= start);
    let before_end = data.end_time.map_or(true, |end| ctx.now <= end);
    after_start && before_end
}

fn evaluate_text_input(data: &TextInputConditionData, obs: &ElementObservation) -> bool {
    if !obs.found {
        return false;
    }
    let actual = obs.value.as_deref().unwrap_or("");
    let expected = data.value.as_str();

    match data.logic {
        TextLogic::Is => actual == expected,
        TextLogic::Not => actual != expected,
        TextLogic::Contains => actual.contains(expected),
        TextLogic::NotContain => !actual.contains(expected),
        TextLogic::StartsWith => actual.starts_with(expected),
        TextLogic::EndsWith => actual.ends_with(expected),
        TextLogic::Match | TextLogic::Unmatch => match Regex::new(expected) {
            Ok(re) => re.is_match(actual) == (data.logic == TextLogic::Match),
            Err(e) => {
                tracing::warn!(pattern = expected, error = %e, "Invalid text-input pattern");
                false
            }
        },
        TextLogic::Any => !actual.is_empty(),
        TextLogic::Empty => actual.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{
        AttributeConditionData, AttributeLogic, ContentConditionData, ContentState,
        ElementConditionData, EventConditionData, EventOccurrence, PageConditionData,
        WaitConditionData,
    };
    use crate::element::ElementSelector;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn now() -> crate::types::Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).single().expect("valid date")
    }

    fn leaf(id: &str, operators: Operator, kind: ConditionKind) -> RulesCondition {
        RulesCondition {
            id: id.to_string(),
            operators,
            kind,
        }
    }

    fn task(id: &str) -> RulesCondition {
        leaf(id, Operator::And, ConditionKind::TaskIsClicked)
    }

    fn plan_is(id: &str, plan: &str) -> RulesCondition {
        leaf(
            id,
            Operator::And,
            ConditionKind::UserAttr(AttributeConditionData {
                attr_code: "plan".to_string(),
                logic: AttributeLogic::Is,
                value: Some(json!(plan)),
                value2: None,
                list_values: Vec::new(),
            }),
        )
    }

    fn element(id: &str) -> RulesCondition {
        leaf(
            id,
            Operator::And,
            ConditionKind::Element(ElementConditionData {
                element_data: ElementSelector::manual("#save"),
                logic: ElementLogic::Present,
            }),
        )
    }

    fn pro_ctx() -> EvaluationContext {
        let mut ctx = EvaluationContext::new(now());
        ctx.user_attributes.insert("plan".to_string(), json!("pro"));
        ctx
    }

    fn eval(conditions: &[RulesCondition], ctx: &EvaluationContext) -> Vec<EvaluatedCondition> {
        evaluate_rules_conditions(conditions, ctx, &EvaluationOptions::default())
    }

    #[test]
    fn empty_rules_are_active() {
        let evaluated = eval(&[], &EvaluationContext::default());
        assert!(evaluated.is_empty());
        assert!(is_conditions_actived(&evaluated));
    }

    #[test]
    fn and_group_with_one_false_child_is_inactive() {
        let group = RulesCondition {
            id: "g".to_string(),
            operators: Operator::And,
            kind: ConditionKind::Group(vec![
                plan_is("a", "pro"),
                plan_is("b", "pro"),
                plan_is("c", "free"),
            ]),
        };
        let evaluated = eval(&[group], &pro_ctx());
        assert_eq!(evaluated[0].activation, Activation::Inactive);
        assert_eq!(
            evaluated[0]
                .conditions
                .iter()
                .map(|c| c.activation)
                .collect::<Vec<_>>(),
            vec![Activation::Active, Activation::Active, Activation::Inactive]
        );
        assert!(!is_conditions_actived(&evaluated));
    }

    #[test]
    fn or_group_with_one_true_child_is_active() {
        let group = RulesCondition {
            id: "g".to_string(),
            operators: Operator::Or,
            kind: ConditionKind::Group(vec![
                plan_is("a", "free"),
                plan_is("b", "pro"),
                plan_is("c", "free"),
            ]),
        };
        let evaluated = eval(&[group], &pro_ctx());
        assert!(evaluated[0].is_actived());
        assert!(is_conditions_actived(&evaluated));
    }

    #[test]
    fn empty_group_is_active() {
        let group = RulesCondition::group(Operator::And, Vec::new());
        assert!(is_conditions_actived(&eval(&[group], &pro_ctx())));
    }

    #[test]
    fn top_level_list_uses_first_operator() {
        let conditions = [
            leaf("x", Operator::Or, plan_is("x", "free").kind),
            plan_is("y", "pro"),
        ];
        assert!(is_conditions_actived(&eval(&conditions, &pro_ctx())));

        let conditions = [plan_is("x", "free"), plan_is("y", "pro")];
        assert!(!is_conditions_actived(&eval(&conditions, &pro_ctx())));
    }

    #[test]
    fn pending_propagates_unless_dominated() {
        let ctx = pro_ctx();

        let and_group = RulesCondition::group(Operator::And, vec![plan_is("a", "pro"), element("e")]);
        assert_eq!(eval(&[and_group], &ctx)[0].activation, Activation::Pending);

        let and_group = RulesCondition::group(Operator::And, vec![plan_is("a", "free"), element("e")]);
        assert_eq!(eval(&[and_group], &ctx)[0].activation, Activation::Inactive);

        let or_group = RulesCondition::group(Operator::Or, vec![plan_is("a", "pro"), element("e")]);
        assert_eq!(eval(&[or_group], &ctx)[0].activation, Activation::Active);
    }

    #[test]
    fn element_leaf_uses_reported_verdict_then_observation() {
        let conditions = [element("e")];
        let mut ctx = pro_ctx();
        assert_eq!(aggregate_activation(&eval(&conditions, &ctx)), Activation::Pending);

        ctx.elements.insert(
            "e".to_string(),
            ElementObservation {
                found: true,
                visible: true,
                ..Default::default()
            },
        );
        assert!(is_conditions_actived(&eval(&conditions, &ctx)));

        ctx.client_conditions.insert("e".to_string(), false);
        assert!(!is_conditions_actived(&eval(&conditions, &ctx)));
    }

    #[test]
    fn current_page_prefers_known_url() {
        let page = leaf(
            "p",
            Operator::And,
            ConditionKind::CurrentPage(PageConditionData {
                includes: vec!["https://app.example.com/*".to_string()],
                excludes: Vec::new(),
            }),
        );
        let mut ctx = pro_ctx();
        assert_eq!(eval(&[page.clone()], &ctx)[0].activation, Activation::Pending);

        ctx.client_conditions.insert("p".to_string(), true);
        assert!(eval(&[page.clone()], &ctx)[0].is_actived());

        ctx.current_url = Some("https://www.example.com/".to_string());
        assert!(!eval(&[page], &ctx)[0].is_actived());
    }

    #[test]
    fn wait_leaf_is_pending_until_fired() {
        let wait = leaf("w", Operator::And, ConditionKind::Wait(WaitConditionData { second: 3 }));
        let mut ctx = pro_ctx();
        assert!(eval(&[wait.clone()], &ctx)[0].activation.is_pending());
        ctx.fired_wait_timers.insert("w".to_string());
        assert!(eval(&[wait], &ctx)[0].is_actived());
    }

    #[test]
    fn event_leaf_counts_within_window() {
        let event = leaf(
            "ev",
            Operator::And,
            ConditionKind::Event(EventConditionData {
                event_code: "report_exported".to_string(),
                at_least: 2,
                within_days: Some(7),
            }),
        );
        let mut ctx = pro_ctx();
        ctx.events.push(EventOccurrence {
            code: "report_exported".to_string(),
            occurred_at: now() - chrono::Duration::days(1),
        });
        ctx.events.push(EventOccurrence {
            code: "report_exported".to_string(),
            occurred_at: now() - chrono::Duration::days(30),
        });
        assert!(!eval(&[event.clone()], &ctx)[0].is_actived());

        ctx.events.push(EventOccurrence {
            code: "report_exported".to_string(),
            occurred_at: now() - chrono::Duration::days(2),
        });
        assert!(eval(&[event], &ctx)[0].is_actived());
    }

    #[test]
    fn event_window_past_time_range_is_unbounded() {
        let event = leaf(
            "ev",
            Operator::And,
            ConditionKind::Event(EventConditionData {
                event_code: "report_exported".to_string(),
                at_least: 1,
                within_days: Some(u32::MAX),
            }),
        );
        let mut ctx = pro_ctx();
        ctx.events.push(EventOccurrence {
            code: "report_exported".to_string(),
            occurred_at: now() - chrono::Duration::days(3650),
        });
        assert!(eval(&[event], &ctx)[0].is_actived());
    }

    #[test]
    fn content_and_task_leaves() {
        let seen = leaf(
            "c",
            Operator::And,
            ConditionKind::Content(ContentConditionData {
                content_id: "flow-1".to_string(),
                logic: ContentLogic::Unseen,
            }),
        );
        let mut ctx = pro_ctx();
        assert!(!is_conditions_actived(&eval(&[seen.clone(), task("t")], &ctx)));

        ctx.task_clicked = true;
        assert!(is_conditions_actived(&eval(&[seen.clone(), task("t")], &ctx)));

        ctx.contents.insert(
            "flow-1".to_string(),
            ContentState {
                seen: true,
                ..Default::default()
            },
        );
        assert!(!is_conditions_actived(&eval(&[seen], &ctx)));
    }

    #[test]
    fn time_window() {
        let inside = TimeConditionData {
            start_time: Some(now() - chrono::Duration::hours(1)),
            end_time: Some(now() + chrono::Duration::hours(1)),
        };
        let expired = TimeConditionData {
            start_time: None,
            end_time: Some(now() - chrono::Duration::hours(1)),
        };
        let ctx = pro_ctx();
        assert!(evaluate_time(&inside, &ctx));
        assert!(!evaluate_time(&expired, &ctx));
        assert!(evaluate_time(&TimeConditionData::default(), &ctx));
    }

    #[test]
    fn text_input_match_and_invalid_pattern() {
        let obs = ElementObservation {
            found: true,
            value: Some("ACME-42".to_string()),
            ..Default::default()
        };
        let mut data = TextInputConditionData {
            element_data: ElementSelector::manual("input"),
            logic: TextLogic::Match,
            value: r"^[A-Z]+-\d+$".to_string(),
        };
        assert!(evaluate_text_input(&data, &obs));
        data.logic = TextLogic::Unmatch;
        assert!(!evaluate_text_input(&data, &obs));
        data.value = "(".to_string();
        assert!(!evaluate_text_input(&data, &obs));
    }

    #[test]
    fn unsupported_leaf_is_inactive_without_affecting_siblings() {
        let broken = leaf(
            "u",
            Operator::Or,
            ConditionKind::Unsupported {
                type_name: "moon-phase".to_string(),
                data: json!({}),
            },
        );
        let conditions = [broken, plan_is("a", "pro")];
        let evaluated = eval(&conditions, &pro_ctx());
        assert_eq!(evaluated[0].activation, Activation::Inactive);
        assert!(is_conditions_actived(&evaluated));
    }

    #[test]
    fn evaluate_only_skips_other_types() {
        let options = EvaluationOptions::only([ConditionType::TaskIsClicked]);
        let evaluated = evaluate_rules_conditions(&[plan_is("a", "pro")], &pro_ctx(), &options);
        assert!(evaluated[0].activation.is_pending());
    }
}
