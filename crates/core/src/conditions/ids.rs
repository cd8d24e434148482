//! Tree utilities over rules-condition ids.
//!
//! Ids are only required to be unique within a single content version.
//! Duplicating a version must therefore regenerate every id while keeping
//! the tree shape intact.

use std::collections::HashSet;

use super::{ConditionType, RulesCondition};
use crate::types::ConditionId;

/// A fresh, globally unique condition id.
pub fn new_condition_id() -> ConditionId {
    uuid::Uuid::new_v4().to_string()
}

/// Return a copy of `conditions` in which every node (groups included) has a
/// new id. Structure, operators and payloads are preserved.
pub fn regenerate_condition_ids(conditions: &[RulesCondition]) -> Vec<RulesCondition> {
    let mut cloned = conditions.to_vec();
    for condition in &mut cloned {
        visit_mut(condition, &mut |c| c.id = new_condition_id());
    }
    cloned
}

/// Assign ids to nodes parsed without one.
pub fn backfill_condition_ids(conditions: &mut [RulesCondition]) {
    for condition in conditions {
        visit_mut(condition, &mut |c| {
            if c.id.is_empty() {
                c.id = new_condition_id();
            }
        });
    }
}

/// Every id in the tree, depth-first.
pub fn collect_condition_ids(conditions: &[RulesCondition]) -> Vec<ConditionId> {
    let mut ids = Vec::new();
    for condition in conditions {
        visit(condition, &mut |c| ids.push(c.id.clone()));
    }
    ids
}

/// Ids that occur more than once, in first-repeat order.
pub fn find_duplicate_ids(conditions: &[RulesCondition]) -> Vec<ConditionId> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for id in collect_condition_ids(conditions) {
        if !seen.insert(id.clone()) && !duplicates.contains(&id) {
            duplicates.push(id);
        }
    }
    duplicates
}

/// All leaves of the tree, depth-first.
pub fn flatten_leaves(conditions: &[RulesCondition]) -> Vec<&RulesCondition> {
    let mut leaves = Vec::new();
    for condition in conditions {
        collect_leaves(condition, &mut leaves);
    }
    leaves
}

fn collect_leaves<'a>(condition: &'a RulesCondition, out: &mut Vec<&'a RulesCondition>) {
    match condition.condition_type() {
        ConditionType::Group => {
            for child in condition.children() {
                collect_leaves(child, out);
            }
        }
        _ => out.push(condition),
    }
}

/// Leaves of the given types, depth-first.
pub fn filter_conditions<'a>(
    conditions: &'a [RulesCondition],
    types: &[ConditionType],
) -> Vec<&'a RulesCondition> {
    flatten_leaves(conditions)
        .into_iter()
        .filter(|c| types.contains(&c.condition_type()))
        .collect()
}

/// Find a node by id anywhere in the tree.
pub fn find_condition<'a>(conditions: &'a [RulesCondition], id: &str) -> Option<&'a RulesCondition> {
    for condition in conditions {
        if condition.id == id {
            return Some(condition);
        }
        if let Some(found) = find_condition(condition.children(), id) {
            return Some(found);
        }
    }
    None
}

fn visit(condition: &RulesCondition, f: &mut impl FnMut(&RulesCondition)) {
    f(condition);
    for child in condition.children() {
        visit(child, f);
    }
}

fn visit_mut(condition: &mut RulesCondition, f: &mut impl FnMut(&mut RulesCondition)) {
    f(condition);
    if let super::ConditionKind::Group(children) = &mut condition.kind {
        for child in children {
            visit_mut(child, f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{ConditionKind, Operator, WaitConditionData};

    fn sample() -> Vec<RulesCondition> {
        vec![
            RulesCondition::group(
                Operator::Or,
                vec![
                    RulesCondition::new(Operator::And, ConditionKind::TaskIsClicked),
                    RulesCondition::group(
                        Operator::And,
                        vec![RulesCondition::new(
                            Operator::And,
                            ConditionKind::Wait(WaitConditionData { second: 2 }),
                        )],
                    ),
                ],
            ),
            RulesCondition::new(Operator::And, ConditionKind::TaskIsClicked),
        ]
    }

    fn shape(conditions: &[RulesCondition]) -> Vec<(usize, ConditionType, Operator)> {
        fn walk(c: &RulesCondition, depth: usize, out: &mut Vec<(usize, ConditionType, Operator)>) {
            out.push((depth, c.condition_type(), c.operators));
            for child in c.children() {
                walk(child, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        for c in conditions {
            walk(c, 0, &mut out);
        }
        out
    }

    #[test]
    fn regenerate_preserves_structure_with_fresh_ids() {
        let original = sample();
        let copy = regenerate_condition_ids(&original);

        assert_eq!(shape(&original), shape(&copy));

        let before: HashSet<_> = collect_condition_ids(&original).into_iter().collect();
        let after = collect_condition_ids(&copy);
        assert_eq!(after.len(), 5);
        assert!(after.iter().all(|id| !before.contains(id)));
        assert!(find_duplicate_ids(&copy).is_empty());
    }

    #[test]
    fn backfill_fills_only_missing_ids() {
        let mut tree = sample();
        tree[1].id.clear();
        let kept = tree[0].id.clone();

        backfill_condition_ids(&mut tree);
        assert_eq!(tree[0].id, kept);
        assert!(!tree[1].id.is_empty());
    }

    #[test]
    fn finds_duplicates_and_nodes() {
        let mut tree = sample();
        tree[1].id = tree[0].id.clone();
        assert_eq!(find_duplicate_ids(&tree), vec![tree[0].id.clone()]);

        let nested_id = tree[0].children()[1].children()[0].id.clone();
        let found = find_condition(&tree, &nested_id).expect("nested node");
        assert_eq!(found.condition_type(), ConditionType::Wait);
        assert!(find_condition(&tree, "nope").is_none());
    }

    #[test]
    fn flatten_and_filter_leaves() {
        let tree = sample();
        assert_eq!(flatten_leaves(&tree).len(), 3);
        assert_eq!(filter_conditions(&tree, &[ConditionType::Wait]).len(), 1);
        assert_eq!(filter_conditions(&tree, &[ConditionType::TaskIsClicked]).len(), 2);
    }
}
