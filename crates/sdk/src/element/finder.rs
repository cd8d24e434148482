//! Resolve a recorded selector descriptor to one element.

use waypoint_core::element::{ElementObservation, ElementSelector, SelectorKind};

use super::document::Document;
use super::visibility::is_visible;

/// Resolve `selector` to at most one attached element.
///
/// A manual descriptor uses its custom selector and takes the first match.
/// An auto descriptor scores every element by how many of the recorded
/// candidate selectors match it; the best-scoring element wins if it meets
/// the precision threshold, with ties going to the element found first.
pub fn find_element<D: Document>(doc: &D, selector: &ElementSelector) -> Option<D::Node> {
    match selector.kind {
        SelectorKind::Manual => {
            let custom = selector.custom_selector.as_deref()?.trim();
            if custom.is_empty() {
                return None;
            }
            doc.query_selector_all(custom).into_iter().next()
        }
        SelectorKind::Auto => find_by_candidates(doc, selector),
    }
}

fn find_by_candidates<D: Document>(doc: &D, selector: &ElementSelector) -> Option<D::Node> {
    let required = selector.precision.required_matches(selector.selectors.len());
    if required == 0 {
        return None;
    }

    // (node, hits) in first-seen order.
    let mut tally: Vec<(D::Node, usize)> = Vec::new();
    for candidate in &selector.selectors {
        for node in doc.query_selector_all(candidate) {
            match tally.iter_mut().find(|(n, _)| *n == node) {
                Some((_, hits)) => *hits += 1,
                None => tally.push((node, 1)),
            }
        }
    }

    let mut best: Option<(D::Node, usize)> = None;
    for (node, hits) in tally {
        if hits >= required && best.as_ref().map_or(true, |(_, b)| hits > *b) {
            best = Some((node, hits));
        }
    }
    best.map(|(node, _)| node)
}

/// Everything the evaluator needs to know about the element behind
/// `selector`.
pub fn observe_element<D: Document>(doc: &D, selector: &ElementSelector) -> ElementObservation {
    match find_element(doc, selector) {
        Some(node) => {
            let state = doc.node_state(&node);
            ElementObservation {
                found: true,
                visible: is_visible(doc, &node),
                disabled: state.disabled,
                clicked: state.clicked,
                filled: state.filled,
                value: state.value,
            }
        }
        None => ElementObservation::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::document::{MemoryDocument, NodeState};
    use waypoint_core::element::Precision;

    #[test]
    fn manual_takes_the_first_match() {
        let mut doc = MemoryDocument::new();
        let first = doc.append(None, &[".item"]);
        doc.append(None, &[".item"]);

        let found = find_element(&doc, &ElementSelector::manual(".item"));
        assert_eq!(found, Some(first));
        assert_eq!(find_element(&doc, &ElementSelector::manual("  ")), None);
    }

    #[test]
    fn auto_requires_precision_threshold() {
        let mut doc = MemoryDocument::new();
        let save = doc.append(None, &["#save", "button.primary", "form > button"]);
        doc.append(None, &["button.primary"]);

        let strict = ElementSelector::auto(
            ["#save", "button.primary", "form > button", "[data-x]"],
            Precision::Stricter,
        );
        // 3 of 4 candidates match `save`, Stricter needs 3.
        assert_eq!(find_element(&doc, &strict), Some(save));

        let strictest = ElementSelector { precision: Precision::Strictest, ..strict };
        assert_eq!(find_element(&doc, &strictest), None);
    }

    #[test]
    fn auto_prefers_the_best_scoring_element() {
        let mut doc = MemoryDocument::new();
        let weak = doc.append(None, &["button"]);
        let strong = doc.append(None, &["button", ".cta"]);

        let selector = ElementSelector::auto(["button", ".cta"], Precision::Loosest);
        assert_eq!(find_element(&doc, &selector), Some(strong));
        assert_ne!(find_element(&doc, &selector), Some(weak));
    }

    #[test]
    fn auto_without_candidates_finds_nothing() {
        let mut doc = MemoryDocument::new();
        doc.append(None, &["button"]);
        let selector = ElementSelector::auto(Vec::<String>::new(), Precision::Loosest);
        assert_eq!(find_element(&doc, &selector), None);
    }

    #[test]
    fn observation_reflects_node_state() {
        let mut doc = MemoryDocument::new();
        let input = doc.append(None, &["#email"]);
        doc.set_state(
            input,
            NodeState {
                value: Some("a@b.c".into()),
                filled: true,
                ..Default::default()
            },
        );

        let obs = observe_element(&doc, &ElementSelector::manual("#email"));
        assert!(obs.is_present());
        assert!(obs.filled);
        assert_eq!(obs.value.as_deref(), Some("a@b.c"));

        let missing = observe_element(&doc, &ElementSelector::manual("#nope"));
        assert_eq!(missing, ElementObservation::default());
    }
}
