//! Rendered-visibility check.
//!
//! Walks from the element up to the root of its frame, then continues from
//! the frame's owner element in the parent frame. Each frame is crossed at
//! most once and at most [`MAX_FRAME_DEPTH`] frames are crossed, so a
//! malformed frame chain cannot loop.

use std::collections::HashSet;

use super::document::{ComputedStyle, Document, FrameId};

/// Elements below this opacity count as hidden.
pub const MIN_VISIBLE_OPACITY: f64 = 0.01;

pub const MAX_FRAME_DEPTH: usize = 16;

fn hides(style: &ComputedStyle) -> bool {
    style.display_none || style.visibility_hidden || style.opacity < MIN_VISIBLE_OPACITY
}

/// `true` when neither the element nor any ancestor (across frames) hides
/// it.
///
/// When the frame chain revisits a frame or exceeds the depth bound the walk
/// stops and the ancestors checked so far decide.
pub fn is_visible<D: Document>(doc: &D, node: &D::Node) -> bool {
    let mut visited: HashSet<FrameId> = HashSet::new();
    let mut current = Some(node.clone());

    while let Some(n) = current {
        if hides(&doc.style(&n)) {
            return false;
        }
        current = match doc.parent(&n) {
            Some(parent) => Some(parent),
            None => {
                let frame = doc.frame_of(&n);
                if !visited.insert(frame) {
                    tracing::debug!(frame, "Frame chain revisits a frame, stopping");
                    break;
                }
                if visited.len() > MAX_FRAME_DEPTH {
                    tracing::debug!(depth = visited.len(), "Frame chain too deep, stopping");
                    break;
                }
                doc.frame_owner(frame)
            }
        };
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::document::MemoryDocument;

    fn hidden_by(f: impl FnOnce(&mut ComputedStyle)) -> ComputedStyle {
        let mut style = ComputedStyle::default();
        f(&mut style);
        style
    }

    #[test]
    fn hidden_ancestor_hides_the_element() {
        let mut doc = MemoryDocument::new();
        let panel = doc.append(None, &["#panel"]);
        let button = doc.append(Some(panel), &["button"]);
        assert!(is_visible(&doc, &button));

        doc.set_style(panel, hidden_by(|s| s.display_none = true));
        assert!(!is_visible(&doc, &button));

        doc.set_style(panel, hidden_by(|s| s.visibility_hidden = true));
        assert!(!is_visible(&doc, &button));
    }

    #[test]
    fn opacity_threshold() {
        let mut doc = MemoryDocument::new();
        let node = doc.append(None, &["div"]);

        doc.set_style(node, hidden_by(|s| s.opacity = 0.005));
        assert!(!is_visible(&doc, &node));

        doc.set_style(node, hidden_by(|s| s.opacity = 0.01));
        assert!(is_visible(&doc, &node));
    }

    #[test]
    fn crosses_into_the_owning_frame() {
        let mut doc = MemoryDocument::new();
        let wrapper = doc.append(None, &["#wrapper"]);
        let iframe = doc.append(Some(wrapper), &["iframe"]);
        let frame = doc.attach_frame(iframe);
        let input = doc.append_in_frame(frame, &["input"]);
        assert!(is_visible(&doc, &input));

        doc.set_style(wrapper, hidden_by(|s| s.display_none = true));
        assert!(!is_visible(&doc, &input));
    }

    #[test]
    fn frame_cycle_terminates() {
        let mut doc = MemoryDocument::new();
        let host = doc.append(None, &["iframe#a"]);
        let frame_a = doc.attach_frame(host);
        let owner_b = doc.append_in_frame(frame_a, &["iframe#b"]);
        let frame_b = doc.attach_frame(owner_b);
        let owner_a = doc.append_in_frame(frame_b, &["iframe#a2"]);
        // frame_a is now hosted inside frame_b, which is hosted inside frame_a.
        doc.set_frame_owner(frame_a, owner_a);
        let target = doc.append_in_frame(frame_b, &["button"]);

        assert!(is_visible(&doc, &target));
    }
}
