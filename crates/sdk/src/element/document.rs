//! The DOM surface the SDK needs, as a trait.
//!
//! The host binding (a browser bridge, a headless renderer, a test fixture)
//! implements [`Document`]. A document spans every same-origin frame: each
//! node belongs to a frame, and a frame other than the top window is hosted
//! by an owner element in its parent frame.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Identifies one window (the top document or an iframe's document).
pub type FrameId = u64;

/// The top-level window.
pub const TOP_FRAME: FrameId = 0;

/// The subset of computed style that decides visibility.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComputedStyle {
    pub display_none: bool,
    pub visibility_hidden: bool,
    pub opacity: f64,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display_none: false,
            visibility_hidden: false,
            opacity: 1.0,
        }
    }
}

/// Interaction facts about one element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeState {
    pub disabled: bool,
    /// Current value of an input-like element.
    pub value: Option<String>,
    /// Clicked since the page loaded.
    pub clicked: bool,
    /// Typed into since the page loaded.
    pub filled: bool,
}

pub trait Document {
    type Node: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Attached elements matching `selector`, in document order. An
    /// unparseable selector matches nothing.
    fn query_selector_all(&self, selector: &str) -> Vec<Self::Node>;

    /// Parent element within the same frame.
    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    fn frame_of(&self, node: &Self::Node) -> FrameId;

    /// The element hosting `frame` in its parent frame. `None` for the top
    /// window and for frames the SDK cannot reach.
    fn frame_owner(&self, frame: FrameId) -> Option<Self::Node>;

    fn style(&self, node: &Self::Node) -> ComputedStyle;

    fn node_state(&self, node: &Self::Node) -> NodeState;
}

// ---------------------------------------------------------------------------
// In-memory document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct MemoryNode {
    parent: Option<NodeId>,
    frame: FrameId,
    selectors: Vec<String>,
    style: ComputedStyle,
    state: NodeState,
    detached: bool,
}

/// A [`Document`] held entirely in memory.
///
/// Selector matching is literal: a node matches the selectors it was
/// created with. Useful for headless hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    nodes: Vec<MemoryNode>,
    frame_owners: HashMap<FrameId, NodeId>,
    next_frame: FrameId,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self {
            next_frame: TOP_FRAME + 1,
            ..Default::default()
        }
    }

    /// Append an element under `parent`, or at the root of the top window.
    pub fn append(&mut self, parent: Option<NodeId>, selectors: &[&str]) -> NodeId {
        let frame = parent
            .and_then(|p| self.nodes.get(p.0))
            .map_or(TOP_FRAME, |n| n.frame);
        self.insert(parent, frame, selectors)
    }

    /// Create a frame hosted by `owner` and return its id.
    pub fn attach_frame(&mut self, owner: NodeId) -> FrameId {
        let frame = self.next_frame;
        self.next_frame += 1;
        self.frame_owners.insert(frame, owner);
        frame
    }

    /// Re-host an existing frame, e.g. to build a nesting cycle.
    pub fn set_frame_owner(&mut self, frame: FrameId, owner: NodeId) {
        self.frame_owners.insert(frame, owner);
    }

    /// Append an element at the root of `frame`.
    pub fn append_in_frame(&mut self, frame: FrameId, selectors: &[&str]) -> NodeId {
        self.insert(None, frame, selectors)
    }

    pub fn set_style(&mut self, node: NodeId, style: ComputedStyle) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.style = style;
        }
    }

    pub fn set_state(&mut self, node: NodeId, state: NodeState) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.state = state;
        }
    }

    /// Detach `node` and its subtree.
    pub fn remove(&mut self, node: NodeId) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.detached = true;
        }
    }

    fn insert(&mut self, parent: Option<NodeId>, frame: FrameId, selectors: &[&str]) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(MemoryNode {
            parent,
            frame,
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            style: ComputedStyle::default(),
            state: NodeState::default(),
            detached: false,
        });
        id
    }

    fn is_attached(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            match self.nodes.get(id.0) {
                Some(n) if !n.detached => current = n.parent,
                _ => return false,
            }
        }
        true
    }
}

impl Document for MemoryDocument {
    type Node = NodeId;

    fn query_selector_all(&self, selector: &str) -> Vec<NodeId> {
        (0..self.nodes.len())
            .map(NodeId)
            .filter(|id| self.nodes[id.0].selectors.iter().any(|s| s == selector))
            .filter(|id| self.is_attached(*id))
            .collect()
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    fn frame_of(&self, node: &NodeId) -> FrameId {
        self.nodes.get(node.0).map_or(TOP_FRAME, |n| n.frame)
    }

    fn frame_owner(&self, frame: FrameId) -> Option<NodeId> {
        self.frame_owners.get(&frame).copied()
    }

    fn style(&self, node: &NodeId) -> ComputedStyle {
        self.nodes.get(node.0).map(|n| n.style).unwrap_or_default()
    }

    fn node_state(&self, node: &NodeId) -> NodeState {
        self.nodes
            .get(node.0)
            .map(|n| n.state.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_subtrees_do_not_match() {
        let mut doc = MemoryDocument::new();
        let form = doc.append(None, &["form"]);
        let button = doc.append(Some(form), &["button", "#save"]);

        assert_eq!(doc.query_selector_all("#save"), vec![button]);
        doc.remove(form);
        assert!(doc.query_selector_all("#save").is_empty());
    }

    #[test]
    fn frames_inherit_from_their_parent() {
        let mut doc = MemoryDocument::new();
        let iframe = doc.append(None, &["iframe"]);
        let frame = doc.attach_frame(iframe);
        let body = doc.append_in_frame(frame, &["body"]);
        let input = doc.append(Some(body), &["input"]);

        assert_eq!(doc.frame_of(&iframe), TOP_FRAME);
        assert_eq!(doc.frame_of(&input), frame);
        assert_eq!(doc.frame_owner(frame), Some(iframe));
        assert_eq!(doc.frame_owner(TOP_FRAME), None);
    }
}
