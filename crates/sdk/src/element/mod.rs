//! Element resolution over an abstract [`Document`].

pub mod document;
pub mod finder;
pub mod visibility;
pub mod watcher;

pub use document::{ComputedStyle, Document, FrameId, MemoryDocument, NodeId, NodeState};
pub use finder::{find_element, observe_element};
pub use visibility::is_visible;
pub use watcher::{ElementEvent, ElementWatcher};
