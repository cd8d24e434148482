//! Element selector descriptors and DOM observations.
//!
//! A selector descriptor is what the builder records when an author points
//! at an element: a list of candidate CSS selectors ranked from most to
//! least specific, the precision the author accepted, and an optional
//! hand-written selector that overrides the candidates.

use serde::{Deserialize, Serialize};

/// How the element was chosen in the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    /// Resolved from the recorded candidate selectors.
    #[default]
    Auto,
    /// Resolved from `custom_selector` only.
    Manual,
}

/// How many of the recorded candidate selectors an element must satisfy.
///
/// Recorded descriptors carry only the level name. The share of candidates
/// each level demands is chosen here, in evenly spaced quarters between
/// "any one candidate" and "every candidate", and is not part of the
/// recorded data. Stricter levels never require fewer matches than looser
/// ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Loosest,
    Looser,
    Loose,
    #[default]
    Stricter,
    Strictest,
}

impl Precision {
    /// Share of the recorded candidates that must match.
    pub fn match_ratio(self) -> f64 {
        match self {
            Self::Loosest => 0.0,
            Self::Looser => 0.25,
            Self::Loose => 0.5,
            Self::Stricter => 0.75,
            Self::Strictest => 1.0,
        }
    }

    /// Minimum number of candidate selectors that must match an element,
    /// out of `total` recorded candidates. At least one whenever any were
    /// recorded.
    pub fn required_matches(self, total: usize) -> usize {
        if total == 0 {
            return 0;
        }
        ((total as f64 * self.match_ratio()).ceil() as usize).clamp(1, total)
    }
}

/// A recorded selector descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSelector {
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_selector: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: SelectorKind,
}

impl ElementSelector {
    /// A manual selector descriptor.
    pub fn manual(selector: impl Into<String>) -> Self {
        Self {
            custom_selector: Some(selector.into()),
            kind: SelectorKind::Manual,
            ..Default::default()
        }
    }

    /// An auto descriptor from ranked candidate selectors.
    pub fn auto<I, S>(selectors: I, precision: Precision) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selectors: selectors.into_iter().map(Into::into).collect(),
            precision,
            ..Default::default()
        }
    }
}

/// What the browser currently knows about the element behind a condition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementObservation {
    pub found: bool,
    pub visible: bool,
    pub disabled: bool,
    /// The element has been clicked since tracking started.
    pub clicked: bool,
    /// The user has typed into the element since tracking started.
    pub filled: bool,
    /// Current value of an input-like element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ElementObservation {
    /// The element is in the DOM and rendered.
    pub fn is_present(&self) -> bool {
        self.found && self.visible
    }
}
