//! Oracle suggestion model.
//!
//! # Invariants
//! - A suggestion targets either an existing topic id or a not-yet-created
//!   topic; there is no nullable id.
//! - `confidence` is always inside `[0, 1]` once built via
//!   [`TopicSuggestion::existing`] / [`TopicSuggestion::propose_new`].

use crate::model::entry::EntryId;
use crate::model::topic::TopicId;
use serde::{Deserialize, Serialize};

/// Target of one suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicRef {
    /// Bind to an existing topic.
    Existing(TopicId),
    /// Create a new topic named by the suggestion's `name`.
    ProposeNew,
}

impl TopicRef {
    pub fn topic_id(self) -> Option<TopicId> {
        match self {
            Self::Existing(id) => Some(id),
            Self::ProposeNew => None,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, Self::ProposeNew)
    }
}

/// One candidate topic for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSuggestion {
    pub target: TopicRef,
    /// Display name: the existing topic's name, or the proposed new name.
    pub name: String,
    pub confidence: f64,
}

impl TopicSuggestion {
    pub fn existing(topic_id: TopicId, name: impl Into<String>, confidence: f64) -> Self {
        Self {
            target: TopicRef::Existing(topic_id),
            name: name.into(),
            confidence: clamp_confidence(confidence),
        }
    }

    pub fn propose_new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            target: TopicRef::ProposeNew,
            name: name.into(),
            confidence: clamp_confidence(confidence),
        }
    }
}

/// Raw oracle output for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySuggestions {
    pub entry_id: EntryId,
    pub suggestions: Vec<TopicSuggestion>,
}

impl EntrySuggestions {
    pub fn new(entry_id: EntryId, suggestions: Vec<TopicSuggestion>) -> Self {
        Self {
            entry_id,
            suggestions,
        }
    }
}

/// Clamps into `[0, 1]`; NaN becomes `0`.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{clamp_confidence, TopicRef, TopicSuggestion};

    #[test]
    fn clamp_confidence_handles_out_of_range_and_nan() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[test]
    fn constructors_tag_target_kind() {
        let existing = TopicSuggestion::existing(7, "Work", 0.8);
        assert_eq!(existing.target.topic_id(), Some(7));
        assert!(!existing.target.is_new());

        let new = TopicSuggestion::propose_new("Travel", 2.0);
        assert_eq!(new.target, TopicRef::ProposeNew);
        assert_eq!(new.confidence, 1.0);
    }
}
