//! Topic model, pseudo-topic views and name normalization.
//!
//! # Invariants
//! - `Topic::id` is stable and unique per owner.
//! - Names are non-empty after [`normalize_topic_name`], and unique per owner
//!   by [`topic_name_key`].
//! - Uncategorized and All Topics are views, never persisted rows.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Stable topic identifier. Real topics are always `>= 1`.
pub type TopicId = i64;
/// Owner (user) identifier. Every topic and entry is scoped to one owner.
pub type OwnerId = i64;

/// Conventional wire id of the Uncategorized view.
pub const UNCATEGORIZED_TOPIC_ID: TopicId = 0;
/// Conventional wire id of the All Topics view.
pub const ALL_TOPICS_TOPIC_ID: TopicId = -1;
/// Display name of the Uncategorized view.
pub const UNCATEGORIZED_TOPIC_NAME: &str = "Uncategorized";
/// Display name of the All Topics view.
pub const ALL_TOPICS_TOPIC_NAME: &str = "All Topics";

/// Persisted, owner-scoped topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub owner_id: OwnerId,
    pub name: String,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Derived from entry links at read time.
    pub entry_count: u32,
}

/// Closed set of things a topic list can show.
///
/// The two pseudo-topics are read-only aggregates. They are never targets of
/// assignment and never participate in uniqueness or deletion rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicView {
    Real(Topic),
    Uncategorized { owner_id: OwnerId, entry_count: u32 },
    AllTopics { owner_id: OwnerId, entry_count: u32 },
}

impl TopicView {
    /// Wire id for this view (`0` and `-1` for the pseudo-topics).
    pub fn wire_id(&self) -> TopicId {
        match self {
            Self::Real(topic) => topic.id,
            Self::Uncategorized { .. } => UNCATEGORIZED_TOPIC_ID,
            Self::AllTopics { .. } => ALL_TOPICS_TOPIC_ID,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Real(topic) => topic.name.as_str(),
            Self::Uncategorized { .. } => UNCATEGORIZED_TOPIC_NAME,
            Self::AllTopics { .. } => ALL_TOPICS_TOPIC_NAME,
        }
    }

    pub fn entry_count(&self) -> u32 {
        match self {
            Self::Real(topic) => topic.entry_count,
            Self::Uncategorized { entry_count, .. } | Self::AllTopics { entry_count, .. } => {
                *entry_count
            }
        }
    }

    /// Whether entries may be bound to this view.
    pub fn is_assignable(&self) -> bool {
        matches!(self, Self::Real(_))
    }
}

/// Read-only view of one owner's taxonomy at a given version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaxonomySnapshot {
    pub owner_id: OwnerId,
    /// Optimistic-concurrency version the snapshot was read at.
    pub version: u64,
    /// Active topics sorted by ascending id.
    pub topics: Vec<Topic>,
    /// Entries with no topic at snapshot time.
    pub uncategorized_count: u32,
}

impl TaxonomySnapshot {
    pub fn topic(&self, id: TopicId) -> Option<&Topic> {
        self.topics
            .binary_search_by_key(&id, |topic| topic.id)
            .ok()
            .map(|index| &self.topics[index])
    }

    pub fn contains(&self, id: TopicId) -> bool {
        self.topic(id).is_some()
    }

    /// Topic list as shown to a user: the two pseudo-topics, then real topics.
    pub fn views(&self) -> Vec<TopicView> {
        let categorized: u32 = self.topics.iter().map(|topic| topic.entry_count).sum();
        let mut views = Vec::with_capacity(self.topics.len() + 2);
        views.push(TopicView::AllTopics {
            owner_id: self.owner_id,
            entry_count: categorized + self.uncategorized_count,
        });
        views.push(TopicView::Uncategorized {
            owner_id: self.owner_id,
            entry_count: self.uncategorized_count,
        });
        views.extend(self.topics.iter().cloned().map(TopicView::Real));
        views
    }
}

/// Trims and collapses internal whitespace. Returns `None` for blank input.
pub fn normalize_topic_name(name: &str) -> Option<String> {
    let collapsed = WHITESPACE_RE.replace_all(name.trim(), " ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.into_owned())
    }
}

/// Case-folded uniqueness key for a topic name.
pub fn topic_name_key(name: &str) -> String {
    normalize_topic_name(name)
        .map(|value| value.to_lowercase())
        .unwrap_or_default()
}

/// Whether `name` collides with one of the pseudo-topic names.
pub fn is_reserved_topic_name(name: &str) -> bool {
    let key = topic_name_key(name);
    key == UNCATEGORIZED_TOPIC_NAME.to_lowercase() || key == ALL_TOPICS_TOPIC_NAME.to_lowercase()
}

/// Whether `id` is a pseudo-topic wire id rather than a real topic id.
pub fn is_pseudo_topic_id(id: TopicId) -> bool {
    id == UNCATEGORIZED_TOPIC_ID || id == ALL_TOPICS_TOPIC_ID
}

#[cfg(test)]
mod tests {
    use super::{
        is_pseudo_topic_id, is_reserved_topic_name, normalize_topic_name, topic_name_key,
        TaxonomySnapshot, Topic, TopicView,
    };

    fn topic(id: i64, name: &str, entry_count: u32) -> Topic {
        Topic {
            id,
            owner_id: 1,
            name: name.to_string(),
            created_at: 0,
            entry_count,
        }
    }

    #[test]
    fn normalize_collapses_whitespace_and_rejects_blank() {
        assert_eq!(
            normalize_topic_name("  Travel \t  Plans ").as_deref(),
            Some("Travel Plans")
        );
        assert_eq!(normalize_topic_name(" \n "), None);
        assert_eq!(topic_name_key("travel  PLANS"), "travel plans");
    }

    #[test]
    fn reserved_names_and_ids_are_detected() {
        assert!(is_reserved_topic_name(" uncategorized "));
        assert!(is_reserved_topic_name("ALL   topics"));
        assert!(!is_reserved_topic_name("Work"));
        assert!(is_pseudo_topic_id(0));
        assert!(is_pseudo_topic_id(-1));
        assert!(!is_pseudo_topic_id(1));
    }

    #[test]
    fn views_put_pseudo_topics_first_with_aggregate_counts() {
        let snapshot = TaxonomySnapshot {
            owner_id: 1,
            version: 3,
            topics: vec![topic(2, "Work", 4), topic(5, "Travel", 1)],
            uncategorized_count: 2,
        };
        let views = snapshot.views();
        assert_eq!(views.len(), 4);
        assert_eq!(views[0].wire_id(), -1);
        assert_eq!(views[0].entry_count(), 7);
        assert_eq!(views[1].wire_id(), 0);
        assert_eq!(views[1].entry_count(), 2);
        assert!(!views[1].is_assignable());
        assert!(matches!(&views[2], TopicView::Real(t) if t.name == "Work"));
        assert_eq!(snapshot.topic(5).map(|t| t.name.as_str()), Some("Travel"));
        assert!(!snapshot.contains(3));
    }
}
