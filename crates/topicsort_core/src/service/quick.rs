//! Quick-categorize: advisory ranked suggestions per entry.
//!
//! No clustering across entries and no floor: every usable suggestion is
//! ranked and the list is cut at the configured length.

use crate::engine::reconcile::{rank_suggestions, ReconcileOptions};
use crate::model::entry::{Entry, EntryId};
use crate::model::suggestion::{EntrySuggestions, TopicSuggestion};
use crate::model::topic::TaxonomySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ranked suggestions for one entry, descending confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickCategorizeProposal {
    pub entry_id: EntryId,
    pub content: String,
    pub suggestions: Vec<TopicSuggestion>,
}

/// Builds one proposal per entry, in `entries` order.
///
/// Entries absent from `raw` get an empty suggestion list; completeness is
/// enforced by the fetch step.
pub fn build_quick_proposals(
    entries: &[Entry],
    raw: &[EntrySuggestions],
    snapshot: &TaxonomySnapshot,
    options: &ReconcileOptions,
    max_suggestions: usize,
) -> Vec<QuickCategorizeProposal> {
    let mut by_entry: BTreeMap<EntryId, Vec<TopicSuggestion>> = BTreeMap::new();
    for record in raw {
        by_entry
            .entry(record.entry_id)
            .or_default()
            .extend(record.suggestions.iter().cloned());
    }

    entries
        .iter()
        .map(|entry| {
            let mut suggestions = by_entry
                .get(&entry.id)
                .map(|raw| rank_suggestions(raw, snapshot, options))
                .unwrap_or_default();
            suggestions.truncate(max_suggestions);
            QuickCategorizeProposal {
                entry_id: entry.id,
                content: entry.content.clone(),
                suggestions,
            }
        })
        .collect()
}

/// Drops repeated ids, keeping first-seen order.
pub(crate) fn dedupe_preserving_order(entry_ids: &[EntryId]) -> Vec<EntryId> {
    let mut seen = std::collections::BTreeSet::new();
    entry_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{build_quick_proposals, dedupe_preserving_order};
    use crate::engine::reconcile::ReconcileOptions;
    use crate::model::entry::Entry;
    use crate::model::suggestion::{EntrySuggestions, TopicSuggestion};
    use crate::model::topic::{TaxonomySnapshot, Topic};

    fn snapshot() -> TaxonomySnapshot {
        TaxonomySnapshot {
            owner_id: 1,
            version: 1,
            topics: vec![Topic {
                id: 2,
                owner_id: 1,
                name: "Work".to_string(),
                created_at: 0,
                entry_count: 0,
            }],
            uncategorized_count: 1,
        }
    }

    #[test]
    fn proposals_follow_entry_order_and_truncate() {
        let entries = vec![
            Entry {
                id: 9,
                owner_id: 1,
                content: "b".to_string(),
                topic_id: None,
                created_at: 0,
            },
            Entry {
                id: 5,
                owner_id: 1,
                content: "a".to_string(),
                topic_id: None,
                created_at: 0,
            },
        ];
        let raw = vec![
            EntrySuggestions::new(
                5,
                vec![
                    TopicSuggestion::propose_new("New Hobby", 0.3),
                    TopicSuggestion::existing(2, "Work", 0.8),
                    TopicSuggestion::propose_new("Gardening", 0.2),
                ],
            ),
            EntrySuggestions::new(9, Vec::new()),
        ];

        let proposals =
            build_quick_proposals(&entries, &raw, &snapshot(), &ReconcileOptions::default(), 2);

        assert_eq!(proposals[0].entry_id, 9);
        assert!(proposals[0].suggestions.is_empty());
        let names: Vec<&str> = proposals[1]
            .suggestions
            .iter()
            .map(|suggestion| suggestion.name.as_str())
            .collect();
        assert_eq!(names, vec!["Work", "New Hobby"]);
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        assert_eq!(dedupe_preserving_order(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }
}
