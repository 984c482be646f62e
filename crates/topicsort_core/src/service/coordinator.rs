//! Proposal coordinator: validates an approved proposal set and commits it.
//!
//! # Responsibility
//! - Turn a self-describing [`ProposalSet`] into a storage [`CommitPlan`].
//! - Commit it as one atomic unit of work through the taxonomy store.
//!
//! # Invariants
//! - A malformed set is rejected before the store is touched.
//! - Drifted topics, entries moved since the proposal, or a moved-on taxonomy
//!   version fail the whole apply, with or without a snapshot version.
//! - Re-applying an already-applied set succeeds without writing.

use crate::model::entry::EntryId;
use crate::model::proposal::ProposalSet;
use crate::model::topic::{
    is_reserved_topic_name, normalize_topic_name, topic_name_key, OwnerId, Topic, TopicId,
};
use crate::repo::taxonomy_repo::{
    CommitPlan, EntryBinding, ExpectedTopic, PlannedTopic, TaxonomyStore,
};
use crate::service::error::ApplyError;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Outcome of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub topics_created: u32,
    pub created_topics: Vec<Topic>,
    pub entries_reassigned: u32,
    /// The store already matched the set; nothing was written.
    pub already_applied: bool,
    /// Taxonomy version after the apply.
    pub taxonomy_version: u64,
}

/// Validates `set` and commits it for `owner_id`.
///
/// `snapshot_version` is the version the set was computed against. When
/// given, any taxonomy change since then fails the apply; when absent only
/// the referenced topics are checked for drift.
///
/// # Errors
/// - `Validation` for malformed sets (pseudo-topic targets, duplicate
///   entries, blank/reserved/duplicate new names, foreign owner).
/// - `StaleProposal` when referenced topics were deleted or renamed, an
///   entry's topic link changed since the set was computed, or the version
///   moved on.
/// - `NotFound` for entries or topics that never existed for the owner.
pub fn apply_proposal_set<S: TaxonomyStore + ?Sized>(
    store: &mut S,
    owner_id: OwnerId,
    set: &ProposalSet,
    snapshot_version: Option<u64>,
) -> Result<CommitResult, ApplyError> {
    let started_at = Instant::now();
    let result = build_commit_plan(owner_id, set, snapshot_version).and_then(|plan| {
        let outcome = store.commit_plan(owner_id, &plan)?;
        Ok(CommitResult {
            topics_created: u32::try_from(outcome.created_topics.len()).unwrap_or(u32::MAX),
            created_topics: outcome.created_topics,
            entries_reassigned: outcome.entries_reassigned,
            already_applied: outcome.already_applied,
            taxonomy_version: outcome.version,
        })
    });

    match &result {
        Ok(commit) => info!(
            "event=apply_categorization module=service status=ok owner_id={} topics_created={} entries_reassigned={} already_applied={} version={} duration_ms={}",
            owner_id,
            commit.topics_created,
            commit.entries_reassigned,
            commit.already_applied,
            commit.taxonomy_version,
            started_at.elapsed().as_millis()
        ),
        Err(err) => warn!(
            "event=apply_categorization module=service status=error owner_id={} error_code={} duration_ms={}",
            owner_id,
            err.error_code(),
            started_at.elapsed().as_millis()
        ),
    }
    result
}

/// Checks a proposal set's shape and derives the storage plan.
///
/// New-topic proposals without entries are dropped; existing-topic groups
/// without entries are not checked for drift.
pub fn build_commit_plan(
    owner_id: OwnerId,
    set: &ProposalSet,
    snapshot_version: Option<u64>,
) -> Result<CommitPlan, ApplyError> {
    if set.owner_id != owner_id {
        return Err(ApplyError::Validation(format!(
            "proposal set belongs to owner {}, not {owner_id}",
            set.owner_id
        )));
    }

    let mut seen_entries = BTreeSet::new();
    let mut claim = |entry_id: EntryId| -> Result<(), ApplyError> {
        if seen_entries.insert(entry_id) {
            Ok(())
        } else {
            Err(ApplyError::Validation(format!(
                "entry {entry_id} appears more than once"
            )))
        }
    };

    let mut expected_names: BTreeMap<TopicId, String> = BTreeMap::new();
    let mut expected_links: BTreeMap<EntryId, Option<TopicId>> = BTreeMap::new();
    let mut bindings = Vec::new();
    for group in &set.existing_assignments {
        if group.topic_id < 1 {
            return Err(ApplyError::Validation(format!(
                "topic {} cannot be an assignment target",
                group.topic_id
            )));
        }
        if group.entries.is_empty() {
            continue;
        }
        let name_key = topic_name_key(&group.topic_name);
        match expected_names.get(&group.topic_id) {
            Some(existing) if topic_name_key(existing) != name_key => {
                return Err(ApplyError::Validation(format!(
                    "topic {} is listed under two different names",
                    group.topic_id
                )));
            }
            Some(_) => {}
            None => {
                expected_names.insert(group.topic_id, group.topic_name.clone());
            }
        }
        for entry in &group.entries {
            claim(entry.entry_id)?;
            expected_links.insert(entry.entry_id, entry.current_topic_id);
            bindings.push(EntryBinding {
                entry_id: entry.entry_id,
                topic_id: Some(group.topic_id),
            });
        }
    }

    let mut new_names = BTreeSet::new();
    let mut new_topics = Vec::new();
    for proposal in &set.new_topic_proposals {
        if proposal.entries.is_empty() {
            continue;
        }
        let name = normalize_topic_name(&proposal.suggested_name).ok_or_else(|| {
            ApplyError::Validation("new topic name cannot be blank".to_string())
        })?;
        if is_reserved_topic_name(&name) {
            return Err(ApplyError::Validation(format!(
                "topic name is reserved: `{name}`"
            )));
        }
        if !new_names.insert(topic_name_key(&name)) {
            return Err(ApplyError::Validation(format!(
                "new topic `{name}` is proposed more than once"
            )));
        }
        let mut entry_ids = Vec::with_capacity(proposal.entries.len());
        for entry in &proposal.entries {
            claim(entry.entry_id)?;
            expected_links.insert(entry.entry_id, entry.current_topic_id);
            entry_ids.push(entry.entry_id);
        }
        new_topics.push(PlannedTopic { name, entry_ids });
    }

    for entry in &set.unassigned_entries {
        claim(entry.entry_id)?;
        expected_links.insert(entry.entry_id, entry.current_topic_id);
        bindings.push(EntryBinding {
            entry_id: entry.entry_id,
            topic_id: None,
        });
    }

    Ok(CommitPlan {
        expected_version: snapshot_version,
        expected_topics: expected_names
            .into_iter()
            .map(|(topic_id, topic_name)| ExpectedTopic {
                topic_id,
                topic_name,
            })
            .collect(),
        expected_links,
        new_topics,
        bindings,
    })
}

#[cfg(test)]
mod tests {
    use super::build_commit_plan;
    use crate::model::proposal::{
        EntryAssignment, ExistingTopicAssignment, NewTopicProposal, ProposalSet, UnassignedEntry,
        UnassignedReason,
    };
    use crate::service::error::ApplyError;

    fn assignment(entry_id: i64) -> EntryAssignment {
        EntryAssignment {
            entry_id,
            content: format!("entry {entry_id}"),
            current_topic_id: None,
            created_at: 0,
            confidence: 0.9,
            alternatives: Vec::new(),
        }
    }

    fn proposal(name: &str, entry_ids: &[i64]) -> NewTopicProposal {
        NewTopicProposal {
            suggested_name: name.to_string(),
            confidence: 0.9,
            rationale: String::new(),
            similar_existing_topics: Vec::new(),
            entries: entry_ids.iter().copied().map(assignment).collect(),
        }
    }

    fn set() -> ProposalSet {
        ProposalSet {
            owner_id: 1,
            snapshot_version: 3,
            existing_assignments: vec![ExistingTopicAssignment {
                topic_id: 7,
                topic_name: "Work".to_string(),
                entries: vec![assignment(1)],
            }],
            new_topic_proposals: vec![
                proposal("  Travel   Plans ", &[2, 3]),
                proposal("Empty", &[]),
            ],
            unassigned_entries: vec![UnassignedEntry {
                entry_id: 4,
                content: "asdkj".to_string(),
                current_topic_id: None,
                created_at: 0,
                reason: UnassignedReason::LeftUncategorized,
                top_suggestions: Vec::new(),
            }],
            ..ProposalSet::default()
        }
    }

    #[test]
    fn plan_covers_every_bucket_and_drops_empty_proposals() {
        let plan = build_commit_plan(1, &set(), Some(3)).expect("valid set");

        assert_eq!(plan.expected_version, Some(3));
        assert_eq!(plan.expected_topics.len(), 1);
        assert_eq!(plan.expected_topics[0].topic_id, 7);
        assert_eq!(plan.new_topics.len(), 1);
        assert_eq!(plan.new_topics[0].name, "Travel Plans");
        assert_eq!(plan.new_topics[0].entry_ids, vec![2, 3]);
        let bound: Vec<(i64, Option<i64>)> = plan
            .bindings
            .iter()
            .map(|binding| (binding.entry_id, binding.topic_id))
            .collect();
        assert_eq!(bound, vec![(1, Some(7)), (4, None)]);
        assert_eq!(plan.expected_links.len(), 4);
        assert_eq!(plan.expected_links.get(&3), Some(&None));
    }

    #[test]
    fn plan_rejects_pseudo_topic_targets_and_duplicate_entries() {
        let mut pseudo = set();
        pseudo.existing_assignments[0].topic_id = 0;
        assert!(matches!(
            build_commit_plan(1, &pseudo, None),
            Err(ApplyError::Validation(_))
        ));

        let mut duplicated = set();
        duplicated.unassigned_entries[0].entry_id = 2;
        let error = build_commit_plan(1, &duplicated, None).expect_err("duplicate entry");
        assert!(error.to_string().contains("entry 2"));
    }

    #[test]
    fn plan_rejects_reserved_and_repeated_new_names() {
        let mut reserved = set();
        reserved.new_topic_proposals[0].suggested_name = "uncategorized".to_string();
        assert!(matches!(
            build_commit_plan(1, &reserved, None),
            Err(ApplyError::Validation(_))
        ));

        let mut repeated = set();
        repeated
            .new_topic_proposals
            .push(proposal("travel plans", &[9]));
        assert!(matches!(
            build_commit_plan(1, &repeated, None),
            Err(ApplyError::Validation(_))
        ));
    }

    #[test]
    fn plan_rejects_foreign_owner() {
        assert!(matches!(
            build_commit_plan(2, &set(), None),
            Err(ApplyError::Validation(_))
        ));
    }
}
