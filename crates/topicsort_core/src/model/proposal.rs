//! Proposal set produced by reconciliation and consumed by apply.
//!
//! # Responsibility
//! - Carry the three disjoint outcome buckets plus run metadata.
//! - Be fully self-describing so apply can validate it without server state.
//!
//! # Invariants
//! - Each entry id appears in exactly one bucket, at most once.
//! - `snapshot_version` is the taxonomy version the set was computed against.

use crate::model::entry::EntryId;
use crate::model::suggestion::TopicSuggestion;
use crate::model::topic::{OwnerId, TopicId};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One entry routed to a topic (existing or proposed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryAssignment {
    pub entry_id: EntryId,
    pub content: String,
    /// Topic the entry was bound to when the set was computed.
    pub current_topic_id: Option<TopicId>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub confidence: f64,
    /// Runner-up suggestions, descending confidence.
    pub alternatives: Vec<TopicSuggestion>,
}

/// Entries routed to one existing topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingTopicAssignment {
    pub topic_id: TopicId,
    /// Topic name as seen in the snapshot; apply treats a rename as drift.
    pub topic_name: String,
    pub entries: Vec<EntryAssignment>,
}

impl ExistingTopicAssignment {
    pub fn average_confidence(&self) -> f64 {
        average(self.entries.iter().map(|entry| entry.confidence))
    }
}

/// Entries routed to one not-yet-created topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTopicProposal {
    pub suggested_name: String,
    /// Highest member confidence.
    pub confidence: f64,
    pub rationale: String,
    /// Existing topics that look alike, for human disambiguation only.
    pub similar_existing_topics: Vec<TopicSuggestion>,
    pub entries: Vec<EntryAssignment>,
}

/// Why an entry was left without a topic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnassignedReason {
    /// The oracle returned no usable suggestion.
    NoSuggestions,
    /// The best suggestion did not clear the floor.
    LowConfidence { best: f64, floor: f64 },
    /// Caller chose to leave the entry uncategorized during review.
    LeftUncategorized,
}

impl Display for UnassignedReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSuggestions => write!(f, "no topic suggestions available"),
            Self::LowConfidence { best, floor } => write!(
                f,
                "low confidence: best suggestion {best:.2} is below threshold {floor:.2}"
            ),
            Self::LeftUncategorized => write!(f, "left uncategorized"),
        }
    }
}

/// Entry that stays (or becomes) uncategorized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnassignedEntry {
    pub entry_id: EntryId,
    pub content: String,
    pub current_topic_id: Option<TopicId>,
    pub created_at: i64,
    pub reason: UnassignedReason,
    /// Up to K near-misses, descending confidence.
    pub top_suggestions: Vec<TopicSuggestion>,
}

/// Counters and timing for one reconciliation run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProposalMetadata {
    pub total_entries_analyzed: u32,
    pub assigned_to_existing: u32,
    pub assigned_to_new: u32,
    pub unassigned: u32,
    /// Mean confidence over routed (existing + new) entries; `0` when none.
    pub average_confidence: f64,
    pub processing_time_ms: u64,
}

/// Ephemeral output of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProposalSet {
    pub owner_id: OwnerId,
    pub snapshot_version: u64,
    pub existing_assignments: Vec<ExistingTopicAssignment>,
    pub new_topic_proposals: Vec<NewTopicProposal>,
    pub unassigned_entries: Vec<UnassignedEntry>,
    pub metadata: ProposalMetadata,
}

/// Where one entry landed inside a [`ProposalSet`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryOutcome<'a> {
    ExistingTopic {
        topic_id: TopicId,
        assignment: &'a EntryAssignment,
    },
    NewTopic {
        suggested_name: &'a str,
        assignment: &'a EntryAssignment,
    },
    Unassigned(&'a UnassignedEntry),
}

impl ProposalSet {
    /// Every entry id in bucket order; duplicates are preserved so callers can
    /// detect them.
    pub fn entry_ids(&self) -> Vec<EntryId> {
        let mut ids = Vec::new();
        for group in &self.existing_assignments {
            ids.extend(group.entries.iter().map(|entry| entry.entry_id));
        }
        for proposal in &self.new_topic_proposals {
            ids.extend(proposal.entries.iter().map(|entry| entry.entry_id));
        }
        ids.extend(self.unassigned_entries.iter().map(|entry| entry.entry_id));
        ids
    }

    /// Finds the bucket an entry landed in.
    pub fn outcome_for(&self, entry_id: EntryId) -> Option<EntryOutcome<'_>> {
        for group in &self.existing_assignments {
            if let Some(assignment) = group.entries.iter().find(|e| e.entry_id == entry_id) {
                return Some(EntryOutcome::ExistingTopic {
                    topic_id: group.topic_id,
                    assignment,
                });
            }
        }
        for proposal in &self.new_topic_proposals {
            if let Some(assignment) = proposal.entries.iter().find(|e| e.entry_id == entry_id) {
                return Some(EntryOutcome::NewTopic {
                    suggested_name: proposal.suggested_name.as_str(),
                    assignment,
                });
            }
        }
        self.unassigned_entries
            .iter()
            .find(|entry| entry.entry_id == entry_id)
            .map(EntryOutcome::Unassigned)
    }

    pub fn is_empty(&self) -> bool {
        self.existing_assignments.is_empty()
            && self.new_topic_proposals.is_empty()
            && self.unassigned_entries.is_empty()
    }
}

pub(crate) fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u32), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / f64::from(count)
    }
}
