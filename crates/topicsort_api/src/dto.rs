//! JSON wire shapes of the topics surface.
//!
//! # Invariants
//! - Field names are the snake_case names existing clients send and read,
//!   except `entryIds` on the quick-categorize-uncategorized request.
//! - A `null` topic id on the wire means "new topic"; inside the crate that
//!   is always [`TopicRef::ProposeNew`].
//! - Timestamps are epoch milliseconds.

use serde::{Deserialize, Serialize};
use topicsort_core::{
    EntryAssignment, EntryId, ExistingTopicAssignment, NewTopicProposal, OwnerId,
    ProposalMetadata, ProposalSet, QuickCategorizeProposal, TopicId, TopicRef, TopicSuggestion,
    TopicView, UnassignedEntry, UnassignedReason,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicDto {
    pub topic_id: TopicId,
    pub topic_name: String,
    pub entry_count: u32,
    pub user_id: OwnerId,
    /// `None` for the Uncategorized and All Topics views.
    pub creation_date: Option<i64>,
}

impl From<&TopicView> for TopicDto {
    fn from(view: &TopicView) -> Self {
        let (user_id, creation_date) = match view {
            TopicView::Real(topic) => (topic.owner_id, Some(topic.created_at)),
            TopicView::Uncategorized { owner_id, .. } | TopicView::AllTopics { owner_id, .. } => {
                (*owner_id, None)
            }
        };
        Self {
            topic_id: view.wire_id(),
            topic_name: view.name().to_string(),
            entry_count: view.entry_count(),
            user_id,
            creation_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicNameRequest {
    pub topic_name: String,
}

/// Ranked match for `GET /topics/suggestions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSearchResult {
    pub topic_id: Option<TopicId>,
    pub topic_name: String,
    pub entry_count: u32,
    pub user_id: OwnerId,
    pub creation_date: Option<i64>,
    pub score: f64,
    pub is_ai_suggested: bool,
    pub is_new_topic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSuggestionDto {
    pub topic_id: Option<TopicId>,
    pub topic_name: String,
    pub confidence: f64,
}

impl From<&TopicSuggestion> for TopicSuggestionDto {
    fn from(suggestion: &TopicSuggestion) -> Self {
        Self {
            topic_id: suggestion.target.topic_id(),
            topic_name: suggestion.name.clone(),
            confidence: suggestion.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicAssignmentDto {
    pub entry_id: EntryId,
    pub content: String,
    pub confidence: f64,
    pub alternative_topics: Vec<TopicSuggestionDto>,
}

impl From<&EntryAssignment> for TopicAssignmentDto {
    fn from(assignment: &EntryAssignment) -> Self {
        Self {
            entry_id: assignment.entry_id,
            content: assignment.content.clone(),
            confidence: assignment.confidence,
            alternative_topics: assignment.alternatives.iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingTopicAssignmentDto {
    pub topic_id: TopicId,
    pub topic_name: String,
    pub entries: Vec<TopicAssignmentDto>,
}

impl From<&ExistingTopicAssignment> for ExistingTopicAssignmentDto {
    fn from(group: &ExistingTopicAssignment) -> Self {
        Self {
            topic_id: group.topic_id,
            topic_name: group.topic_name.clone(),
            entries: group.entries.iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTopicProposalDto {
    pub suggested_name: String,
    pub confidence: f64,
    pub rationale: String,
    pub similar_existing_topics: Vec<TopicSuggestionDto>,
    pub entries: Vec<TopicAssignmentDto>,
}

impl From<&NewTopicProposal> for NewTopicProposalDto {
    fn from(proposal: &NewTopicProposal) -> Self {
        Self {
            suggested_name: proposal.suggested_name.clone(),
            confidence: proposal.confidence,
            rationale: proposal.rationale.clone(),
            similar_existing_topics: proposal
                .similar_existing_topics
                .iter()
                .map(Into::into)
                .collect(),
            entries: proposal.entries.iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnassignedEntryDto {
    pub entry_id: EntryId,
    pub content: String,
    pub reason: String,
    pub top_suggestions: Vec<TopicSuggestionDto>,
}

impl From<&UnassignedEntry> for UnassignedEntryDto {
    fn from(entry: &UnassignedEntry) -> Self {
        Self {
            entry_id: entry.entry_id,
            content: entry.content.clone(),
            reason: entry.reason.to_string(),
            top_suggestions: entry.top_suggestions.iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMetadataDto {
    pub total_entries_analyzed: u32,
    pub assigned_to_existing: u32,
    pub assigned_to_new: u32,
    pub unassigned: u32,
    pub average_confidence: f64,
    pub processing_time_ms: u64,
}

impl From<&ProposalMetadata> for CategoryMetadataDto {
    fn from(metadata: &ProposalMetadata) -> Self {
        Self {
            total_entries_analyzed: metadata.total_entries_analyzed,
            assigned_to_existing: metadata.assigned_to_existing,
            assigned_to_new: metadata.assigned_to_new,
            unassigned: metadata.unassigned,
            average_confidence: metadata.average_confidence,
            processing_time_ms: metadata.processing_time_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickCategorizeUncategorizedRequest {
    #[serde(rename = "entryIds", default)]
    pub entry_ids: Option<Vec<EntryId>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickCategorizeUncategorizedResponse {
    pub existing_topic_assignments: Vec<ExistingTopicAssignmentDto>,
    pub new_topic_proposals: Vec<NewTopicProposalDto>,
    pub unassigned_entries: Vec<UnassignedEntryDto>,
    pub metadata: CategoryMetadataDto,
}

impl From<&ProposalSet> for QuickCategorizeUncategorizedResponse {
    fn from(set: &ProposalSet) -> Self {
        Self {
            existing_topic_assignments: set.existing_assignments.iter().map(Into::into).collect(),
            new_topic_proposals: set.new_topic_proposals.iter().map(Into::into).collect(),
            unassigned_entries: set.unassigned_entries.iter().map(Into::into).collect(),
            metadata: (&set.metadata).into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedEntry {
    pub entry_id: EntryId,
    pub content: String,
    pub current_topic_id: Option<TopicId>,
    pub proposed_topic_id: Option<TopicId>,
    pub creation_date: i64,
    pub confidence_score: f64,
}

impl ProposedEntry {
    fn from_assignment(assignment: &EntryAssignment, proposed_topic_id: Option<TopicId>) -> Self {
        Self {
            entry_id: assignment.entry_id,
            content: assignment.content.clone(),
            current_topic_id: assignment.current_topic_id,
            proposed_topic_id,
            creation_date: assignment.created_at,
            confidence_score: assignment.confidence,
        }
    }

    fn to_assignment(&self) -> EntryAssignment {
        EntryAssignment {
            entry_id: self.entry_id,
            content: self.content.clone(),
            current_topic_id: self.current_topic_id,
            created_at: self.creation_date,
            confidence: self.confidence_score,
            alternatives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedTopic {
    pub topic_id: Option<TopicId>,
    pub topic_name: String,
    pub is_new: bool,
    pub entries: Vec<ProposedEntry>,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCategorizeRequest {
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub topics_to_keep: Option<Vec<TopicId>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCategorizeResponse {
    pub proposed_topics: Vec<ProposedTopic>,
    pub uncategorized_entries: Vec<ProposedEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions_used: Option<String>,
    /// Taxonomy version the proposal was computed against.
    pub snapshot_version: u64,
}

impl AutoCategorizeResponse {
    pub fn from_proposal_set(set: &ProposalSet, instructions_used: Option<String>) -> Self {
        let mut proposed_topics: Vec<ProposedTopic> = set
            .existing_assignments
            .iter()
            .map(|group| ProposedTopic {
                topic_id: Some(group.topic_id),
                topic_name: group.topic_name.clone(),
                is_new: false,
                entries: group
                    .entries
                    .iter()
                    .map(|entry| ProposedEntry::from_assignment(entry, Some(group.topic_id)))
                    .collect(),
                confidence_score: group.average_confidence(),
            })
            .collect();
        proposed_topics.extend(set.new_topic_proposals.iter().map(|proposal| ProposedTopic {
            topic_id: None,
            topic_name: proposal.suggested_name.clone(),
            is_new: true,
            entries: proposal
                .entries
                .iter()
                .map(|entry| ProposedEntry::from_assignment(entry, None))
                .collect(),
            confidence_score: proposal.confidence,
        }));

        let uncategorized_entries = set
            .unassigned_entries
            .iter()
            .map(|entry| ProposedEntry {
                entry_id: entry.entry_id,
                content: entry.content.clone(),
                current_topic_id: entry.current_topic_id,
                proposed_topic_id: None,
                creation_date: entry.created_at,
                confidence_score: entry
                    .top_suggestions
                    .first()
                    .map_or(0.0, |suggestion| suggestion.confidence),
            })
            .collect();

        Self {
            proposed_topics,
            uncategorized_entries,
            instructions_used,
            snapshot_version: set.snapshot_version,
        }
    }
}

/// Reviewed proposal sent back for commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyCategorizeRequest {
    pub proposed_topics: Vec<ProposedTopic>,
    #[serde(default)]
    pub uncategorized_entries: Vec<ProposedEntry>,
    /// When present, any taxonomy change since analysis makes the apply stale.
    #[serde(default)]
    pub snapshot_version: Option<u64>,
}

impl ApplyCategorizeRequest {
    /// Rebuilds the self-describing proposal set for `owner_id`.
    ///
    /// # Errors
    /// Returns a message when an existing-topic group has no `topic_id`.
    pub fn to_proposal_set(&self, owner_id: OwnerId) -> Result<ProposalSet, String> {
        let mut set = ProposalSet {
            owner_id,
            snapshot_version: self.snapshot_version.unwrap_or_default(),
            ..ProposalSet::default()
        };

        for topic in &self.proposed_topics {
            let entries = topic.entries.iter().map(ProposedEntry::to_assignment).collect();
            match (topic.is_new, topic.topic_id) {
                (true, _) => set.new_topic_proposals.push(NewTopicProposal {
                    suggested_name: topic.topic_name.clone(),
                    confidence: topic.confidence_score,
                    rationale: String::new(),
                    similar_existing_topics: Vec::new(),
                    entries,
                }),
                (false, Some(topic_id)) => {
                    set.existing_assignments.push(ExistingTopicAssignment {
                        topic_id,
                        topic_name: topic.topic_name.clone(),
                        entries,
                    })
                }
                (false, None) => {
                    return Err(format!(
                        "proposed topic `{}` needs a topic_id or is_new=true",
                        topic.topic_name
                    ));
                }
            }
        }

        set.unassigned_entries = self
            .uncategorized_entries
            .iter()
            .map(|entry| UnassignedEntry {
                entry_id: entry.entry_id,
                content: entry.content.clone(),
                current_topic_id: entry.current_topic_id,
                created_at: entry.creation_date,
                reason: UnassignedReason::LeftUncategorized,
                top_suggestions: Vec::new(),
            })
            .collect();
        Ok(set)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickCategorizeRequest {
    pub entry_ids: Vec<EntryId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickCategorizeSuggestionDto {
    pub topic_id: Option<TopicId>,
    pub topic_name: String,
    pub is_new: bool,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickCategorizeProposalDto {
    pub entry_id: EntryId,
    pub content: String,
    pub suggestions: Vec<QuickCategorizeSuggestionDto>,
}

impl From<&QuickCategorizeProposal> for QuickCategorizeProposalDto {
    fn from(proposal: &QuickCategorizeProposal) -> Self {
        Self {
            entry_id: proposal.entry_id,
            content: proposal.content.clone(),
            suggestions: proposal
                .suggestions
                .iter()
                .map(|suggestion| QuickCategorizeSuggestionDto {
                    topic_id: suggestion.target.topic_id(),
                    topic_name: suggestion.name.clone(),
                    is_new: matches!(suggestion.target, TopicRef::ProposeNew),
                    confidence_score: suggestion.confidence,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickCategorizeResponse {
    pub proposals: Vec<QuickCategorizeProposalDto>,
}

/// Error body for every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    pub error_code: String,
    /// Drifted topics of a stale apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_topic_ids: Option<Vec<TopicId>>,
    /// Entries re-filed since the stale proposal was computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_entry_ids: Option<Vec<EntryId>>,
}
