//! Reconciliation of raw oracle suggestions against a taxonomy snapshot.
//!
//! # Responsibility
//! - Partition entries into existing-topic assignments, new-topic proposals
//!   and unassigned entries.
//! - Merge near-duplicate new-topic names, and route new names that match an
//!   existing topic onto that topic.
//!
//! # Invariants
//! - Every input entry lands in exactly one bucket.
//! - Routed entries have confidence `>= floor`; unassigned entries' best
//!   suggestion is `< floor`.
//! - No two proposals, and no proposal and existing topic, have names with
//!   similarity `>= merge_threshold`.
//! - Output membership and ordering depend only on the inputs.

use crate::config::{
    is_unit_interval, DEFAULT_CONFIDENCE_FLOOR, DEFAULT_MAX_ALTERNATIVES, DEFAULT_MAX_NEAR_MISSES,
    DEFAULT_MERGE_THRESHOLD, DEFAULT_SIMILAR_THRESHOLD,
};
use crate::engine::similarity::name_similarity;
use crate::model::entry::{Entry, EntryId};
use crate::model::proposal::{
    average, EntryAssignment, ExistingTopicAssignment, NewTopicProposal, ProposalMetadata,
    ProposalSet, UnassignedEntry, UnassignedReason,
};
use crate::model::suggestion::{clamp_confidence, EntrySuggestions, TopicRef, TopicSuggestion};
use crate::model::topic::{
    is_pseudo_topic_id, is_reserved_topic_name, normalize_topic_name, topic_name_key, OwnerId,
    TaxonomySnapshot, TopicId,
};
use log::{info, warn};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Per-run options.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOptions {
    /// Suggestions below this confidence leave the entry unassigned.
    pub confidence_floor: f64,
    /// Topics the caller wants to keep; new names resembling one of them
    /// (similarity `>= similar_threshold`) are routed onto it, and they win
    /// confidence ties.
    pub topics_to_keep: BTreeSet<TopicId>,
    pub merge_threshold: f64,
    pub similar_threshold: f64,
    /// K near-misses kept on unassigned entries.
    pub max_near_misses: usize,
    pub max_alternatives: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            topics_to_keep: BTreeSet::new(),
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            similar_threshold: DEFAULT_SIMILAR_THRESHOLD,
            max_near_misses: DEFAULT_MAX_NEAR_MISSES,
            max_alternatives: DEFAULT_MAX_ALTERNATIVES,
        }
    }
}

impl ReconcileOptions {
    pub fn with_floor(confidence_floor: f64) -> Self {
        Self {
            confidence_floor,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ReconcileError> {
        for (field, value) in [
            ("confidence_floor", self.confidence_floor),
            ("merge_threshold", self.merge_threshold),
            ("similar_threshold", self.similar_threshold),
        ] {
            if !is_unit_interval(value) {
                return Err(ReconcileError::InvalidThreshold { field, value });
            }
        }
        Ok(())
    }
}

/// Reconciliation failure. No partial proposal set is ever returned.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileError {
    EmptyInput,
    InvalidThreshold { field: &'static str, value: f64 },
    /// The oracle output has no record for these entries.
    IncompleteOracleOutput { missing: Vec<EntryId> },
    DuplicateEntry(EntryId),
    /// Entry belongs to a different owner than the snapshot.
    OwnerMismatch { entry_id: EntryId, owner_id: OwnerId },
}

impl ReconcileError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyInput => "empty_input",
            Self::InvalidThreshold { .. } => "invalid_threshold",
            Self::IncompleteOracleOutput { .. } => "incomplete_oracle_output",
            Self::DuplicateEntry(_) => "duplicate_entry",
            Self::OwnerMismatch { .. } => "owner_mismatch",
        }
    }
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "no entries given"),
            Self::InvalidThreshold { field, value } => {
                write!(f, "`{field}` must be within [0, 1], got {value}")
            }
            Self::IncompleteOracleOutput { missing } => {
                write!(f, "oracle output is missing entries {missing:?}")
            }
            Self::DuplicateEntry(id) => write!(f, "entry {id} given more than once"),
            Self::OwnerMismatch { entry_id, owner_id } => {
                write!(f, "entry {entry_id} is not owned by {owner_id}")
            }
        }
    }
}

impl Error for ReconcileError {}

/// Builds a proposal set from entries and their raw oracle suggestions.
///
/// # Errors
/// - `EmptyInput` when `entries` is empty.
/// - `InvalidThreshold` when any threshold is outside `[0, 1]`.
/// - `IncompleteOracleOutput` when `raw` has no record for some entry.
/// - `DuplicateEntry` / `OwnerMismatch` for malformed input.
pub fn reconcile(
    entries: &[Entry],
    snapshot: &TaxonomySnapshot,
    raw: &[EntrySuggestions],
    options: &ReconcileOptions,
) -> Result<ProposalSet, ReconcileError> {
    let started_at = Instant::now();
    let result = reconcile_inner(entries, snapshot, raw, options, started_at);
    match &result {
        Ok(set) => info!(
            "event=reconcile module=engine status=ok owner_id={} entries={} existing={} new_topics={} unassigned={} duration_ms={}",
            snapshot.owner_id,
            set.metadata.total_entries_analyzed,
            set.metadata.assigned_to_existing,
            set.new_topic_proposals.len(),
            set.metadata.unassigned,
            set.metadata.processing_time_ms
        ),
        Err(err) => warn!(
            "event=reconcile module=engine status=error owner_id={} entries={} error_code={} duration_ms={}",
            snapshot.owner_id,
            entries.len(),
            err.error_code(),
            started_at.elapsed().as_millis()
        ),
    }
    result
}

fn reconcile_inner(
    entries: &[Entry],
    snapshot: &TaxonomySnapshot,
    raw: &[EntrySuggestions],
    options: &ReconcileOptions,
    started_at: Instant,
) -> Result<ProposalSet, ReconcileError> {
    options.validate()?;
    if entries.is_empty() {
        return Err(ReconcileError::EmptyInput);
    }

    let mut ordered: Vec<&Entry> = Vec::with_capacity(entries.len());
    let mut seen = BTreeSet::new();
    for entry in entries {
        if !seen.insert(entry.id) {
            return Err(ReconcileError::DuplicateEntry(entry.id));
        }
        if entry.owner_id != snapshot.owner_id {
            return Err(ReconcileError::OwnerMismatch {
                entry_id: entry.id,
                owner_id: snapshot.owner_id,
            });
        }
        ordered.push(entry);
    }
    ordered.sort_by_key(|entry| entry.id);

    let mut by_entry: BTreeMap<EntryId, Vec<TopicSuggestion>> = BTreeMap::new();
    for record in raw {
        if seen.contains(&record.entry_id) {
            by_entry
                .entry(record.entry_id)
                .or_default()
                .extend(record.suggestions.iter().cloned());
        }
    }
    let missing: Vec<EntryId> = ordered
        .iter()
        .map(|entry| entry.id)
        .filter(|id| !by_entry.contains_key(id))
        .collect();
    if !missing.is_empty() {
        return Err(ReconcileError::IncompleteOracleOutput { missing });
    }

    let mut existing_groups: BTreeMap<TopicId, Vec<EntryAssignment>> = BTreeMap::new();
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut unassigned_entries: Vec<UnassignedEntry> = Vec::new();

    for entry in ordered {
        let suggestions = by_entry.remove(&entry.id).unwrap_or_default();
        let ranked = rank_suggestions(&suggestions, snapshot, options);
        let Some(top) = ranked.first() else {
            unassigned_entries.push(unassigned(entry, UnassignedReason::NoSuggestions, Vec::new()));
            continue;
        };

        if top.confidence < options.confidence_floor {
            let reason = UnassignedReason::LowConfidence {
                best: top.confidence,
                floor: options.confidence_floor,
            };
            let near_misses = ranked.iter().take(options.max_near_misses).cloned().collect();
            unassigned_entries.push(unassigned(entry, reason, near_misses));
            continue;
        }

        let alternatives: Vec<TopicSuggestion> = ranked
            .iter()
            .skip(1)
            .take(options.max_alternatives)
            .cloned()
            .collect();
        let assignment = EntryAssignment {
            entry_id: entry.id,
            content: entry.content.clone(),
            current_topic_id: entry.topic_id,
            created_at: entry.created_at,
            confidence: top.confidence,
            alternatives,
        };
        match top.target {
            TopicRef::Existing(topic_id) => {
                existing_groups.entry(topic_id).or_default().push(assignment)
            }
            TopicRef::ProposeNew => candidates.push(Candidate {
                name: top.name.clone(),
                assignment,
            }),
        }
    }

    let mut existing_assignments: Vec<ExistingTopicAssignment> = existing_groups
        .into_iter()
        .filter_map(|(topic_id, mut group)| {
            let topic = snapshot.topic(topic_id)?;
            group.sort_by(compare_assignments);
            Some(ExistingTopicAssignment {
                topic_id,
                topic_name: topic.name.clone(),
                entries: group,
            })
        })
        .collect();
    existing_assignments.sort_by(|a, b| {
        b.average_confidence()
            .total_cmp(&a.average_confidence())
            .then_with(|| a.topic_id.cmp(&b.topic_id))
    });

    let new_topic_proposals = cluster_candidates(candidates, snapshot, options);

    let assigned_to_existing: usize = existing_assignments.iter().map(|g| g.entries.len()).sum();
    let assigned_to_new: usize = new_topic_proposals.iter().map(|p| p.entries.len()).sum();
    let average_confidence = average(
        existing_assignments
            .iter()
            .flat_map(|group| group.entries.iter())
            .chain(new_topic_proposals.iter().flat_map(|p| p.entries.iter()))
            .map(|entry| entry.confidence),
    );

    let metadata = ProposalMetadata {
        total_entries_analyzed: to_u32(entries.len()),
        assigned_to_existing: to_u32(assigned_to_existing),
        assigned_to_new: to_u32(assigned_to_new),
        unassigned: to_u32(unassigned_entries.len()),
        average_confidence,
        processing_time_ms: u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
    };

    Ok(ProposalSet {
        owner_id: snapshot.owner_id,
        snapshot_version: snapshot.version,
        existing_assignments,
        new_topic_proposals,
        unassigned_entries,
        metadata,
    })
}

/// Cleans, resolves, deduplicates and orders one entry's suggestions.
///
/// - Suggestions for pseudo-topics or topics absent from the snapshot are
///   dropped; existing suggestions take the snapshot's current name.
/// - New names that are blank or reserved are dropped; names matching an
///   existing topic (`>= merge_threshold`) or resembling a kept topic
///   (`>= similar_threshold`) are routed onto that topic.
/// - One suggestion per target survives, with its highest confidence.
/// - Order: confidence desc, kept topics first, existing before new, then
///   topic id / name key ascending.
pub fn rank_suggestions(
    suggestions: &[TopicSuggestion],
    snapshot: &TaxonomySnapshot,
    options: &ReconcileOptions,
) -> Vec<TopicSuggestion> {
    let mut best: BTreeMap<RankKey, TopicSuggestion> = BTreeMap::new();

    for suggestion in suggestions {
        let Some(resolved) = resolve_suggestion(suggestion, snapshot, options) else {
            continue;
        };
        let key = match resolved.target {
            TopicRef::Existing(id) => RankKey::Existing(id),
            TopicRef::ProposeNew => RankKey::New(topic_name_key(&resolved.name)),
        };
        let replace = best.get(&key).map_or(true, |current| {
            resolved.confidence > current.confidence
                || (resolved.confidence == current.confidence && resolved.name < current.name)
        });
        if replace {
            best.insert(key, resolved);
        }
    }

    let mut ranked: Vec<TopicSuggestion> = best.into_values().collect();
    ranked.sort_by(|a, b| compare_ranked(a, b, &options.topics_to_keep));
    ranked
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RankKey {
    Existing(TopicId),
    New(String),
}

struct Candidate {
    name: String,
    assignment: EntryAssignment,
}

fn resolve_suggestion(
    suggestion: &TopicSuggestion,
    snapshot: &TaxonomySnapshot,
    options: &ReconcileOptions,
) -> Option<TopicSuggestion> {
    let confidence = clamp_confidence(suggestion.confidence);
    match suggestion.target {
        TopicRef::Existing(topic_id) => {
            if is_pseudo_topic_id(topic_id) {
                return None;
            }
            let topic = snapshot.topic(topic_id)?;
            Some(TopicSuggestion::existing(topic.id, topic.name.clone(), confidence))
        }
        TopicRef::ProposeNew => {
            let name = normalize_topic_name(&suggestion.name)?;
            if is_reserved_topic_name(&name) {
                return None;
            }
            if let Some((topic_id, topic_name)) =
                best_existing_match(&name, snapshot, options.merge_threshold, None)
            {
                return Some(TopicSuggestion::existing(topic_id, topic_name, confidence));
            }
            if !options.topics_to_keep.is_empty() {
                if let Some((topic_id, topic_name)) = best_existing_match(
                    &name,
                    snapshot,
                    options.similar_threshold,
                    Some(&options.topics_to_keep),
                ) {
                    return Some(TopicSuggestion::existing(topic_id, topic_name, confidence));
                }
            }
            Some(TopicSuggestion::propose_new(name, confidence))
        }
    }
}

/// Most similar snapshot topic at or above `threshold`; ties go to the lower id.
fn best_existing_match(
    name: &str,
    snapshot: &TaxonomySnapshot,
    threshold: f64,
    restrict_to: Option<&BTreeSet<TopicId>>,
) -> Option<(TopicId, String)> {
    let mut best: Option<(f64, TopicId, &str)> = None;
    for topic in &snapshot.topics {
        if restrict_to.is_some_and(|allowed| !allowed.contains(&topic.id)) {
            continue;
        }
        let score = name_similarity(name, &topic.name);
        if score < threshold {
            continue;
        }
        if best.map_or(true, |(current, _, _)| score > current) {
            best = Some((score, topic.id, topic.name.as_str()));
        }
    }
    best.map(|(_, id, name)| (id, name.to_string()))
}

fn compare_ranked(a: &TopicSuggestion, b: &TopicSuggestion, kept: &BTreeSet<TopicId>) -> Ordering {
    let is_kept = |s: &TopicSuggestion| s.target.topic_id().is_some_and(|id| kept.contains(&id));
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| is_kept(b).cmp(&is_kept(a)))
        .then_with(|| a.target.is_new().cmp(&b.target.is_new()))
        .then_with(|| a.target.topic_id().cmp(&b.target.topic_id()))
        .then_with(|| topic_name_key(&a.name).cmp(&topic_name_key(&b.name)))
}

fn compare_assignments(a: &EntryAssignment, b: &EntryAssignment) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.entry_id.cmp(&b.entry_id))
}

/// Groups new-topic candidates into proposals by transitive name similarity.
fn cluster_candidates(
    mut candidates: Vec<Candidate>,
    snapshot: &TaxonomySnapshot,
    options: &ReconcileOptions,
) -> Vec<NewTopicProposal> {
    candidates.sort_by(|a, b| compare_assignments(&a.assignment, &b.assignment));

    let mut parents: Vec<usize> = (0..candidates.len()).collect();
    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            if name_similarity(&candidates[i].name, &candidates[j].name) >= options.merge_threshold
            {
                union(&mut parents, i, j);
            }
        }
    }

    // Clusters keyed by their root, kept in order of their best member.
    let mut order: Vec<usize> = Vec::new();
    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for index in 0..candidates.len() {
        let root = find(&mut parents, index);
        let slot = members.entry(root).or_default();
        if slot.is_empty() {
            order.push(root);
        }
        slot.push(index);
    }

    let mut proposals = Vec::with_capacity(order.len());
    for root in order {
        let indices = members.remove(&root).unwrap_or_default();
        let Some(&representative) = indices.first() else {
            continue;
        };
        let suggested_name = candidates[representative].name.clone();
        let confidence = candidates[representative].assignment.confidence;

        let mut variants: Vec<String> = Vec::new();
        let mut variant_keys = BTreeSet::new();
        for &index in &indices {
            if variant_keys.insert(topic_name_key(&candidates[index].name)) {
                variants.push(candidates[index].name.clone());
            }
        }

        let similar_existing_topics = similar_existing(&variants, snapshot, options);
        let entries: Vec<EntryAssignment> = indices
            .iter()
            .map(|&index| candidates[index].assignment.clone())
            .collect();
        let rationale = build_rationale(entries.len(), confidence, &variants);

        proposals.push(NewTopicProposal {
            suggested_name,
            confidence,
            rationale,
            similar_existing_topics,
            entries,
        });
    }

    proposals.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| topic_name_key(&a.suggested_name).cmp(&topic_name_key(&b.suggested_name)))
    });
    proposals
}

fn similar_existing(
    variants: &[String],
    snapshot: &TaxonomySnapshot,
    options: &ReconcileOptions,
) -> Vec<TopicSuggestion> {
    let mut similar: Vec<TopicSuggestion> = snapshot
        .topics
        .iter()
        .filter_map(|topic| {
            let score = variants
                .iter()
                .map(|variant| name_similarity(variant, &topic.name))
                .fold(0.0_f64, f64::max);
            (score >= options.similar_threshold)
                .then(|| TopicSuggestion::existing(topic.id, topic.name.clone(), score))
        })
        .collect();
    similar.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.target.topic_id().cmp(&b.target.topic_id()))
    });
    similar.truncate(options.max_alternatives);
    similar
}

fn build_rationale(entry_count: usize, confidence: f64, variants: &[String]) -> String {
    let mut rationale = if entry_count == 1 {
        format!("Suggested for 1 entry with confidence {confidence:.2}")
    } else {
        format!("Suggested for {entry_count} entries with peak confidence {confidence:.2}")
    };
    if variants.len() > 1 {
        rationale.push_str("; merged similar names: ");
        rationale.push_str(&variants.join(", "));
    }
    rationale
}

fn unassigned(
    entry: &Entry,
    reason: UnassignedReason,
    top_suggestions: Vec<TopicSuggestion>,
) -> UnassignedEntry {
    UnassignedEntry {
        entry_id: entry.id,
        content: entry.content.clone(),
        current_topic_id: entry.topic_id,
        created_at: entry.created_at,
        reason,
        top_suggestions,
    }
}

fn find(parents: &mut [usize], index: usize) -> usize {
    let mut root = index;
    while parents[root] != root {
        root = parents[root];
    }
    let mut cursor = index;
    while parents[cursor] != root {
        let next = parents[cursor];
        parents[cursor] = root;
        cursor = next;
    }
    root
}

fn union(parents: &mut [usize], left: usize, right: usize) {
    let left_root = find(parents, left);
    let right_root = find(parents, right);
    if left_root != right_root {
        // Lower index stays root so the best-ranked member anchors the cluster.
        let (keep, merge) = if left_root < right_root {
            (left_root, right_root)
        } else {
            (right_root, left_root)
        };
        parents[merge] = keep;
    }
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
