//! Categorization use-case service.
//!
//! # Responsibility
//! - Orchestrate store reads, oracle fetches and the engine for analyze,
//!   quick-categorize and ad hoc text suggestions.
//! - Expose owner-scoped topic and entry management with pseudo-topic rules.
//! - Delegate commits to the proposal coordinator.
//!
//! # Invariants
//! - Input is validated before any oracle call.
//! - Read paths never mutate the store.
//! - Pseudo-topics are never created, renamed, deleted or assigned.

use crate::config::EngineConfig;
use crate::engine::reconcile::reconcile;
use crate::model::entry::{Entry, EntryId};
use crate::model::proposal::ProposalSet;
use crate::model::suggestion::{EntrySuggestions, TopicSuggestion};
use crate::model::topic::{
    is_pseudo_topic_id, OwnerId, TaxonomySnapshot, Topic, TopicId, TopicView,
    ALL_TOPICS_TOPIC_ID, UNCATEGORIZED_TOPIC_ID,
};
use crate::oracle::{fetch_suggestions, SuggestionOracle};
use crate::repo::taxonomy_repo::{EntryFilter, TaxonomyStore};
use crate::service::coordinator::{apply_proposal_set, CommitResult};
use crate::service::error::{CategorizeError, MissingRecord};
use crate::service::quick::{
    build_quick_proposals, dedupe_preserving_order, QuickCategorizeProposal,
};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub type CategorizeResult<T> = Result<T, CategorizeError>;

/// Synthetic id used when ad hoc text is sent through the oracle.
const AD_HOC_ENTRY_ID: EntryId = 0;

/// Options for one analyze run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeRequest {
    /// Free-form guidance forwarded to the oracle.
    pub instructions: Option<String>,
    /// Existing topics to favour when routing new-topic names.
    pub topics_to_keep: Vec<TopicId>,
}

/// Use-case service over one taxonomy store and one oracle.
pub struct CategorizeService<S: TaxonomyStore> {
    store: S,
    oracle: Arc<dyn SuggestionOracle>,
    config: EngineConfig,
}

impl<S: TaxonomyStore> CategorizeService<S> {
    pub fn new(store: S, oracle: Arc<dyn SuggestionOracle>, config: EngineConfig) -> Self {
        Self {
            store,
            oracle,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Topic list as shown to users: All Topics, Uncategorized, real topics.
    pub fn list_topic_views(&self, owner_id: OwnerId) -> CategorizeResult<Vec<TopicView>> {
        Ok(self.store.snapshot(owner_id)?.views())
    }

    /// One topic by wire id; `0` and `-1` resolve to the pseudo-topic views.
    pub fn get_topic_view(
        &self,
        owner_id: OwnerId,
        topic_id: TopicId,
    ) -> CategorizeResult<TopicView> {
        if is_pseudo_topic_id(topic_id) {
            let snapshot = self.store.snapshot(owner_id)?;
            return snapshot
                .views()
                .into_iter()
                .find(|view| view.wire_id() == topic_id)
                .ok_or(CategorizeError::NotFound(MissingRecord::Topic(topic_id)));
        }
        self.store
            .get_topic(owner_id, topic_id)?
            .map(TopicView::Real)
            .ok_or(CategorizeError::NotFound(MissingRecord::Topic(topic_id)))
    }

    pub fn create_topic(&mut self, owner_id: OwnerId, name: &str) -> CategorizeResult<Topic> {
        Ok(self.store.create_topic(owner_id, name)?)
    }

    pub fn rename_topic(
        &mut self,
        owner_id: OwnerId,
        topic_id: TopicId,
        name: &str,
    ) -> CategorizeResult<Topic> {
        reject_pseudo_topic(topic_id, "renamed")?;
        Ok(self.store.update_topic(owner_id, topic_id, name)?)
    }

    /// Soft-deletes a topic; its entries become uncategorized.
    pub fn delete_topic(&mut self, owner_id: OwnerId, topic_id: TopicId) -> CategorizeResult<()> {
        reject_pseudo_topic(topic_id, "deleted")?;
        Ok(self.store.delete_topic(owner_id, topic_id)?)
    }

    /// Entry counts keyed by wire id, including `0` (Uncategorized) and `-1`
    /// (All Topics).
    pub fn topic_entry_counts(
        &self,
        owner_id: OwnerId,
    ) -> CategorizeResult<BTreeMap<TopicId, u32>> {
        let mut counts = self.store.topic_entry_counts(owner_id)?;
        let total: u32 = counts.values().sum();
        counts.insert(ALL_TOPICS_TOPIC_ID, total);
        Ok(counts)
    }

    /// Creates an entry, optionally bound to a real topic.
    pub fn create_entry(
        &mut self,
        owner_id: OwnerId,
        content: &str,
        topic_id: Option<TopicId>,
    ) -> CategorizeResult<Entry> {
        if content.trim().is_empty() {
            return Err(CategorizeError::Validation(
                "entry content cannot be empty".to_string(),
            ));
        }
        let topic_id = match topic_id {
            Some(UNCATEGORIZED_TOPIC_ID) | None => None,
            Some(id) => {
                reject_pseudo_topic(id, "assigned")?;
                Some(id)
            }
        };
        Ok(self.store.create_entry(owner_id, content, topic_id)?)
    }

    pub fn list_entries(
        &self,
        owner_id: OwnerId,
        filter: &EntryFilter,
    ) -> CategorizeResult<Vec<Entry>> {
        Ok(self.store.list_entries(owner_id, filter)?)
    }

    /// Runs the oracle over the owner's uncategorized entries and reconciles
    /// the output into a reviewable proposal set.
    ///
    /// No uncategorized entries yields an empty set at the current version.
    ///
    /// # Errors
    /// - `Validation` / `NotFound` for pseudo or unknown `topics_to_keep`.
    /// - `OracleUnavailable` / `IncompleteOracleOutput` from the fetch.
    pub fn analyze(
        &self,
        owner_id: OwnerId,
        request: &AnalyzeRequest,
    ) -> CategorizeResult<ProposalSet> {
        let started_at = Instant::now();
        let result = self.analyze_inner(owner_id, request);
        log_outcome("analyze_categorization", owner_id, started_at, &result, |set| {
            set.metadata.total_entries_analyzed as usize
        });
        result
    }

    fn analyze_inner(
        &self,
        owner_id: OwnerId,
        request: &AnalyzeRequest,
    ) -> CategorizeResult<ProposalSet> {
        let snapshot = Arc::new(self.store.snapshot(owner_id)?);
        let mut topics_to_keep = BTreeSet::new();
        for topic_id in &request.topics_to_keep {
            reject_pseudo_topic(*topic_id, "kept")?;
            if !snapshot.contains(*topic_id) {
                return Err(CategorizeError::NotFound(MissingRecord::Topic(*topic_id)));
            }
            topics_to_keep.insert(*topic_id);
        }

        let entries = self
            .store
            .list_entries(owner_id, &EntryFilter::uncategorized())?;
        if entries.is_empty() {
            return Ok(empty_proposal_set(&snapshot));
        }

        let raw = self.fetch(&entries, &snapshot, request.instructions.as_deref())?;
        let options = self.config.reconcile_options(topics_to_keep);
        Ok(reconcile(&entries, &snapshot, &raw, &options)?)
    }

    /// Commits an approved proposal set.
    pub fn apply(
        &mut self,
        owner_id: OwnerId,
        set: &ProposalSet,
        snapshot_version: Option<u64>,
    ) -> CategorizeResult<CommitResult> {
        Ok(apply_proposal_set(
            &mut self.store,
            owner_id,
            set,
            snapshot_version,
        )?)
    }

    /// Ranked suggestions for each requested entry, in request order.
    ///
    /// Repeated ids are answered once. Nothing is committed.
    ///
    /// # Errors
    /// - `EmptyInput` for an empty id list.
    /// - `NotFound` when an id does not exist for the owner.
    pub fn quick_categorize(
        &self,
        owner_id: OwnerId,
        entry_ids: &[EntryId],
    ) -> CategorizeResult<Vec<QuickCategorizeProposal>> {
        let started_at = Instant::now();
        let result = self.quick_categorize_inner(owner_id, entry_ids);
        log_outcome("quick_categorize", owner_id, started_at, &result, Vec::len);
        result
    }

    fn quick_categorize_inner(
        &self,
        owner_id: OwnerId,
        entry_ids: &[EntryId],
    ) -> CategorizeResult<Vec<QuickCategorizeProposal>> {
        let entry_ids = dedupe_preserving_order(entry_ids);
        if entry_ids.is_empty() {
            return Err(CategorizeError::EmptyInput);
        }
        let entries = self.load_entries_in_order(owner_id, &entry_ids)?;
        let snapshot = Arc::new(self.store.snapshot(owner_id)?);
        let raw = self.fetch(&entries, &snapshot, None)?;
        let options = self.config.reconcile_options(BTreeSet::new());
        Ok(build_quick_proposals(
            &entries,
            &raw,
            &snapshot,
            &options,
            self.config.max_quick_suggestions,
        ))
    }

    /// Full reconciliation over the given entries, or over every
    /// uncategorized entry when `entry_ids` is `None`. Nothing is committed.
    ///
    /// An empty selection yields an empty set rather than an error.
    pub fn quick_categorize_uncategorized(
        &self,
        owner_id: OwnerId,
        entry_ids: Option<&[EntryId]>,
    ) -> CategorizeResult<ProposalSet> {
        let started_at = Instant::now();
        let result = self.quick_categorize_uncategorized_inner(owner_id, entry_ids);
        log_outcome("quick_categorize", owner_id, started_at, &result, |set| {
            set.metadata.total_entries_analyzed as usize
        });
        result
    }

    fn quick_categorize_uncategorized_inner(
        &self,
        owner_id: OwnerId,
        entry_ids: Option<&[EntryId]>,
    ) -> CategorizeResult<ProposalSet> {
        let snapshot = Arc::new(self.store.snapshot(owner_id)?);
        let entries = match entry_ids {
            Some(ids) => {
                let ids = dedupe_preserving_order(ids);
                let mut entries = self.load_entries_in_order(owner_id, &ids)?;
                entries.sort_by_key(|entry| entry.id);
                entries
            }
            None => self
                .store
                .list_entries(owner_id, &EntryFilter::uncategorized())?,
        };
        if entries.is_empty() {
            return Ok(empty_proposal_set(&snapshot));
        }

        let raw = self.fetch(&entries, &snapshot, None)?;
        let options = self.config.reconcile_options(BTreeSet::new());
        Ok(reconcile(&entries, &snapshot, &raw, &options)?)
    }

    /// Ranked topic suggestions for free text that is not stored yet.
    pub fn suggest_for_text(
        &self,
        owner_id: OwnerId,
        text: &str,
    ) -> CategorizeResult<Vec<TopicSuggestion>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CategorizeError::Validation(
                "text cannot be empty".to_string(),
            ));
        }
        let entry = Entry {
            id: AD_HOC_ENTRY_ID,
            owner_id,
            content: text.to_string(),
            topic_id: None,
            created_at: now_epoch_ms(),
        };
        let entries = [entry];
        let snapshot = Arc::new(self.store.snapshot(owner_id)?);
        let raw = self.fetch(&entries, &snapshot, None)?;
        let options = self.config.reconcile_options(BTreeSet::new());
        let mut proposals = build_quick_proposals(
            &entries,
            &raw,
            &snapshot,
            &options,
            self.config.max_quick_suggestions,
        );
        Ok(proposals
            .pop()
            .map(|proposal| proposal.suggestions)
            .unwrap_or_default())
    }

    fn fetch(
        &self,
        entries: &[Entry],
        snapshot: &Arc<TaxonomySnapshot>,
        instructions: Option<&str>,
    ) -> CategorizeResult<Vec<EntrySuggestions>> {
        Ok(fetch_suggestions(
            Arc::clone(&self.oracle),
            entries,
            Arc::clone(snapshot),
            instructions,
            &self.config.oracle,
        )?)
    }

    fn load_entries_in_order(
        &self,
        owner_id: OwnerId,
        entry_ids: &[EntryId],
    ) -> CategorizeResult<Vec<Entry>> {
        let mut found: BTreeMap<EntryId, Entry> = self
            .store
            .list_entries(owner_id, &EntryFilter::by_ids(entry_ids.to_vec()))?
            .into_iter()
            .map(|entry| (entry.id, entry))
            .collect();
        entry_ids
            .iter()
            .map(|id| {
                found
                    .remove(id)
                    .ok_or(CategorizeError::NotFound(MissingRecord::Entry(*id)))
            })
            .collect()
    }
}

fn reject_pseudo_topic(topic_id: TopicId, action: &str) -> CategorizeResult<()> {
    if is_pseudo_topic_id(topic_id) {
        return Err(CategorizeError::Validation(format!(
            "pseudo-topic {topic_id} cannot be {action}"
        )));
    }
    Ok(())
}

fn empty_proposal_set(snapshot: &TaxonomySnapshot) -> ProposalSet {
    ProposalSet {
        owner_id: snapshot.owner_id,
        snapshot_version: snapshot.version,
        ..ProposalSet::default()
    }
}

fn log_outcome<T>(
    event: &str,
    owner_id: OwnerId,
    started_at: Instant,
    result: &CategorizeResult<T>,
    count: impl Fn(&T) -> usize,
) {
    match result {
        Ok(value) => info!(
            "event={} module=service status=ok owner_id={} entries={} duration_ms={}",
            event,
            owner_id,
            count(value),
            started_at.elapsed().as_millis()
        ),
        Err(err) => warn!(
            "event={} module=service status=error owner_id={} error_code={} duration_ms={}",
            event,
            owner_id,
            err.error_code(),
            started_at.elapsed().as_millis()
        ),
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
