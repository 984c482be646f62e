//! Core domain logic for topic categorization.
//! Owns the taxonomy invariants, the reconciliation engine and the
//! propose/review/apply workflow.

pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod model;
pub mod oracle;
pub mod repo;
pub mod service;

pub use config::{ConfigError, EngineConfig, OracleFetchConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use engine::reconcile::{rank_suggestions, reconcile, ReconcileError, ReconcileOptions};
pub use engine::similarity::name_similarity;
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entry::{Entry, EntryId};
pub use model::proposal::{
    EntryAssignment, EntryOutcome, ExistingTopicAssignment, NewTopicProposal, ProposalMetadata,
    ProposalSet, UnassignedEntry, UnassignedReason,
};
pub use model::suggestion::{EntrySuggestions, TopicRef, TopicSuggestion};
pub use model::topic::{
    OwnerId, TaxonomySnapshot, Topic, TopicId, TopicView, ALL_TOPICS_TOPIC_ID,
    UNCATEGORIZED_TOPIC_ID,
};
pub use oracle::{
    fetch_suggestions, FetchError, KeywordOracle, OracleError, OracleRequest, OracleResult,
    StaticOracle, SuggestionOracle,
};
pub use repo::taxonomy_repo::{
    EntryFilter, EntryTopicFilter, RepoError, RepoResult, SqliteTaxonomyStore, TaxonomyStore,
};
pub use service::categorize_service::{AnalyzeRequest, CategorizeResult, CategorizeService};
pub use service::coordinator::{apply_proposal_set, CommitResult};
pub use service::error::{ApplyError, CategorizeError, MissingRecord};
pub use service::quick::QuickCategorizeProposal;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
