//! Suggestion oracle contract and in-process implementations.
//!
//! # Responsibility
//! - Define the boundary to the external classification service.
//! - Provide replay and lexical oracles for offline use.
//!
//! # Invariants
//! - Oracles are `Send + Sync` so batches can be fetched concurrently.
//! - An oracle never fabricates output for entries it was not asked about;
//!   extra records are ignored by callers.

mod fanout;
mod keyword;

pub use fanout::{fetch_suggestions, FetchError};
pub use keyword::KeywordOracle;

use crate::model::entry::{Entry, EntryId};
use crate::model::suggestion::{EntrySuggestions, TopicSuggestion};
use crate::model::topic::TaxonomySnapshot;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type OracleResult<T> = Result<T, OracleError>;

/// Failure reported by an oracle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Service unreachable, overloaded or refusing requests.
    Unavailable(String),
    /// Service answered with something that cannot be interpreted.
    InvalidResponse(String),
}

impl Display for OracleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "suggestion oracle unavailable: {message}"),
            Self::InvalidResponse(message) => {
                write!(f, "suggestion oracle returned invalid response: {message}")
            }
        }
    }
}

impl Error for OracleError {}

/// One batch handed to an oracle.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub entries: Vec<Entry>,
    pub snapshot: Arc<TaxonomySnapshot>,
    /// Free-form user guidance, passed through untouched.
    pub instructions: Option<String>,
}

/// External classification service.
pub trait SuggestionOracle: Send + Sync {
    /// Stable identifier used in logs.
    fn oracle_id(&self) -> &str;

    /// Returns candidate topics for every entry in the request.
    fn suggest(&self, request: &OracleRequest) -> OracleResult<Vec<EntrySuggestions>>;
}

/// Replays previously captured suggestions.
///
/// Entries without a stored record are omitted from the answer, which callers
/// surface as incomplete oracle output.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    suggestions: BTreeMap<EntryId, Vec<TopicSuggestion>>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = EntrySuggestions>) -> Self {
        let mut oracle = Self::new();
        for record in records {
            oracle.insert(record.entry_id, record.suggestions);
        }
        oracle
    }

    pub fn insert(&mut self, entry_id: EntryId, suggestions: Vec<TopicSuggestion>) {
        self.suggestions
            .entry(entry_id)
            .or_default()
            .extend(suggestions);
    }

    pub fn with(mut self, entry_id: EntryId, suggestions: Vec<TopicSuggestion>) -> Self {
        self.insert(entry_id, suggestions);
        self
    }
}

impl SuggestionOracle for StaticOracle {
    fn oracle_id(&self) -> &str {
        "static"
    }

    fn suggest(&self, request: &OracleRequest) -> OracleResult<Vec<EntrySuggestions>> {
        Ok(request
            .entries
            .iter()
            .filter_map(|entry| {
                self.suggestions
                    .get(&entry.id)
                    .map(|suggestions| EntrySuggestions::new(entry.id, suggestions.clone()))
            })
            .collect())
    }
}
