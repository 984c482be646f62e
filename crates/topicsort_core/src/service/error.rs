//! Service-level error taxonomy.
//!
//! Callers branch on the variant; logs and API bodies use `error_code()`.

use crate::engine::reconcile::ReconcileError;
use crate::model::entry::EntryId;
use crate::model::topic::TopicId;
use crate::oracle::{FetchError, OracleError};
use crate::repo::taxonomy_repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Record a request referenced that does not exist for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingRecord {
    Topic(TopicId),
    Entry(EntryId),
}

impl Display for MissingRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic(id) => write!(f, "topic not found: {id}"),
            Self::Entry(id) => write!(f, "entry not found: {id}"),
        }
    }
}

/// Failure of [`crate::service::coordinator::apply_proposal_set`].
#[derive(Debug)]
pub enum ApplyError {
    /// The proposal set is malformed; nothing was read from the store.
    Validation(String),
    StaleProposal {
        topic_ids: Vec<TopicId>,
        /// Entries whose topic link moved since the proposal was computed.
        entry_ids: Vec<EntryId>,
        expected_version: u64,
        current_version: u64,
    },
    NotFound(MissingRecord),
    Repo(RepoError),
}

impl ApplyError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::StaleProposal { .. } => "stale_proposal",
            Self::NotFound(_) => "not_found",
            Self::Repo(_) => "storage_error",
        }
    }
}

impl Display for ApplyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(message) => write!(f, "invalid proposal set: {message}"),
            Self::StaleProposal {
                topic_ids,
                entry_ids,
                expected_version,
                current_version,
            } => write!(
                f,
                "stale proposal: topics {topic_ids:?} and entries {entry_ids:?} changed (expected version {expected_version}, current {current_version})"
            ),
            Self::NotFound(record) => write!(f, "{record}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ApplyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ApplyError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::StaleProposal {
                topic_ids,
                entry_ids,
                expected_version,
                current_version,
            } => Self::StaleProposal {
                topic_ids,
                entry_ids,
                expected_version,
                current_version,
            },
            RepoError::TopicNotFound(id) => Self::NotFound(MissingRecord::Topic(id)),
            RepoError::EntryNotFound(id) => Self::NotFound(MissingRecord::Entry(id)),
            RepoError::InvalidTopicName(name) => {
                Self::Validation(format!("invalid topic name: `{name}`"))
            }
            RepoError::ReservedTopicName(name) => {
                Self::Validation(format!("topic name is reserved: `{name}`"))
            }
            other => Self::Repo(other),
        }
    }
}

/// Error returned by [`crate::service::categorize_service::CategorizeService`].
#[derive(Debug)]
pub enum CategorizeError {
    /// Malformed or missing input, rejected before any oracle call.
    Validation(String),
    EmptyInput,
    InvalidThreshold { field: &'static str, value: f64 },
    /// Oracle timed out or omitted these entries.
    IncompleteOracleOutput { missing: Vec<EntryId> },
    OracleUnavailable(OracleError),
    /// Another active topic already uses this name.
    DuplicateTopicName(String),
    StaleProposal {
        topic_ids: Vec<TopicId>,
        /// Entries whose topic link moved since the proposal was computed.
        entry_ids: Vec<EntryId>,
        expected_version: u64,
        current_version: u64,
    },
    NotFound(MissingRecord),
    Repo(RepoError),
}

impl CategorizeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::EmptyInput => "empty_input",
            Self::InvalidThreshold { .. } => "invalid_threshold",
            Self::IncompleteOracleOutput { .. } => "incomplete_oracle_output",
            Self::OracleUnavailable(_) => "oracle_unavailable",
            Self::DuplicateTopicName(_) => "duplicate_topic_name",
            Self::StaleProposal { .. } => "stale_proposal",
            Self::NotFound(_) => "not_found",
            Self::Repo(_) => "storage_error",
        }
    }

    /// Whether the caller can fix the request and retry as-is.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::EmptyInput | Self::InvalidThreshold { .. }
        )
    }
}

impl Display for CategorizeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(message) => write!(f, "{message}"),
            Self::EmptyInput => write!(f, "no entries to categorize"),
            Self::InvalidThreshold { field, value } => {
                write!(f, "`{field}` must be within [0, 1], got {value}")
            }
            Self::IncompleteOracleOutput { missing } => {
                write!(f, "suggestion oracle returned no output for entries {missing:?}")
            }
            Self::OracleUnavailable(err) => write!(f, "{err}"),
            Self::DuplicateTopicName(name) => write!(f, "topic name already exists: `{name}`"),
            Self::StaleProposal {
                topic_ids,
                entry_ids,
                expected_version,
                current_version,
            } => write!(
                f,
                "stale proposal: topics {topic_ids:?} and entries {entry_ids:?} changed (expected version {expected_version}, current {current_version})"
            ),
            Self::NotFound(record) => write!(f, "{record}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CategorizeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::OracleUnavailable(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for CategorizeError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::InvalidTopicName(name) => {
                Self::Validation(format!("invalid topic name: `{name}`"))
            }
            RepoError::ReservedTopicName(name) => {
                Self::Validation(format!("topic name is reserved: `{name}`"))
            }
            RepoError::DuplicateTopicName(name) => Self::DuplicateTopicName(name),
            RepoError::TopicNotFound(id) => Self::NotFound(MissingRecord::Topic(id)),
            RepoError::EntryNotFound(id) => Self::NotFound(MissingRecord::Entry(id)),
            RepoError::StaleProposal {
                topic_ids,
                entry_ids,
                expected_version,
                current_version,
            } => Self::StaleProposal {
                topic_ids,
                entry_ids,
                expected_version,
                current_version,
            },
            other => Self::Repo(other),
        }
    }
}

impl From<ApplyError> for CategorizeError {
    fn from(value: ApplyError) -> Self {
        match value {
            ApplyError::Validation(message) => Self::Validation(message),
            ApplyError::StaleProposal {
                topic_ids,
                entry_ids,
                expected_version,
                current_version,
            } => Self::StaleProposal {
                topic_ids,
                entry_ids,
                expected_version,
                current_version,
            },
            ApplyError::NotFound(record) => Self::NotFound(record),
            ApplyError::Repo(err) => Self::Repo(err),
        }
    }
}

impl From<ReconcileError> for CategorizeError {
    fn from(value: ReconcileError) -> Self {
        match value {
            ReconcileError::EmptyInput => Self::EmptyInput,
            ReconcileError::InvalidThreshold { field, value } => {
                Self::InvalidThreshold { field, value }
            }
            ReconcileError::IncompleteOracleOutput { missing } => {
                Self::IncompleteOracleOutput { missing }
            }
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<FetchError> for CategorizeError {
    fn from(value: FetchError) -> Self {
        match value {
            FetchError::Unavailable(err) => Self::OracleUnavailable(err),
            FetchError::Incomplete { missing } => Self::IncompleteOracleOutput { missing },
        }
    }
}
