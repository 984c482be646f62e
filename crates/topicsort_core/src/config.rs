//! Engine configuration.
//!
//! # Responsibility
//! - Hold the tunable thresholds and oracle fan-out limits.
//! - Load them from JSON with per-field defaults and validate ranges.
//!
//! # Invariants
//! - Thresholds are finite and inside `[0, 1]`.
//! - Counts and concurrency limits are non-zero.

use crate::engine::reconcile::ReconcileOptions;
use crate::model::topic::TopicId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.5;
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.85;
pub const DEFAULT_SIMILAR_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MAX_NEAR_MISSES: usize = 3;
pub const DEFAULT_MAX_ALTERNATIVES: usize = 3;
pub const DEFAULT_MAX_QUICK_SUGGESTIONS: usize = 5;

/// Configuration load/validation error.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// A threshold is NaN, infinite or outside `[0, 1]`.
    ThresholdOutOfRange { field: &'static str, value: f64 },
    /// A count or limit is zero.
    ZeroLimit(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::ThresholdOutOfRange { field, value } => {
                write!(f, "`{field}` must be within [0, 1], got {value}")
            }
            Self::ZeroLimit(field) => write!(f, "`{field}` must be greater than zero"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

/// Bounded-parallelism settings for oracle calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleFetchConfig {
    /// Maximum concurrent oracle batches.
    pub max_concurrency: usize,
    /// Entries per oracle call.
    pub batch_size: usize,
    /// Deadline for the whole fetch, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for OracleFetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            batch_size: 8,
            timeout_ms: 30_000,
        }
    }
}

impl OracleFetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub confidence_floor: f64,
    pub merge_threshold: f64,
    pub similar_threshold: f64,
    pub max_near_misses: usize,
    pub max_alternatives: usize,
    pub max_quick_suggestions: usize,
    pub oracle: OracleFetchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            similar_threshold: DEFAULT_SIMILAR_THRESHOLD,
            max_near_misses: DEFAULT_MAX_NEAR_MISSES,
            max_alternatives: DEFAULT_MAX_ALTERNATIVES,
            max_quick_suggestions: DEFAULT_MAX_QUICK_SUGGESTIONS,
            oracle: OracleFetchConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON document. Missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("confidence_floor", self.confidence_floor),
            ("merge_threshold", self.merge_threshold),
            ("similar_threshold", self.similar_threshold),
        ] {
            if !is_unit_interval(value) {
                return Err(ConfigError::ThresholdOutOfRange { field, value });
            }
        }

        for (field, value) in [
            ("max_near_misses", self.max_near_misses),
            ("max_alternatives", self.max_alternatives),
            ("max_quick_suggestions", self.max_quick_suggestions),
            ("oracle.max_concurrency", self.oracle.max_concurrency),
            ("oracle.batch_size", self.oracle.batch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit(field));
            }
        }
        if self.oracle.timeout_ms == 0 {
            return Err(ConfigError::ZeroLimit("oracle.timeout_ms"));
        }
        Ok(())
    }

    /// Builds engine options for one run.
    pub fn reconcile_options(&self, topics_to_keep: BTreeSet<TopicId>) -> ReconcileOptions {
        ReconcileOptions {
            confidence_floor: self.confidence_floor,
            topics_to_keep,
            merge_threshold: self.merge_threshold,
            similar_threshold: self.similar_threshold,
            max_near_misses: self.max_near_misses,
            max_alternatives: self.max_alternatives,
        }
    }
}

pub(crate) fn is_unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig};

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_json_str("{}").expect("defaults should validate");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.oracle.batch_size, 8);
    }

    #[test]
    fn partial_document_overrides_only_given_fields() {
        let config = EngineConfig::from_json_str(
            r#"{"confidence_floor": 0.7, "oracle": {"timeout_ms": 500}}"#,
        )
        .expect("partial config should parse");
        assert_eq!(config.confidence_floor, 0.7);
        assert_eq!(config.oracle.timeout_ms, 500);
        assert_eq!(config.oracle.max_concurrency, 4);
        assert_eq!(config.merge_threshold, 0.85);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"merge_threshold": 1.5}"#)
            .expect_err("threshold above 1 must fail");
        assert!(matches!(
            err,
            ConfigError::ThresholdOutOfRange {
                field: "merge_threshold",
                ..
            }
        ));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"oracle": {"batch_size": 0}}"#)
            .expect_err("zero batch size must fail");
        assert!(matches!(err, ConfigError::ZeroLimit("oracle.batch_size")));
    }

    #[test]
    fn reconcile_options_copy_thresholds() {
        let config = EngineConfig::default();
        let options = config.reconcile_options([4].into_iter().collect());
        assert_eq!(options.confidence_floor, 0.5);
        assert!(options.topics_to_keep.contains(&4));
        assert_eq!(options.max_near_misses, 3);
    }
}
