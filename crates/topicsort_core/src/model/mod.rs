//! Domain model for the categorization engine.
//!
//! # Responsibility
//! - Define topics, entries, oracle suggestions and proposal sets.
//! - Keep the "new topic" marker and the pseudo-topics as closed enums
//!   instead of nullable ids and magic rows.
//!
//! # Invariants
//! - Real topic ids are always >= 1.
//! - Confidence values are clamped into `[0, 1]` on construction.

pub mod entry;
pub mod proposal;
pub mod suggestion;
pub mod topic;
