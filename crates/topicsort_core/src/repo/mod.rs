//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the taxonomy-store contract consumed by the engine.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`TopicNotFound`,
//!   `EntryNotFound`, `StaleProposal`) in addition to DB transport errors.
//! - Every query is scoped to one owner.

pub mod taxonomy_repo;
