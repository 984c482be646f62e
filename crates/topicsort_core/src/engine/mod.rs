//! Reconciliation engine: raw oracle output to a deduplicated proposal set.

pub mod reconcile;
pub mod similarity;
