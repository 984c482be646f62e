//! Bounded-parallel oracle fetch with a per-call deadline.
//!
//! Entries are split into batches; at most `max_concurrency` worker threads
//! pull batches from a shared queue. The caller waits for every batch or the
//! deadline, whichever comes first. Workers still running at the deadline are
//! abandoned: a cancellation flag stops them from taking more batches and
//! their late results are dropped.
//!
//! Threads are detached, not joined. An oracle call that never returns keeps
//! its worker thread alive, so every timed-out fetch against a hung oracle
//! leaks up to `max_concurrency` threads.

use super::{OracleError, OracleRequest, SuggestionOracle};
use crate::config::OracleFetchConfig;
use crate::model::entry::{Entry, EntryId};
use crate::model::suggestion::{EntrySuggestions, TopicSuggestion};
use crate::model::topic::TaxonomySnapshot;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

/// Fetch failure. Partial output is never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    Unavailable(OracleError),
    /// Timed out, a worker died, or the oracle omitted these entries.
    Incomplete { missing: Vec<EntryId> },
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(err) => write!(f, "{err}"),
            Self::Incomplete { missing } => {
                write!(f, "oracle returned no suggestions for entries {missing:?}")
            }
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unavailable(err) => Some(err),
            Self::Incomplete { .. } => None,
        }
    }
}

type BatchOutcome = Result<Vec<EntrySuggestions>, OracleError>;

/// Fetches suggestions for `entries`, one record per entry, sorted by id.
///
/// # Errors
/// - `Unavailable` with the first oracle error observed.
/// - `Incomplete` listing entries without a record when the deadline passes,
///   a worker panics, or the oracle skips entries.
pub fn fetch_suggestions(
    oracle: Arc<dyn SuggestionOracle>,
    entries: &[Entry],
    snapshot: Arc<TaxonomySnapshot>,
    instructions: Option<&str>,
    config: &OracleFetchConfig,
) -> Result<Vec<EntrySuggestions>, FetchError> {
    let started_at = Instant::now();
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let batch_size = config.batch_size.max(1);
    let batches: VecDeque<Vec<Entry>> = entries
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect();
    let batch_count = batches.len();
    let worker_count = config.max_concurrency.max(1).min(batch_count);
    info!(
        "event=oracle_fetch module=oracle status=start oracle={} entries={} batches={} workers={}",
        oracle.oracle_id(),
        entries.len(),
        batch_count,
        worker_count
    );

    let queue = Arc::new(Mutex::new(batches));
    let cancelled = Arc::new(AtomicBool::new(false));
    let instructions = instructions.map(str::to_string);
    let (tx, rx) = mpsc::channel::<BatchOutcome>();

    for worker_index in 0..worker_count {
        let queue = Arc::clone(&queue);
        let worker_cancelled = Arc::clone(&cancelled);
        let worker_oracle = Arc::clone(&oracle);
        let snapshot = Arc::clone(&snapshot);
        let instructions = instructions.clone();
        let tx = tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("oracle-fetch-{worker_index}"))
            .spawn(move || loop {
                if worker_cancelled.load(Ordering::Acquire) {
                    break;
                }
                let next = match queue.lock() {
                    Ok(mut pending) => pending.pop_front(),
                    Err(_) => None,
                };
                let Some(batch) = next else {
                    break;
                };
                let request = OracleRequest {
                    entries: batch,
                    snapshot: Arc::clone(&snapshot),
                    instructions: instructions.clone(),
                };
                if tx.send(worker_oracle.suggest(&request)).is_err() {
                    break;
                }
            });
        if let Err(err) = spawned {
            cancelled.store(true, Ordering::Release);
            let error = OracleError::Unavailable(format!("failed to spawn oracle worker: {err}"));
            log_failure(oracle.oracle_id(), "oracle_worker_spawn_failed", started_at);
            return Err(FetchError::Unavailable(error));
        }
    }
    drop(tx);

    let wanted: BTreeSet<EntryId> = entries.iter().map(|entry| entry.id).collect();
    let mut collected: BTreeMap<EntryId, Vec<TopicSuggestion>> = BTreeMap::new();
    let deadline = started_at + config.timeout();
    let mut received = 0usize;
    while received < batch_count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Ok(records)) => {
                received += 1;
                for record in records {
                    if wanted.contains(&record.entry_id) {
                        collected
                            .entry(record.entry_id)
                            .or_default()
                            .extend(record.suggestions);
                    }
                }
            }
            Ok(Err(err)) => {
                cancelled.store(true, Ordering::Release);
                log_failure(oracle.oracle_id(), "oracle_unavailable", started_at);
                return Err(FetchError::Unavailable(err));
            }
            Err(RecvTimeoutError::Timeout) => {
                cancelled.store(true, Ordering::Release);
                warn!(
                    "event=oracle_fetch module=oracle status=timeout oracle={} batches_received={} batches_total={}",
                    oracle.oracle_id(),
                    received,
                    batch_count
                );
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let missing: Vec<EntryId> = wanted
        .iter()
        .copied()
        .filter(|id| !collected.contains_key(id))
        .collect();
    if !missing.is_empty() {
        log_failure(oracle.oracle_id(), "incomplete_oracle_output", started_at);
        return Err(FetchError::Incomplete { missing });
    }

    info!(
        "event=oracle_fetch module=oracle status=ok oracle={} entries={} duration_ms={}",
        oracle.oracle_id(),
        collected.len(),
        started_at.elapsed().as_millis()
    );
    Ok(collected
        .into_iter()
        .map(|(entry_id, suggestions)| EntrySuggestions::new(entry_id, suggestions))
        .collect())
}

fn log_failure(oracle_id: &str, error_code: &str, started_at: Instant) {
    warn!(
        "event=oracle_fetch module=oracle status=error oracle={} error_code={} duration_ms={}",
        oracle_id,
        error_code,
        started_at.elapsed().as_millis()
    );
}
