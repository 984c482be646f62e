use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use topicsort_core::{
    fetch_suggestions, Entry, EntrySuggestions, FetchError, OracleError, OracleFetchConfig,
    OracleRequest, OracleResult, StaticOracle, SuggestionOracle, TaxonomySnapshot,
    TopicSuggestion,
};

fn entries(count: i64) -> Vec<Entry> {
    (1..=count)
        .map(|id| Entry {
            id,
            owner_id: 1,
            content: format!("entry {id}"),
            topic_id: None,
            created_at: 0,
        })
        .collect()
}

fn config(max_concurrency: usize, batch_size: usize, timeout_ms: u64) -> OracleFetchConfig {
    OracleFetchConfig {
        max_concurrency,
        batch_size,
        timeout_ms,
    }
}

/// Answers every entry, tracking how many calls run at once.
struct CountingOracle {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    batches: Mutex<Vec<usize>>,
}

impl CountingOracle {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        }
    }
}

impl SuggestionOracle for CountingOracle {
    fn oracle_id(&self) -> &str {
        "counting"
    }

    fn suggest(&self, request: &OracleRequest) -> OracleResult<Vec<EntrySuggestions>> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        self.batches.lock().unwrap().push(request.entries.len());
        thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(request
            .entries
            .iter()
            .map(|entry| {
                EntrySuggestions::new(
                    entry.id,
                    vec![TopicSuggestion::propose_new("Topic", 0.7)],
                )
            })
            .collect())
    }
}

struct FailingOracle;

impl SuggestionOracle for FailingOracle {
    fn oracle_id(&self) -> &str {
        "failing"
    }

    fn suggest(&self, _request: &OracleRequest) -> OracleResult<Vec<EntrySuggestions>> {
        Err(OracleError::Unavailable("503 from upstream".to_string()))
    }
}

struct PanickingOracle;

impl SuggestionOracle for PanickingOracle {
    fn oracle_id(&self) -> &str {
        "panicking"
    }

    fn suggest(&self, request: &OracleRequest) -> OracleResult<Vec<EntrySuggestions>> {
        if request.entries.iter().any(|entry| entry.id == 2) {
            panic!("oracle worker crashed");
        }
        Ok(request
            .entries
            .iter()
            .map(|entry| EntrySuggestions::new(entry.id, Vec::new()))
            .collect())
    }
}

#[test]
fn fetch_covers_every_entry_with_bounded_concurrency() {
    let oracle = Arc::new(CountingOracle::new(Duration::from_millis(30)));
    let snapshot = Arc::new(TaxonomySnapshot::default());

    let output = fetch_suggestions(
        oracle.clone(),
        &entries(10),
        snapshot,
        Some("group by theme"),
        &config(2, 3, 5_000),
    )
    .unwrap();

    let ids: Vec<i64> = output.iter().map(|record| record.entry_id).collect();
    assert_eq!(ids, (1..=10).collect::<Vec<i64>>());
    assert!(oracle.peak.load(Ordering::SeqCst) <= 2);
    let mut batches = oracle.batches.lock().unwrap().clone();
    batches.sort_unstable();
    assert_eq!(batches, vec![1, 3, 3, 3]);
}

#[test]
fn timeout_reports_missing_entries() {
    let oracle = Arc::new(CountingOracle::new(Duration::from_millis(500)));

    let err = fetch_suggestions(
        oracle,
        &entries(2),
        Arc::new(TaxonomySnapshot::default()),
        None,
        &config(1, 1, 50),
    )
    .unwrap_err();

    assert_eq!(err, FetchError::Incomplete { missing: vec![1, 2] });
}

#[test]
fn oracle_failure_is_reported_as_unavailable() {
    let err = fetch_suggestions(
        Arc::new(FailingOracle),
        &entries(3),
        Arc::new(TaxonomySnapshot::default()),
        None,
        &OracleFetchConfig::default(),
    )
    .unwrap_err();

    assert!(matches!(err, FetchError::Unavailable(OracleError::Unavailable(_))));
}

#[test]
fn omitted_and_crashed_batches_are_incomplete() {
    let oracle = StaticOracle::new().with(1, vec![TopicSuggestion::propose_new("A", 0.9)]);
    let err = fetch_suggestions(
        Arc::new(oracle),
        &entries(2),
        Arc::new(TaxonomySnapshot::default()),
        None,
        &OracleFetchConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err, FetchError::Incomplete { missing: vec![2] });

    let err = fetch_suggestions(
        Arc::new(PanickingOracle),
        &entries(3),
        Arc::new(TaxonomySnapshot::default()),
        None,
        &config(1, 1, 5_000),
    )
    .unwrap_err();
    assert_eq!(err, FetchError::Incomplete { missing: vec![2, 3] });
}

#[test]
fn empty_input_needs_no_oracle_call() {
    let output = fetch_suggestions(
        Arc::new(FailingOracle),
        &[],
        Arc::new(TaxonomySnapshot::default()),
        None,
        &OracleFetchConfig::default(),
    )
    .unwrap();
    assert!(output.is_empty());
}
