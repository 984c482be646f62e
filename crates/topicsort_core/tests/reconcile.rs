use std::collections::BTreeSet;
use topicsort_core::{
    reconcile, Entry, EntryOutcome, EntrySuggestions, ReconcileError, ReconcileOptions, TaxonomySnapshot, Topic,
    TopicRef, TopicSuggestion, UnassignedReason,
};

const OWNER: i64 = 1;

fn entry(id: i64, content: &str) -> Entry {
    Entry {
        id,
        owner_id: OWNER,
        content: content.to_string(),
        topic_id: None,
        created_at: 1_700_000_000_000 + id,
    }
}

fn topic(id: i64, name: &str) -> Topic {
    Topic {
        id,
        owner_id: OWNER,
        name: name.to_string(),
        created_at: 0,
        entry_count: 0,
    }
}

fn snapshot(topics: Vec<Topic>) -> TaxonomySnapshot {
    TaxonomySnapshot {
        owner_id: OWNER,
        version: 4,
        topics,
        uncategorized_count: 0,
    }
}

fn raw(entry_id: i64, suggestions: Vec<TopicSuggestion>) -> EntrySuggestions {
    EntrySuggestions::new(entry_id, suggestions)
}

#[test]
fn same_new_topic_for_two_entries_becomes_one_proposal() {
    let entries = vec![entry(1, "Paris trip"), entry(2, "Flight to Paris")];
    let suggestions = vec![
        raw(1, vec![TopicSuggestion::propose_new("Travel", 0.9)]),
        raw(2, vec![TopicSuggestion::propose_new("Travel", 0.9)]),
    ];

    let set = reconcile(
        &entries,
        &snapshot(Vec::new()),
        &suggestions,
        &ReconcileOptions::default(),
    )
    .unwrap();

    assert_eq!(set.new_topic_proposals.len(), 1);
    let proposal = &set.new_topic_proposals[0];
    assert_eq!(proposal.suggested_name, "Travel");
    assert_eq!(proposal.confidence, 0.9);
    let ids: Vec<i64> = proposal.entries.iter().map(|e| e.entry_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(set.unassigned_entries.is_empty());
    assert!(set.existing_assignments.is_empty());
    assert_eq!(set.metadata.assigned_to_new, 2);
    assert_eq!(set.snapshot_version, 4);
}

#[test]
fn low_confidence_entry_is_unassigned_with_reason() {
    let entries = vec![entry(3, "asdkj")];
    let suggestions = vec![raw(
        3,
        vec![
            TopicSuggestion::propose_new("Misc", 0.1),
            TopicSuggestion::propose_new("Notes", 0.05),
        ],
    )];

    let set = reconcile(
        &entries,
        &snapshot(Vec::new()),
        &suggestions,
        &ReconcileOptions::with_floor(0.5),
    )
    .unwrap();

    assert!(set.new_topic_proposals.is_empty());
    assert_eq!(set.unassigned_entries.len(), 1);
    let unassigned = &set.unassigned_entries[0];
    assert_eq!(unassigned.entry_id, 3);
    assert_eq!(
        unassigned.reason,
        UnassignedReason::LowConfidence {
            best: 0.1,
            floor: 0.5
        }
    );
    assert!(unassigned.reason.to_string().contains("low confidence"));
    assert_eq!(unassigned.top_suggestions.len(), 2);
    assert_eq!(unassigned.top_suggestions[0].name, "Misc");
    assert!(matches!(
        set.outcome_for(3),
        Some(EntryOutcome::Unassigned(entry)) if entry.entry_id == 3
    ));
}

#[test]
fn near_duplicate_new_names_merge_into_one_proposal() {
    let entries = vec![entry(1, "Rome"), entry(2, "Lisbon"), entry(3, "Oslo")];
    let suggestions = vec![
        raw(1, vec![TopicSuggestion::propose_new("Travel Plans", 0.7)]),
        raw(2, vec![TopicSuggestion::propose_new("travel  plans", 0.95)]),
        raw(3, vec![TopicSuggestion::propose_new("Travel Plan", 0.8)]),
    ];

    let set = reconcile(
        &entries,
        &snapshot(Vec::new()),
        &suggestions,
        &ReconcileOptions::default(),
    )
    .unwrap();

    assert_eq!(set.new_topic_proposals.len(), 1);
    let proposal = &set.new_topic_proposals[0];
    assert_eq!(proposal.suggested_name, "travel plans");
    assert_eq!(proposal.confidence, 0.95);
    let ids: Vec<i64> = proposal.entries.iter().map(|e| e.entry_id).collect();
    assert_eq!(ids, vec![2, 3, 1]);
    assert!(proposal.rationale.contains("3 entries"));
    assert!(matches!(
        set.outcome_for(1),
        Some(EntryOutcome::NewTopic { suggested_name: "travel plans", .. })
    ));
}

#[test]
fn new_name_matching_existing_topic_routes_to_that_topic() {
    let entries = vec![entry(1, "standup notes"), entry(2, "quarterly review")];
    let suggestions = vec![
        raw(1, vec![TopicSuggestion::propose_new("work", 0.8)]),
        raw(2, vec![TopicSuggestion::existing(7, "Work", 0.6)]),
    ];

    let set = reconcile(
        &entries,
        &snapshot(vec![topic(7, "Work")]),
        &suggestions,
        &ReconcileOptions::default(),
    )
    .unwrap();

    assert!(set.new_topic_proposals.is_empty());
    assert_eq!(set.existing_assignments.len(), 1);
    let group = &set.existing_assignments[0];
    assert_eq!(group.topic_id, 7);
    assert_eq!(group.topic_name, "Work");
    let ids: Vec<i64> = group.entries.iter().map(|e| e.entry_id).collect();
    assert_eq!(ids, vec![1, 2]);
    match set.outcome_for(1) {
        Some(EntryOutcome::ExistingTopic {
            topic_id,
            assignment,
        }) => {
            assert_eq!(topic_id, 7);
            assert_eq!(assignment.confidence, 0.8);
        }
        other => panic!("entry 1 should join topic 7, got {other:?}"),
    }
    assert!(set.outcome_for(99).is_none());
}

#[test]
fn similar_existing_topics_are_listed_for_review() {
    let entries = vec![entry(1, "Kyoto itinerary")];
    let suggestions = vec![raw(
        1,
        vec![TopicSuggestion::propose_new("Travel Ideas", 0.9)],
    )];

    let set = reconcile(
        &entries,
        &snapshot(vec![topic(2, "Travel"), topic(3, "Cooking")]),
        &suggestions,
        &ReconcileOptions::default(),
    )
    .unwrap();

    let proposal = &set.new_topic_proposals[0];
    assert_eq!(proposal.suggested_name, "Travel Ideas");
    assert_eq!(proposal.similar_existing_topics.len(), 1);
    assert_eq!(
        proposal.similar_existing_topics[0].target,
        TopicRef::Existing(2)
    );
}

#[test]
fn topics_to_keep_attract_resembling_new_names() {
    let entries = vec![entry(1, "Kyoto itinerary")];
    let suggestions = vec![raw(
        1,
        vec![TopicSuggestion::propose_new("Travel Ideas", 0.9)],
    )];
    let mut options = ReconcileOptions::default();
    options.topics_to_keep = BTreeSet::from([2]);

    let set = reconcile(
        &entries,
        &snapshot(vec![topic(2, "Travel")]),
        &suggestions,
        &options,
    )
    .unwrap();

    assert!(set.new_topic_proposals.is_empty());
    assert_eq!(set.existing_assignments[0].topic_id, 2);
}

#[test]
fn every_entry_lands_in_exactly_one_bucket_and_respects_floor() {
    let entries: Vec<Entry> = (1..=12).map(|id| entry(id, "text")).collect();
    let suggestions: Vec<EntrySuggestions> = (1..=12)
        .map(|id| {
            let confidence = id as f64 / 12.0;
            let suggestion = match id % 3 {
                0 => TopicSuggestion::existing(7, "Work", confidence),
                1 => TopicSuggestion::propose_new(format!("Topic {}", id % 2), confidence),
                _ => TopicSuggestion::propose_new("Garden", confidence),
            };
            raw(id, vec![suggestion])
        })
        .collect();
    let floor = 0.4;

    let set = reconcile(
        &entries,
        &snapshot(vec![topic(7, "Work")]),
        &suggestions,
        &ReconcileOptions::with_floor(floor),
    )
    .unwrap();

    let mut ids = set.entry_ids();
    ids.sort_unstable();
    assert_eq!(ids, (1..=12).collect::<Vec<i64>>());

    for group in &set.existing_assignments {
        assert!(group.entries.iter().all(|e| e.confidence >= floor));
    }
    for proposal in &set.new_topic_proposals {
        assert!(proposal.entries.iter().all(|e| e.confidence >= floor));
    }
    for unassigned in &set.unassigned_entries {
        assert!(unassigned.top_suggestions[0].confidence < floor);
    }
    assert_eq!(
        set.metadata.assigned_to_existing + set.metadata.assigned_to_new + set.metadata.unassigned,
        12
    );
}

#[test]
fn output_is_deterministic_regardless_of_input_order() {
    let entries = vec![entry(1, "a"), entry(2, "b"), entry(3, "c")];
    let suggestions = vec![
        raw(1, vec![TopicSuggestion::propose_new("Alpha", 0.8)]),
        raw(2, vec![TopicSuggestion::propose_new("Beta", 0.8)]),
        raw(3, vec![TopicSuggestion::existing(7, "Work", 0.8)]),
    ];
    let reversed_entries: Vec<Entry> = entries.iter().rev().cloned().collect();
    let reversed_suggestions: Vec<EntrySuggestions> = suggestions.iter().rev().cloned().collect();
    let snap = snapshot(vec![topic(7, "Work")]);

    let mut first = reconcile(&entries, &snap, &suggestions, &ReconcileOptions::default()).unwrap();
    let mut second = reconcile(
        &reversed_entries,
        &snap,
        &reversed_suggestions,
        &ReconcileOptions::default(),
    )
    .unwrap();
    first.metadata.processing_time_ms = 0;
    second.metadata.processing_time_ms = 0;

    assert_eq!(first, second);
    let names: Vec<&str> = first
        .new_topic_proposals
        .iter()
        .map(|p| p.suggested_name.as_str())
        .collect();
    assert_eq!(names, vec!["Alpha", "Beta"]);
}

#[test]
fn pseudo_and_unknown_topic_suggestions_are_ignored() {
    let entries = vec![entry(1, "a")];
    let suggestions = vec![raw(
        1,
        vec![
            TopicSuggestion::existing(0, "Uncategorized", 0.99),
            TopicSuggestion::existing(-1, "All Topics", 0.99),
            TopicSuggestion::existing(42, "Gone", 0.95),
            TopicSuggestion::propose_new("All Topics", 0.9),
        ],
    )];

    let set = reconcile(
        &entries,
        &snapshot(Vec::new()),
        &suggestions,
        &ReconcileOptions::default(),
    )
    .unwrap();

    assert_eq!(
        set.unassigned_entries[0].reason,
        UnassignedReason::NoSuggestions
    );
}

#[test]
fn input_errors_are_reported_without_partial_output() {
    let snap = snapshot(Vec::new());
    let options = ReconcileOptions::default();

    assert_eq!(
        reconcile(&[], &snap, &[], &options).unwrap_err(),
        ReconcileError::EmptyInput
    );

    let entries = vec![entry(1, "a"), entry(2, "b")];
    let partial = vec![raw(1, vec![TopicSuggestion::propose_new("A", 0.9)])];
    assert_eq!(
        reconcile(&entries, &snap, &partial, &options).unwrap_err(),
        ReconcileError::IncompleteOracleOutput { missing: vec![2] }
    );

    let bad_floor = ReconcileOptions::with_floor(1.5);
    let err = reconcile(&entries, &snap, &partial, &bad_floor).unwrap_err();
    assert_eq!(err.error_code(), "invalid_threshold");

    let duplicated = vec![entry(1, "a"), entry(1, "a")];
    assert_eq!(
        reconcile(&duplicated, &snap, &partial, &options).unwrap_err(),
        ReconcileError::DuplicateEntry(1)
    );
}
