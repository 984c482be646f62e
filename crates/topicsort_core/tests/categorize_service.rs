use std::sync::Arc;
use topicsort_core::db::open_db_in_memory;
use topicsort_core::{
    AnalyzeRequest, CategorizeError, CategorizeService, EngineConfig, EntryFilter, KeywordOracle,
    MissingRecord, SqliteTaxonomyStore, StaticOracle, TaxonomyStore, TopicRef, TopicSuggestion,
    TopicView, UnassignedReason,
};

const OWNER: i64 = 1;

#[test]
fn quick_categorize_ranks_existing_before_weaker_new_topic() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteTaxonomyStore::try_new(&mut conn).unwrap();
    let work = store.create_topic(OWNER, "Work").unwrap();
    let entry = store.create_entry(OWNER, "pottery class", None).unwrap();
    let oracle = StaticOracle::new().with(
        entry.id,
        vec![
            TopicSuggestion::propose_new("New Hobby", 0.3),
            TopicSuggestion::existing(work.id, "Work", 0.8),
        ],
    );
    let service = CategorizeService::new(store, Arc::new(oracle), EngineConfig::default());

    let proposals = service.quick_categorize(OWNER, &[entry.id, entry.id]).unwrap();

    assert_eq!(proposals.len(), 1);
    let suggestions = &proposals[0].suggestions;
    assert_eq!(suggestions[0].name, "Work");
    assert_eq!(suggestions[0].target, TopicRef::Existing(work.id));
    assert!(!suggestions[0].target.is_new());
    assert_eq!(suggestions[1].name, "New Hobby");
    assert!(suggestions[1].target.is_new());
    assert_eq!(service.store().taxonomy_version(OWNER).unwrap(), 1);
}

#[test]
fn quick_categorize_preserves_request_order_and_rejects_unknown_ids() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteTaxonomyStore::try_new(&mut conn).unwrap();
    let first = store.create_entry(OWNER, "a", None).unwrap();
    let second = store.create_entry(OWNER, "b", None).unwrap();
    let oracle = StaticOracle::new()
        .with(first.id, Vec::new())
        .with(second.id, Vec::new());
    let service = CategorizeService::new(store, Arc::new(oracle), EngineConfig::default());

    let proposals = service.quick_categorize(OWNER, &[second.id, first.id]).unwrap();
    let ids: Vec<i64> = proposals.iter().map(|p| p.entry_id).collect();
    assert_eq!(ids, vec![second.id, first.id]);

    assert!(matches!(
        service.quick_categorize(OWNER, &[first.id, 404]),
        Err(CategorizeError::NotFound(MissingRecord::Entry(404)))
    ));
    assert!(matches!(
        service.quick_categorize(OWNER, &[]),
        Err(CategorizeError::EmptyInput)
    ));
}

#[test]
fn quick_categorize_uncategorized_reconciles_all_uncategorized_entries() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteTaxonomyStore::try_new(&mut conn).unwrap();
    let work = store.create_topic(OWNER, "Work").unwrap();
    let paris = store.create_entry(OWNER, "Paris trip", None).unwrap();
    let noise = store.create_entry(OWNER, "asdkj", None).unwrap();
    store.create_entry(OWNER, "already filed", Some(work.id)).unwrap();
    let oracle = StaticOracle::new()
        .with(paris.id, vec![TopicSuggestion::propose_new("Travel", 0.9)])
        .with(noise.id, vec![TopicSuggestion::propose_new("Misc", 0.1)]);
    let service = CategorizeService::new(store, Arc::new(oracle), EngineConfig::default());

    let set = service.quick_categorize_uncategorized(OWNER, None).unwrap();

    assert_eq!(set.metadata.total_entries_analyzed, 2);
    assert_eq!(set.new_topic_proposals.len(), 1);
    assert_eq!(set.unassigned_entries[0].entry_id, noise.id);

    let subset = service
        .quick_categorize_uncategorized(OWNER, Some(&[paris.id]))
        .unwrap();
    assert_eq!(subset.metadata.total_entries_analyzed, 1);
    assert!(subset.unassigned_entries.is_empty());

    let none = service
        .quick_categorize_uncategorized(OWNER, Some(&[]))
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn analyze_then_apply_round_trip() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteTaxonomyStore::try_new(&mut conn).unwrap();
    let work = store.create_topic(OWNER, "Work Projects").unwrap();
    store.create_entry(OWNER, "finish the work report", None).unwrap();
    store.create_entry(OWNER, "garden: plant garden tulips", None).unwrap();
    let mut service =
        CategorizeService::new(store, Arc::new(KeywordOracle::new()), EngineConfig::default());

    let set = service
        .analyze(
            OWNER,
            &AnalyzeRequest {
                instructions: Some("keep it short".to_string()),
                topics_to_keep: vec![work.id],
            },
        )
        .unwrap();

    assert_eq!(set.existing_assignments.len(), 1);
    assert_eq!(set.existing_assignments[0].topic_id, work.id);
    // New-topic options from the lexical oracle sit below the default floor.
    assert_eq!(set.unassigned_entries.len(), 1);
    assert!(matches!(
        set.unassigned_entries[0].reason,
        UnassignedReason::LowConfidence { .. }
    ));

    let result = service.apply(OWNER, &set, Some(set.snapshot_version)).unwrap();
    assert_eq!(result.entries_reassigned, 1);
    let remaining = service
        .list_entries(OWNER, &EntryFilter::uncategorized())
        .unwrap();
    assert_eq!(remaining.len(), 1);
}

#[test]
fn analyze_validates_topics_to_keep_before_calling_the_oracle() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteTaxonomyStore::try_new(&mut conn).unwrap();
    store.create_entry(OWNER, "a", None).unwrap();
    let service = CategorizeService::new(store, Arc::new(StaticOracle::new()), EngineConfig::default());

    let pseudo = AnalyzeRequest {
        topics_to_keep: vec![0],
        ..AnalyzeRequest::default()
    };
    assert!(matches!(
        service.analyze(OWNER, &pseudo),
        Err(CategorizeError::Validation(_))
    ));

    let unknown = AnalyzeRequest {
        topics_to_keep: vec![77],
        ..AnalyzeRequest::default()
    };
    assert!(matches!(
        service.analyze(OWNER, &unknown),
        Err(CategorizeError::NotFound(MissingRecord::Topic(77)))
    ));

    assert!(matches!(
        service.analyze(OWNER, &AnalyzeRequest::default()),
        Err(CategorizeError::IncompleteOracleOutput { .. })
    ));
}

#[test]
fn pseudo_topics_are_read_only_views() {
    let mut conn = open_db_in_memory().unwrap();
    let store = SqliteTaxonomyStore::try_new(&mut conn).unwrap();
    let mut service =
        CategorizeService::new(store, Arc::new(KeywordOracle::new()), EngineConfig::default());
    service.create_entry(OWNER, "loose note", Some(0)).unwrap();

    let uncategorized = service.get_topic_view(OWNER, 0).unwrap();
    assert!(matches!(uncategorized, TopicView::Uncategorized { entry_count: 1, .. }));
    assert!(matches!(
        service.get_topic_view(OWNER, -1).unwrap(),
        TopicView::AllTopics { entry_count: 1, .. }
    ));

    assert!(matches!(
        service.delete_topic(OWNER, 0),
        Err(CategorizeError::Validation(_))
    ));
    assert!(matches!(
        service.rename_topic(OWNER, -1, "Everything"),
        Err(CategorizeError::Validation(_))
    ));
    assert!(matches!(
        service.create_topic(OWNER, "Uncategorized"),
        Err(CategorizeError::Validation(_))
    ));
    assert!(matches!(
        service.create_entry(OWNER, "x", Some(-1)),
        Err(CategorizeError::Validation(_))
    ));

    let counts = service.topic_entry_counts(OWNER).unwrap();
    assert_eq!(counts.get(&0), Some(&1));
    assert_eq!(counts.get(&-1), Some(&1));
}

#[test]
fn suggestions_for_free_text_are_ranked_and_capped() {
    let mut conn = open_db_in_memory().unwrap();
    let mut store = SqliteTaxonomyStore::try_new(&mut conn).unwrap();
    let work = store.create_topic(OWNER, "Work").unwrap();
    let mut config = EngineConfig::default();
    config.max_quick_suggestions = 1;
    let service = CategorizeService::new(store, Arc::new(KeywordOracle::new()), config);

    let suggestions = service
        .suggest_for_text(OWNER, "prepare work slides")
        .unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].target, TopicRef::Existing(work.id));

    assert!(matches!(
        service.suggest_for_text(OWNER, "   "),
        Err(CategorizeError::Validation(_))
    ));
}
