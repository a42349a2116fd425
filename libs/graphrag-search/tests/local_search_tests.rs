use std::collections::HashSet;
use std::sync::Arc;

use graphrag_search::{
    config::SearchOptions,
    error::SearchError,
    llm::base::SearchPhase,
    models::CommunityReport,
    retrieval::graph::{InMemoryGraph, RelationshipGraph},
    search::{
        base::NO_DATA_ANSWER,
        local_search::expander::LocalExpander,
        router::{SearchMode, SearchModeRouter},
    },
};
use utils::{
    entity,
    fakes::{FixedVectorIndex, ScriptedCompleter},
    init_tracing, relationship, report, text_unit, words,
};

mod utils;

/// Triangle a-b-c with a tail c-d.
fn cyclic_graph() -> InMemoryGraph {
    InMemoryGraph::new(
        vec![
            entity("a", "ALICE", 5),
            entity("b", "BOB", 3),
            entity("c", "CAROL", 2),
            entity("d", "DAVE", 1),
        ],
        vec![
            relationship("ab", "a", "b"),
            relationship("bc", "b", "c"),
            relationship("ca", "c", "a"),
            relationship("cd", "c", "d"),
        ],
        vec![text_unit("a"), text_unit("b"), text_unit("c"), text_unit("d")],
    )
}

fn linked_report() -> CommunityReport {
    CommunityReport {
        source_entity_ids: vec!["a".to_string(), "b".to_string()],
        ..report("r-team", 2, Some(1.0), "Alice and Bob work together")
    }
}

#[test]
fn expansion_visits_each_entity_once_in_cycles() {
    let graph: Arc<dyn RelationshipGraph> = Arc::new(cyclic_graph());
    let expander = LocalExpander::new(graph.clone(), None);
    let seed = graph.entity("a").unwrap();

    let context = expander.expand(&[seed], 5);

    let entity_ids: Vec<&str> = context.entities.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(entity_ids, vec!["a", "b", "c", "d"]);
    let relationship_ids: HashSet<&str> = context.relationships.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(relationship_ids.len(), 4);
    assert_eq!(context.relationships.len(), 4);
    assert_eq!(context.text_units.len(), 4);
}

#[test]
fn zero_hops_keeps_only_seeds() {
    let graph: Arc<dyn RelationshipGraph> = Arc::new(cyclic_graph());
    let expander = LocalExpander::new(graph.clone(), None);
    let seed = graph.entity("b").unwrap();

    let context = expander.expand(&[seed], 0);

    assert_eq!(context.entities.len(), 1);
    assert!(context.relationships.is_empty());
}

#[tokio::test]
async fn vector_hits_are_resolved_by_similarity() {
    let index = Arc::new(FixedVectorIndex::new(&[("c", 0.5), ("a", 0.9), ("missing", 0.95), ("DAVE", 0.7)]));
    let expander = LocalExpander::new(Arc::new(cyclic_graph()), Some(index.clone()));

    let entities = expander.map_query_to_entities("team members", 3).await.unwrap();

    let ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "d", "c"]);
    assert_eq!(index.calls(), 1);
}

#[tokio::test]
async fn local_search_answers_with_traced_context() {
    init_tracing();
    let llm = Arc::new(ScriptedCompleter::new(|phase, system, _| {
        assert_eq!(phase, SearchPhase::Local);
        assert!(system.contains("-----Entities-----"));
        Ok("Alice works with Bob.".to_string())
    }));
    let index = Arc::new(FixedVectorIndex::new(&[("a", 0.92)]));
    let router = SearchModeRouter::new(llm.clone(), Arc::new(cyclic_graph()), vec![linked_report()])
        .with_entity_index(index)
        .with_num_tokens_fn(words);
    let options = SearchOptions {
        max_hops: 1,
        ..SearchOptions::default()
    };

    let result = router.route("Who does Alice work with?", "local", &options).await.unwrap();

    assert_eq!(result.mode, SearchMode::Local);
    assert_eq!(result.response_text, "Alice works with Bob.");
    assert_eq!(llm.calls(SearchPhase::Local), 1);
    assert_eq!(result.llm_calls, 1);
    assert!(result.traceability.entity_ids.contains("a"));
    assert!(result.traceability.entity_ids.contains("b"));
    assert!(!result.traceability.entity_ids.contains("d"));
    assert!(result.traceability.chunk_ids.contains("t-a"));
    assert!(result.traceability.document_ids.contains("doc-a"));
    assert!(result.traceability.report_ids.contains("r-team"));
}

#[tokio::test]
async fn no_matching_entity_returns_no_data() {
    let llm = Arc::new(ScriptedCompleter::answering());
    let router = SearchModeRouter::new(llm.clone(), Arc::new(cyclic_graph()), vec![linked_report()]);

    let result = router
        .route("What is the weather like?", "local", &SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.response_text, NO_DATA_ANSWER);
    assert!(result.traceability.is_empty());
    assert_eq!(llm.total_calls(), 0);
}

#[tokio::test]
async fn entity_index_failure_is_fatal_in_local_mode() {
    let llm = Arc::new(ScriptedCompleter::answering());
    let router = SearchModeRouter::new(llm.clone(), Arc::new(cyclic_graph()), vec![])
        .with_entity_index(Arc::new(FixedVectorIndex::failing()));

    let error = router
        .route("Who is Alice?", "local", &SearchOptions::default())
        .await
        .unwrap_err();

    match error {
        SearchError::Strategy { mode, source } => {
            assert_eq!(mode, SearchMode::Local);
            assert!(matches!(*source, SearchError::VectorIndex(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(llm.total_calls(), 0);
}
