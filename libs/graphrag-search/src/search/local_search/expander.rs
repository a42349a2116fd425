use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::error::SearchError;
use crate::models::{Entity, Relationship, TextUnit};
use crate::retrieval::entities::{find_mentioned_entities, get_entity_by_name};
use crate::retrieval::graph::RelationshipGraph;
use crate::vector_stores::vector_store::VectorIndex;

const OVERSAMPLE_SCALER: usize = 2;

/// Entities, relationships and text units gathered around a set of seeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalContext {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub text_units: Vec<TextUnit>,
}

impl LocalContext {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[derive(Clone)]
pub struct LocalExpander {
    graph: Arc<dyn RelationshipGraph>,
    entity_index: Option<Arc<dyn VectorIndex>>,
}

impl LocalExpander {
    pub fn new(graph: Arc<dyn RelationshipGraph>, entity_index: Option<Arc<dyn VectorIndex>>) -> Self {
        LocalExpander { graph, entity_index }
    }

    pub fn graph(&self) -> &Arc<dyn RelationshipGraph> {
        &self.graph
    }

    /// Seed entities for a query, most similar first.
    ///
    /// With an entity index the lookup is oversampled and resolved through the
    /// graph; without one, entities whose title appears in the query are used.
    pub async fn map_query_to_entities(&self, query: &str, top_k: usize) -> Result<Vec<Entity>, SearchError> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let Some(entity_index) = &self.entity_index else {
            let mut mentioned = find_mentioned_entities(query, &self.graph.entities());
            mentioned.truncate(top_k);
            return Ok(mentioned);
        };

        let mut search_results = entity_index
            .similarity_search_by_text(query, top_k.saturating_mul(OVERSAMPLE_SCALER))
            .await
            .map_err(|e| SearchError::VectorIndex(e.to_string()))?;
        search_results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let mut seen = HashSet::new();
        let mut all_entities: Option<Vec<Entity>> = None;
        let mut matched_entities = Vec::new();

        for result in search_results {
            let matched = match self.graph.entity(&result.id) {
                Some(entity) => Some(entity),
                None => {
                    let all_entities = all_entities.get_or_insert_with(|| self.graph.entities());
                    get_entity_by_name(all_entities, &result.id).into_iter().next()
                }
            };

            if let Some(entity) = matched {
                if seen.insert(entity.id.clone()) {
                    matched_entities.push(entity);
                }
            }
            if matched_entities.len() >= top_k {
                break;
            }
        }

        tracing::debug!(query, matched = matched_entities.len(), "Mapped query to entities");
        Ok(matched_entities)
    }

    pub fn expand(&self, entities: &[Entity], max_hops: usize) -> LocalContext {
        let mut visited = HashSet::new();
        self.expand_from(entities, max_hops, &mut visited)
    }

    /// Breadth-first expansion up to `max_hops`, skipping and recording
    /// entities in `visited`.
    pub fn expand_from(&self, seeds: &[Entity], max_hops: usize, visited: &mut HashSet<String>) -> LocalContext {
        let mut context = LocalContext::default();
        let mut seen_relationships = HashSet::new();
        let mut queue = VecDeque::new();

        for seed in seeds {
            if visited.insert(seed.id.clone()) {
                context.entities.push(seed.clone());
                queue.push_back((seed.id.clone(), 0));
            }
        }

        while let Some((entity_id, hops)) = queue.pop_front() {
            if hops >= max_hops {
                continue;
            }

            for relationship in self.graph.neighbors(&entity_id) {
                let neighbor = relationship.other_end(&entity_id).map(|id| id.to_string());
                if seen_relationships.insert(relationship.id.clone()) {
                    context.relationships.push(relationship);
                }

                let Some(neighbor) = neighbor else { continue };
                if visited.contains(&neighbor) {
                    continue;
                }
                if let Some(entity) = self.graph.entity(&neighbor) {
                    visited.insert(neighbor.clone());
                    context.entities.push(entity);
                    queue.push_back((neighbor, hops + 1));
                }
            }
        }

        let mut seen_units = HashSet::new();
        let unit_ids = context
            .entities
            .iter()
            .flat_map(|entity| entity.text_unit_ids.iter())
            .chain(context.relationships.iter().flat_map(|rel| rel.text_unit_ids.iter()));
        for unit_id in unit_ids {
            if !seen_units.insert(unit_id.clone()) {
                continue;
            }
            if let Some(unit) = self.graph.text_unit(unit_id) {
                context.text_units.push(unit);
            }
        }

        tracing::debug!(
            seeds = seeds.len(),
            entities = context.entities.len(),
            relationships = context.relationships.len(),
            text_units = context.text_units.len(),
            max_hops,
            "Expanded local context"
        );
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::graph::InMemoryGraph;

    fn entity(id: &str, title: &str) -> Entity {
        Entity {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            rank: 1,
            text_unit_ids: vec![format!("t-{}", id)],
            community_ids: vec![],
        }
    }

    fn relationship(id: &str, source: &str, target: &str) -> Relationship {
        Relationship {
            id: id.to_string(),
            source_id: source.to_string(),
            target_id: target.to_string(),
            weight: 1.0,
            description: String::new(),
            text_unit_ids: vec![],
        }
    }

    fn chain() -> LocalExpander {
        // a - b - c - d
        let graph = InMemoryGraph::new(
            vec![entity("a", "ALPHA"), entity("b", "BETA"), entity("c", "GAMMA"), entity("d", "DELTA")],
            vec![relationship("ab", "a", "b"), relationship("bc", "b", "c"), relationship("cd", "c", "d")],
            vec![TextUnit {
                id: "t-a".to_string(),
                text: "alpha text".to_string(),
                entity_ids: vec!["a".to_string()],
                document_id: None,
            }],
        );
        LocalExpander::new(Arc::new(graph), None)
    }

    #[test]
    fn hop_limit_bounds_expansion() {
        let expander = chain();
        let seed = expander.graph().entity("a").unwrap();

        let context = expander.expand(&[seed], 1);

        let ids: Vec<&str> = context.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(context.relationships.len(), 1);
        assert_eq!(context.text_units.len(), 1);
    }

    #[test]
    fn shared_visited_set_skips_known_entities() {
        let expander = chain();
        let a = expander.graph().entity("a").unwrap();
        let mut visited = HashSet::new();

        let first = expander.expand_from(&[a.clone()], 1, &mut visited);
        let second = expander.expand_from(&[a], 1, &mut visited);

        assert_eq!(first.entities.len(), 2);
        assert!(second.is_empty());
        assert!(visited.contains("b"));
    }

    struct RecordingIndex {
        requested_k: std::sync::Mutex<Option<usize>>,
    }

    #[async_trait::async_trait]
    impl VectorIndex for RecordingIndex {
        async fn similarity_search_by_text(
            &self,
            _text: &str,
            k: usize,
        ) -> anyhow::Result<Vec<crate::vector_stores::vector_store::VectorStoreSearchResult>> {
            *self.requested_k.lock().unwrap() = Some(k);
            Ok(vec![crate::vector_stores::vector_store::VectorStoreSearchResult {
                id: "b".to_string(),
                score: 0.9,
            }])
        }
    }

    #[tokio::test]
    async fn oversampling_saturates_for_huge_top_k() {
        let index = Arc::new(RecordingIndex {
            requested_k: std::sync::Mutex::new(None),
        });
        let expander = LocalExpander::new(chain().graph().clone(), Some(index.clone() as Arc<dyn VectorIndex>));

        let small = expander.map_query_to_entities("anything", 3).await.unwrap();
        assert_eq!(*index.requested_k.lock().unwrap(), Some(6));
        assert_eq!(small[0].id, "b");

        let huge = expander.map_query_to_entities("anything", usize::MAX).await.unwrap();
        assert_eq!(*index.requested_k.lock().unwrap(), Some(usize::MAX));
        assert_eq!(huge.len(), 1);
    }

    #[tokio::test]
    async fn title_fallback_without_index() {
        let expander = chain();

        let entities = expander.map_query_to_entities("What does gamma do?", 5).await.unwrap();

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "c");
    }
}
