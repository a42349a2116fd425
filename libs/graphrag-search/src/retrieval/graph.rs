use std::collections::HashMap;

use crate::models::{Entity, Relationship, TextUnit};

/// Read access to the knowledge graph built at indexing time.
pub trait RelationshipGraph: Send + Sync {
    fn neighbors(&self, entity_id: &str) -> Vec<Relationship>;

    fn entity(&self, entity_id: &str) -> Option<Entity>;

    fn text_unit(&self, text_unit_id: &str) -> Option<TextUnit>;

    fn entities(&self) -> Vec<Entity>;
}

/// Graph held entirely in memory, indexed by id and by endpoint.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraph {
    entities: HashMap<String, Entity>,
    relationships: HashMap<String, Relationship>,
    adjacency: HashMap<String, Vec<String>>,
    text_units: HashMap<String, TextUnit>,
}

impl InMemoryGraph {
    pub fn new(entities: Vec<Entity>, relationships: Vec<Relationship>, text_units: Vec<TextUnit>) -> Self {
        let mut graph = InMemoryGraph::default();

        for entity in entities {
            graph.entities.insert(entity.id.clone(), entity);
        }

        for relationship in relationships {
            graph
                .adjacency
                .entry(relationship.source_id.clone())
                .or_default()
                .push(relationship.id.clone());
            if relationship.target_id != relationship.source_id {
                graph
                    .adjacency
                    .entry(relationship.target_id.clone())
                    .or_default()
                    .push(relationship.id.clone());
            }
            graph.relationships.insert(relationship.id.clone(), relationship);
        }

        for unit in text_units {
            graph.text_units.insert(unit.id.clone(), unit);
        }

        graph
    }
}

impl RelationshipGraph for InMemoryGraph {
    fn neighbors(&self, entity_id: &str) -> Vec<Relationship> {
        self.adjacency
            .get(entity_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.relationships.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn entity(&self, entity_id: &str) -> Option<Entity> {
        self.entities.get(entity_id).cloned()
    }

    fn text_unit(&self, text_unit_id: &str) -> Option<TextUnit> {
        self.text_units.get(text_unit_id).cloned()
    }

    fn entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.entities.values().cloned().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        entities
    }
}
