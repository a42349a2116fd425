#![allow(dead_code)]

pub mod fakes;
pub mod ollama;

use graphrag_search::models::{CommunityReport, Entity, Relationship, TextUnit};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Whitespace word count, so budgets in tests are easy to reason about.
pub fn words(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn report(id: &str, rank: u32, weight: Option<f64>, summary: &str) -> CommunityReport {
    CommunityReport {
        id: id.to_string(),
        title: format!("Report {}", id),
        summary_text: summary.to_string(),
        rank,
        weight,
        community_id: format!("c-{}", id),
        source_entity_ids: vec![format!("e-{}", id)],
        source_document_ids: vec![format!("doc-{}", id)],
    }
}

pub fn entity(id: &str, title: &str, rank: u32) -> Entity {
    Entity {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("{} description", title),
        rank,
        text_unit_ids: vec![format!("t-{}", id)],
        community_ids: vec![],
    }
}

pub fn relationship(id: &str, source: &str, target: &str) -> Relationship {
    Relationship {
        id: id.to_string(),
        source_id: source.to_string(),
        target_id: target.to_string(),
        weight: 1.0,
        description: format!("{} relates to {}", source, target),
        text_unit_ids: vec![],
    }
}

pub fn text_unit(entity_id: &str) -> TextUnit {
    TextUnit {
        id: format!("t-{}", entity_id),
        text: format!("Source text about {}", entity_id),
        entity_ids: vec![entity_id.to_string()],
        document_id: Some(format!("doc-{}", entity_id)),
    }
}
