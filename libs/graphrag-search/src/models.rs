use serde::{Deserialize, Serialize};

/// Precomputed summary of one detected community.
///
/// `rank` is the hierarchy level (higher is more abstract) and `weight` the
/// occurrence-derived importance, both supplied by community detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityReport {
    pub id: String,
    pub title: String,
    pub summary_text: String,
    pub rank: u32,
    pub weight: Option<f64>,
    pub community_id: String,
    #[serde(default)]
    pub source_entity_ids: Vec<String>,
    #[serde(default)]
    pub source_document_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub text_unit_ids: Vec<String>,
    #[serde(default)]
    pub community_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub text_unit_ids: Vec<String>,
}

impl Relationship {
    /// The endpoint opposite to `entity_id`, if the relationship touches it.
    pub fn other_end(&self, entity_id: &str) -> Option<&str> {
        if self.source_id == entity_id {
            Some(&self.target_id)
        } else if self.target_id == entity_id {
            Some(&self.source_id)
        } else {
            None
        }
    }
}

/// A chunk of source text. Its id doubles as the chunk id in traceability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub document_id: Option<String>,
}
