use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ResponseFormat, ResponseType};
use crate::models::{CommunityReport, TextUnit};

use super::router::SearchMode;

pub const NO_DATA_ANSWER: &str = "No relevant information found.";

/// A scored statement extracted from one batch of community reports.
///
/// `source_rank` and `sources` carry provenance for ordering and traceability
/// and are not part of the serialized key point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub description: String,
    pub score: u32,
    pub report_ids: Vec<String>,
    #[serde(skip)]
    pub source_rank: u32,
    #[serde(skip)]
    pub sources: TraceabilityInfo,
}

impl KeyPoint {
    pub fn new(description: impl Into<String>, score: u32, report_ids: Vec<String>) -> Self {
        KeyPoint {
            description: description.into(),
            score: score.min(100),
            report_ids,
            source_rank: 0,
            sources: TraceabilityInfo::default(),
        }
    }

    /// Trimmed, lower-cased description with whitespace runs collapsed.
    pub fn normalized_description(&self) -> String {
        self.description
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapStatus {
    Success,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapResult {
    pub batch_id: usize,
    pub key_points: Vec<KeyPoint>,
    pub status: MapStatus,
    pub latency: Duration,
    pub context_tokens: usize,
    pub tokens: usize,
}

impl MapResult {
    pub fn failed(batch_id: usize, reason: impl Into<String>, latency: Duration, context_tokens: usize) -> Self {
        MapResult {
            batch_id,
            key_points: Vec::new(),
            status: MapStatus::Failed(reason.into()),
            latency,
            context_tokens,
            tokens: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == MapStatus::Success
    }
}

/// Ids of everything that contributed to an answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceabilityInfo {
    pub report_ids: BTreeSet<String>,
    pub document_ids: BTreeSet<String>,
    pub chunk_ids: BTreeSet<String>,
    pub entity_ids: BTreeSet<String>,
}

impl TraceabilityInfo {
    pub fn merge(&mut self, other: &TraceabilityInfo) {
        self.report_ids.extend(other.report_ids.iter().cloned());
        self.document_ids.extend(other.document_ids.iter().cloned());
        self.chunk_ids.extend(other.chunk_ids.iter().cloned());
        self.entity_ids.extend(other.entity_ids.iter().cloned());
    }

    pub fn add_report(&mut self, report: &CommunityReport) {
        self.report_ids.insert(report.id.clone());
        self.document_ids.extend(report.source_document_ids.iter().cloned());
        self.entity_ids.extend(report.source_entity_ids.iter().cloned());
    }

    pub fn add_text_unit(&mut self, text_unit: &TextUnit) {
        self.chunk_ids.insert(text_unit.id.clone());
        if let Some(document_id) = &text_unit.document_id {
            self.document_ids.insert(document_id.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.report_ids.is_empty()
            && self.document_ids.is_empty()
            && self.chunk_ids.is_empty()
            && self.entity_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub mode: SearchMode,
    pub response_text: String,
    pub response_format: ResponseFormat,
    pub response_type: ResponseType,
    pub key_points: Vec<KeyPoint>,
    pub traceability: TraceabilityInfo,
    pub total_tokens: usize,
    pub llm_calls: usize,
    pub elapsed_time: Duration,
    pub warnings: Vec<String>,
}

impl SearchResult {
    /// The fixed answer for queries with nothing to retrieve. No LLM call is
    /// made to produce it.
    pub fn no_data(mode: SearchMode, response_format: ResponseFormat, response_type: ResponseType) -> Self {
        SearchResult {
            mode,
            response_text: NO_DATA_ANSWER.to_string(),
            response_format,
            response_type,
            key_points: Vec::new(),
            traceability: TraceabilityInfo::default(),
            total_tokens: 0,
            llm_calls: 0,
            elapsed_time: Duration::ZERO,
            warnings: Vec::new(),
        }
    }

    /// Mean score of the retained key points, scaled to 0.0..=1.0.
    pub fn confidence(&self) -> f64 {
        if self.key_points.is_empty() {
            return 0.0;
        }
        let total: u32 = self.key_points.iter().map(|kp| kp.score).sum();
        total as f64 / self.key_points.len() as f64 / 100.0
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "mode": self.mode,
            "response": self.response_text,
            "response_type": self.response_type,
            "key_points": self.key_points,
            "confidence": self.confidence(),
            "traceability": self.traceability,
            "total_tokens": self.total_tokens,
            "llm_calls": self.llm_calls,
            "elapsed_time": self.elapsed_time.as_secs_f64(),
            "warnings": self.warnings,
        })
    }

    pub fn to_markdown(&self) -> String {
        let mut output = format!("# {} Search Result\n\n", self.mode.to_string().to_uppercase());
        output += &format!("## Response\n\n{}\n\n", self.response_text);
        output += "## Metadata\n\n";
        output += &format!("- Response Type: {}\n", self.response_type);
        output += &format!("- Total Tokens: {}\n", self.total_tokens);
        output += &format!("- LLM Calls: {}\n", self.llm_calls);
        output += &format!("- Processing Time: {:.2}s\n", self.elapsed_time.as_secs_f64());
        output += &format!("- Total Key Points: {}\n", self.key_points.len());
        output += &format!("- Confidence: {:.2}\n", self.confidence());
        output += "\n## Traceability\n\n";
        output += &format!("- Report IDs: {}\n", self.traceability.report_ids.len());
        output += &format!("- Document IDs: {}\n", self.traceability.document_ids.len());
        output += &format!("- Chunk IDs: {}\n", self.traceability.chunk_ids.len());
        output += &format!("- Entity IDs: {}\n", self.traceability.entity_ids.len());

        if !self.warnings.is_empty() {
            output += "\n## Warnings\n\n";
            for warning in &self.warnings {
                output += &format!("- {}\n", warning);
            }
        }

        output
    }

    /// Renders in the result's own `response_format`.
    pub fn render(&self) -> String {
        match self.response_format {
            ResponseFormat::Markdown => self.to_markdown(),
            ResponseFormat::Json => {
                serde_json::to_string_pretty(&self.to_json()).unwrap_or_else(|_| self.to_json().to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_scores(scores: &[u32]) -> SearchResult {
        let mut result = SearchResult::no_data(SearchMode::Global, ResponseFormat::Markdown, ResponseType::MultipleParagraphs);
        result.response_text = "answer".to_string();
        result.key_points = scores
            .iter()
            .map(|score| KeyPoint::new(format!("point {}", score), *score, vec![]))
            .collect();
        result
    }

    #[test]
    fn confidence_is_mean_score() {
        assert_eq!(result_with_scores(&[80, 60]).confidence(), 0.7);
        assert_eq!(result_with_scores(&[]).confidence(), 0.0);
    }

    #[test]
    fn markdown_has_all_sections() {
        let mut result = result_with_scores(&[90]);
        result.traceability.report_ids.insert("r1".to_string());

        let markdown = result.render();

        assert!(markdown.starts_with("# GLOBAL Search Result"));
        assert!(markdown.contains("## Response\n\nanswer"));
        assert!(markdown.contains("- Response Type: multiple paragraphs"));
        assert!(markdown.contains("- Report IDs: 1"));
    }

    #[test]
    fn json_hides_provenance_and_sorts_ids() {
        let mut result = result_with_scores(&[50]);
        result.response_format = ResponseFormat::Json;
        result.key_points[0].source_rank = 7;
        result.traceability.entity_ids.insert("b".to_string());
        result.traceability.entity_ids.insert("a".to_string());

        let value: serde_json::Value = serde_json::from_str(&result.render()).unwrap();

        assert_eq!(value["mode"], "global");
        assert_eq!(value["confidence"], 0.5);
        assert!(value["key_points"][0].get("source_rank").is_none());
        assert_eq!(value["traceability"]["entity_ids"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn normalized_description_collapses_whitespace() {
        let key_point = KeyPoint::new("  Alpha   BETA\n gamma ", 10, vec![]);
        assert_eq!(key_point.normalized_description(), "alpha beta gamma");
    }
}
