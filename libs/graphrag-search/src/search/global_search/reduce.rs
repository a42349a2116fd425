use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{ResponseFormat, ResponseType, RetryPolicy};
use crate::context_builder::context_table::build_context_table;
use crate::error::SearchError;
use crate::llm::base::{Completer, LLMParams, MessageType, SearchPhase};
use crate::llm::retry::complete_with_retry;
use crate::llm::utils::{count_message_tokens, num_tokens};
use crate::search::base::{KeyPoint, MapResult, MapStatus, SearchResult, TraceabilityInfo};
use crate::search::router::SearchMode;

use super::prompts::{GENERAL_KNOWLEDGE_INSTRUCTION, REDUCE_SYSTEM_PROMPT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceParams {
    pub response_type: ResponseType,
    pub max_key_points: usize,
    pub max_data_tokens: usize,
    pub allow_general_knowledge: bool,
    pub llm_params: LLMParams,
}

impl Default for ReduceParams {
    fn default() -> Self {
        ReduceParams {
            response_type: ResponseType::MultipleParagraphs,
            max_key_points: 20,
            max_data_tokens: 6000,
            allow_general_knowledge: false,
            llm_params: LLMParams::default(),
        }
    }
}

/// Merges map key points into one ranked answer.
pub struct ReduceProcessor {
    llm: Arc<dyn Completer>,
    params: ReduceParams,
    retry_policy: RetryPolicy,
    num_tokens_fn: fn(&str) -> usize,
}

impl ReduceProcessor {
    pub fn new(llm: Arc<dyn Completer>, params: ReduceParams, retry_policy: RetryPolicy) -> Self {
        ReduceProcessor {
            llm,
            params,
            retry_policy,
            num_tokens_fn: num_tokens,
        }
    }

    pub fn with_num_tokens_fn(mut self, num_tokens_fn: fn(&str) -> usize) -> Self {
        self.num_tokens_fn = num_tokens_fn;
        self
    }

    /// Reduces the key points of successful batches. Map token usage and
    /// failed batches are accounted for in the returned result.
    pub async fn reduce(
        &self,
        query: &str,
        map_results: &[MapResult],
        output_format: ResponseFormat,
    ) -> Result<SearchResult, SearchError> {
        let mut ordered: Vec<&MapResult> = map_results.iter().collect();
        ordered.sort_by_key(|result| result.batch_id);

        let key_points: Vec<KeyPoint> = ordered
            .iter()
            .filter(|result| result.is_success())
            .flat_map(|result| result.key_points.iter().cloned())
            .collect();

        let mut result = self.reduce_key_points(query, key_points, output_format).await?;

        result.llm_calls += map_results.len();
        result.total_tokens += map_results.iter().map(|r| r.tokens).sum::<usize>();
        for map_result in ordered {
            if let MapStatus::Failed(reason) = &map_result.status {
                result
                    .warnings
                    .push(format!("batch {} failed: {}", map_result.batch_id, reason));
            }
        }

        Ok(result)
    }

    /// Deduplicates, ranks and answers from key points given in first-seen
    /// order.
    pub async fn reduce_key_points(
        &self,
        query: &str,
        key_points: Vec<KeyPoint>,
        output_format: ResponseFormat,
    ) -> Result<SearchResult, SearchError> {
        let start_time = Instant::now();
        let response_type = self.params.response_type;
        let ranked = rank_key_points(key_points);

        let column_delimiter = "|";
        let key_point_table = build_context_table(
            "Key Points",
            &["score", "description", "report_ids"],
            ranked
                .iter()
                .take(self.params.max_key_points)
                .enumerate()
                .map(|(index, key_point)| {
                    (
                        index.to_string(),
                        vec![
                            key_point.score.to_string(),
                            key_point.description.clone(),
                            key_point.report_ids.join(", "),
                        ],
                    )
                }),
            column_delimiter,
            self.params.max_data_tokens,
            self.num_tokens_fn,
        );
        let retained: Vec<KeyPoint> = ranked
            .into_iter()
            .take(key_point_table.included_ids.len())
            .collect();

        if retained.is_empty() && !self.params.allow_general_knowledge {
            tracing::info!("No key points to reduce, returning the no-data answer");
            return Ok(SearchResult::no_data(SearchMode::Global, output_format, response_type));
        }

        let mut search_prompt = REDUCE_SYSTEM_PROMPT
            .replace("{report_data}", &key_point_table.text)
            .replace("{response_type}", &response_type.to_string());
        if self.params.allow_general_knowledge {
            search_prompt.push_str(GENERAL_KNOWLEDGE_INSTRUCTION);
        }

        let messages = MessageType::chat(&search_prompt, query);
        let prompt_tokens = count_message_tokens(&messages.text_parts(), self.num_tokens_fn);

        let search_response = complete_with_retry(
            self.llm.as_ref(),
            messages,
            self.params.llm_params.clone(),
            SearchPhase::Reduce,
            &self.retry_policy,
        )
        .await
        .map_err(|e| SearchError::ReduceLlm(e.to_string()))?;

        let mut traceability = TraceabilityInfo::default();
        for key_point in &retained {
            traceability.merge(&key_point.sources);
            traceability.report_ids.extend(key_point.report_ids.iter().cloned());
        }

        tracing::info!(
            key_points = retained.len(),
            reports = traceability.report_ids.len(),
            "Reduce phase finished"
        );

        Ok(SearchResult {
            mode: SearchMode::Global,
            response_text: search_response.trim().to_string(),
            response_format: output_format,
            response_type,
            key_points: retained,
            traceability,
            total_tokens: prompt_tokens + (self.num_tokens_fn)(&search_response),
            llm_calls: 1,
            elapsed_time: start_time.elapsed(),
            warnings: Vec::new(),
        })
    }
}

/// Merges duplicates (by normalized description) and sorts by score, then
/// source rank, then first-seen position.
pub fn rank_key_points(key_points: Vec<KeyPoint>) -> Vec<KeyPoint> {
    let mut merged: Vec<KeyPoint> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for key_point in key_points {
        let normalized = key_point.normalized_description();
        match positions.get(&normalized) {
            Some(&index) => {
                let existing = &mut merged[index];
                if key_point.score > existing.score {
                    existing.score = key_point.score;
                    existing.description = key_point.description;
                }
                for report_id in key_point.report_ids {
                    if !existing.report_ids.contains(&report_id) {
                        existing.report_ids.push(report_id);
                    }
                }
                existing.source_rank = existing.source_rank.max(key_point.source_rank);
                existing.sources.merge(&key_point.sources);
            }
            None => {
                positions.insert(normalized, merged.len());
                merged.push(key_point);
            }
        }
    }

    // sort_by is stable, so ties keep first-seen order
    merged.sort_by(|a, b| match b.score.cmp(&a.score) {
        Ordering::Equal => b.source_rank.cmp(&a.source_rank),
        other => other,
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_point(description: &str, score: u32, source_rank: u32) -> KeyPoint {
        KeyPoint {
            source_rank,
            ..KeyPoint::new(description, score, vec![format!("r-{}", description)])
        }
    }

    #[test]
    fn ranks_by_score_then_source_rank() {
        let ranked = rank_key_points(vec![
            key_point("a", 80, 1),
            key_point("b", 60, 2),
            key_point("c", 95, 1),
            key_point("d", 60, 5),
        ]);

        let order: Vec<(&str, u32)> = ranked.iter().map(|kp| (kp.description.as_str(), kp.score)).collect();
        assert_eq!(order, vec![("c", 95), ("a", 80), ("d", 60), ("b", 60)]);
    }

    #[test]
    fn duplicates_keep_higher_score_and_union_reports() {
        let ranked = rank_key_points(vec![key_point("Same  point", 40, 1), key_point("same point", 70, 3)]);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 70);
        assert_eq!(ranked[0].source_rank, 3);
        assert_eq!(ranked[0].report_ids, vec!["r-Same  point", "r-same point"]);
    }

    #[test]
    fn equal_keys_keep_first_seen_order() {
        let ranked = rank_key_points(vec![key_point("x", 50, 1), key_point("y", 50, 1)]);
        assert_eq!(ranked[0].description, "x");
        assert_eq!(ranked[1].description, "y");
    }
}
