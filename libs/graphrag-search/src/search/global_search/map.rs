use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};

use crate::config::RetryPolicy;
use crate::context_builder::community_context::Batch;
use crate::error::SearchError;
use crate::llm::base::{Completer, LLMParams, MessageType, SearchPhase};
use crate::llm::retry::complete_with_retry;
use crate::llm::utils::{count_message_tokens, num_tokens, parse_json_response};
use crate::search::base::{KeyPoint, MapResult, MapStatus, TraceabilityInfo};

use super::prompts::MAP_SYSTEM_PROMPT;

const DEFAULT_SCORE: f64 = 50.0;

/// Runs the map step: one key-point extraction call per batch.
pub struct MapProcessor {
    llm: Arc<dyn Completer>,
    llm_params: LLMParams,
    retry_policy: RetryPolicy,
    system_prompt: String,
    num_tokens_fn: fn(&str) -> usize,
}

impl MapProcessor {
    pub fn new(llm: Arc<dyn Completer>, llm_params: LLMParams, retry_policy: RetryPolicy) -> Self {
        MapProcessor {
            llm,
            llm_params,
            retry_policy,
            system_prompt: MAP_SYSTEM_PROMPT.to_string(),
            num_tokens_fn: num_tokens,
        }
    }

    pub fn with_num_tokens_fn(mut self, num_tokens_fn: fn(&str) -> usize) -> Self {
        self.num_tokens_fn = num_tokens_fn;
        self
    }

    pub async fn process_batch(&self, query: &str, batch: &Batch) -> MapResult {
        let start_time = Instant::now();
        let search_prompt = self.system_prompt.replace("{context_data}", &batch.context_text);
        let messages = MessageType::chat(&search_prompt, query);
        let prompt_tokens = count_message_tokens(&messages.text_parts(), self.num_tokens_fn);

        match complete_with_retry(
            self.llm.as_ref(),
            messages,
            self.llm_params.clone(),
            SearchPhase::Map,
            &self.retry_policy,
        )
        .await
        {
            Ok(search_response) => {
                let key_points = parse_key_points(&search_response, batch);
                tracing::debug!(
                    batch_id = batch.id,
                    key_points = key_points.len(),
                    "Map batch completed"
                );
                MapResult {
                    batch_id: batch.id,
                    key_points,
                    status: MapStatus::Success,
                    latency: start_time.elapsed(),
                    context_tokens: batch.token_count,
                    tokens: prompt_tokens + (self.num_tokens_fn)(&search_response),
                }
            }
            Err(e) => {
                tracing::warn!(batch_id = batch.id, error = %e, "Map batch failed");
                MapResult {
                    tokens: prompt_tokens,
                    ..MapResult::failed(batch.id, e.to_string(), start_time.elapsed(), batch.token_count)
                }
            }
        }
    }

    /// Maps every batch with at most `max_concurrent` calls in flight.
    ///
    /// Batches still waiting or running at `deadline` are reported as failed.
    /// Results are returned in batch id order.
    pub async fn process_all(
        &self,
        query: &str,
        batches: &[Batch],
        max_concurrent: usize,
        deadline: Option<Instant>,
    ) -> Result<Vec<MapResult>, SearchError> {
        if batches.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Semaphore::new(max_concurrent.max(1));
        let semaphore = &semaphore;

        let map_responses = join_all(batches.iter().map(|batch| async move {
            let start_time = Instant::now();
            let work = async {
                let _permit = semaphore.acquire().await.map_err(|e| e.to_string())?;
                Ok::<MapResult, String>(self.process_batch(query, batch).await)
            };

            let outcome = match deadline {
                Some(deadline) => timeout_at(deadline, work)
                    .await
                    .unwrap_or_else(|_| Err("deadline exceeded".to_string())),
                None => work.await,
            };

            outcome.unwrap_or_else(|reason| {
                tracing::warn!(batch_id = batch.id, reason = %reason, "Map batch did not complete");
                MapResult::failed(batch.id, reason, start_time.elapsed(), batch.token_count)
            })
        }))
        .await;

        let mut map_responses = map_responses;
        map_responses.sort_by_key(|result| result.batch_id);

        let failed = map_responses.iter().filter(|result| !result.is_success()).count();
        tracing::info!(
            batches = map_responses.len(),
            failed,
            max_concurrent,
            "Map phase finished"
        );

        if failed == map_responses.len() {
            return Err(SearchError::AllBatchesFailed(failed));
        }

        Ok(map_responses)
    }
}

/// Turns a map response into key points scoped to `batch`.
///
/// Accepts `{"points": [...]}`, `{"key_points": [...]}` or a bare list, with
/// or without a ```json fence. Anything else, including JSON with no usable
/// point, becomes one key point with score 0 holding the whole response. A
/// blank response or an empty point list has no key points.
pub fn parse_key_points(response: &str, batch: &Batch) -> Vec<KeyPoint> {
    let response = response.trim();
    if response.is_empty() {
        return Vec::new();
    }

    let items = parse_json_response(response).and_then(|value| match value {
        Value::Array(items) => Some(items),
        Value::Object(mut object) => match object.remove("points").or_else(|| object.remove("key_points")) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    });

    let key_points: Vec<KeyPoint> = match items {
        Some(items) if items.is_empty() => return Vec::new(),
        Some(items) => items
            .iter()
            .filter_map(|item| key_point_from_value(item, batch))
            .map(|key_point| with_provenance(key_point, batch))
            .collect(),
        None => Vec::new(),
    };
    if !key_points.is_empty() {
        return key_points;
    }

    tracing::warn!(batch_id = batch.id, "Unusable map response, keeping it as a single key point");
    vec![with_provenance(KeyPoint::new(response, 0, batch.report_ids()), batch)]
}

fn key_point_from_value(item: &Value, batch: &Batch) -> Option<KeyPoint> {
    let (description, score, cited) = match item {
        Value::String(description) => (description.clone(), DEFAULT_SCORE, Vec::new()),
        Value::Object(object) => {
            let description = object
                .get("description")
                .or_else(|| object.get("answer"))
                .and_then(Value::as_str)?
                .to_string();
            let score = object.get("score").and_then(score_from_value).unwrap_or(DEFAULT_SCORE);
            let cited = object
                .get("report_ids")
                .and_then(Value::as_array)
                .map(|ids| ids.iter().filter_map(id_from_value).collect())
                .unwrap_or_default();
            (description, score, cited)
        }
        _ => return None,
    };

    if description.trim().is_empty() {
        return None;
    }

    let batch_ids = batch.report_ids();
    let mut report_ids: Vec<String> = Vec::new();
    for id in cited {
        if batch_ids.contains(&id) && !report_ids.contains(&id) {
            report_ids.push(id);
        }
    }
    if report_ids.is_empty() {
        report_ids = batch_ids;
    }

    Some(KeyPoint::new(description.trim(), score.clamp(0.0, 100.0).round() as u32, report_ids))
}

fn score_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn with_provenance(mut key_point: KeyPoint, batch: &Batch) -> KeyPoint {
    let mut sources = TraceabilityInfo::default();
    for report_id in &key_point.report_ids {
        if let Some(report) = batch.report(report_id) {
            key_point.source_rank = key_point.source_rank.max(report.rank);
            sources.add_report(report);
        }
    }
    key_point.sources = sources;
    key_point
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommunityReport;

    fn batch() -> Batch {
        let report = |id: &str, rank: u32| CommunityReport {
            id: id.to_string(),
            title: id.to_string(),
            summary_text: String::new(),
            rank,
            weight: Some(0.5),
            community_id: id.to_string(),
            source_entity_ids: vec![format!("e-{}", id)],
            source_document_ids: vec![format!("d-{}", id)],
        };
        Batch {
            id: 3,
            reports: vec![report("r1", 2), report("r2", 7)],
            context_text: String::new(),
            token_count: 10,
            oversized: false,
            truncated: false,
        }
    }

    #[test]
    fn parses_fenced_points() {
        let response = r#"```json
{"points": [{"description": "Alpha", "score": 120, "report_ids": ["r2", "unknown"]}, {"description": "Beta"}]}
```"#;

        let key_points = parse_key_points(response, &batch());

        assert_eq!(key_points.len(), 2);
        assert_eq!(key_points[0].score, 100);
        assert_eq!(key_points[0].report_ids, vec!["r2"]);
        assert_eq!(key_points[0].source_rank, 7);
        assert!(key_points[0].sources.document_ids.contains("d-r2"));
        assert_eq!(key_points[1].score, 50);
        assert_eq!(key_points[1].report_ids, vec!["r1", "r2"]);
    }

    #[test]
    fn parses_bare_list() {
        let key_points = parse_key_points(r#"[{"answer": "Gamma", "score": "30"}]"#, &batch());

        assert_eq!(key_points.len(), 1);
        assert_eq!(key_points[0].description, "Gamma");
        assert_eq!(key_points[0].score, 30);
    }

    #[test]
    fn prose_degrades_to_single_point() {
        let key_points = parse_key_points("Just some text.", &batch());

        assert_eq!(key_points.len(), 1);
        assert_eq!(key_points[0].score, 0);
        assert_eq!(key_points[0].description, "Just some text.");
    }

    #[test]
    fn unusable_json_degrades_to_single_point() {
        let cited = parse_key_points("Alice leads the lab, see reference [1].", &batch());
        assert_eq!(cited.len(), 1);
        assert_eq!(cited[0].score, 0);
        assert_eq!(cited[0].description, "Alice leads the lab, see reference [1].");
        assert_eq!(cited[0].report_ids, vec!["r1", "r2"]);

        let response = r#"{"points": [{"text": "Alice leads the lab"}]}"#;
        let unknown_keys = parse_key_points(response, &batch());
        assert_eq!(unknown_keys.len(), 1);
        assert_eq!(unknown_keys[0].score, 0);
        assert_eq!(unknown_keys[0].description, response);
    }

    #[test]
    fn blank_response_has_no_points() {
        assert!(parse_key_points("  \n", &batch()).is_empty());
        assert!(parse_key_points(r#"{"points": []}"#, &batch()).is_empty());
    }
}
