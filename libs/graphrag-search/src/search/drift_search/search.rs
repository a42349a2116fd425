use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::SearchOptions;
use crate::context_builder::local_context::{LocalContextBuilder, LocalContextBuilderParams};
use crate::error::SearchError;
use crate::llm::base::{Completer, LLMParams, MessageType, SearchPhase};
use crate::llm::retry::complete_with_retry;
use crate::llm::utils::{count_message_tokens, num_tokens, parse_json_response};
use crate::models::{CommunityReport, Entity};
use crate::retrieval::entities::find_mentioned_entities;
use crate::search::base::{KeyPoint, SearchResult, TraceabilityInfo, NO_DATA_ANSWER};
use crate::search::global_search::reduce::ReduceProcessor;
use crate::search::global_search::search::GlobalSearch;
use crate::search::local_search::expander::LocalExpander;
use crate::search::router::SearchMode;
use crate::vector_stores::vector_store::VectorIndex;

use super::prompts::{DRIFT_FOLLOWUP_PROMPT, DRIFT_LOCAL_SYSTEM_PROMPT};
use super::state::{DriftAnswer, DriftPhase, DriftState};

const DEFAULT_ANSWER_SCORE: u32 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSearchParams {
    pub n_depth: usize,
    pub drift_k_followups: usize,
    pub primer_folds: usize,
    pub top_k_entities: usize,
    pub max_hops: usize,
    pub context_params: LocalContextBuilderParams,
    pub llm_params: LLMParams,
}

impl Default for DriftSearchParams {
    fn default() -> Self {
        DriftSearchParams {
            n_depth: 2,
            drift_k_followups: 3,
            primer_folds: 2,
            top_k_entities: 10,
            max_hops: 2,
            context_params: LocalContextBuilderParams::default(),
            llm_params: LLMParams::default(),
        }
    }
}

/// Iterative hybrid search: a global primer, then rounds of local expansion
/// driven by LLM follow-up questions, reduced into one answer.
pub struct DriftCombiner {
    llm: Arc<dyn Completer>,
    primer: GlobalSearch,
    expander: LocalExpander,
    num_tokens_fn: fn(&str) -> usize,
}

/// Running totals for one drift search.
#[derive(Default)]
struct DriftUsage {
    llm_calls: usize,
    total_tokens: usize,
    warnings: Vec<String>,
    traceability: TraceabilityInfo,
}

impl DriftUsage {
    fn warn(&mut self, warning: String) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }
}

impl DriftCombiner {
    pub fn new(
        llm: Arc<dyn Completer>,
        expander: LocalExpander,
        community_index: Option<Arc<dyn VectorIndex>>,
    ) -> Self {
        DriftCombiner {
            primer: GlobalSearch::new(llm.clone(), community_index),
            llm,
            expander,
            num_tokens_fn: num_tokens,
        }
    }

    pub fn with_num_tokens_fn(mut self, num_tokens_fn: fn(&str) -> usize) -> Self {
        self.num_tokens_fn = num_tokens_fn;
        self.primer = self.primer.with_num_tokens_fn(num_tokens_fn);
        self
    }

    pub async fn search(
        &self,
        query: &str,
        community_reports: &[CommunityReport],
        options: &SearchOptions,
        deadline: Option<Instant>,
    ) -> Result<SearchResult, SearchError> {
        let start_time = Instant::now();
        let params = options.drift_params();
        let mut state = DriftState::new(query, params.n_depth);
        let mut usage = DriftUsage::default();

        state.transition(DriftPhase::Primer);
        let (primer_point, primer_candidates) = self
            .run_primer(query, community_reports, options, &params, deadline, &mut usage)
            .await?;

        let local_context_builder =
            LocalContextBuilder::new(params.context_params.clone()).with_num_tokens_fn(self.num_tokens_fn);
        let mut answer_failures = 0;

        while !state.is_terminal() {
            if deadline_passed(deadline) {
                usage.warn(format!("deadline reached at drift depth {}", state.depth));
                state.transition(DriftPhase::Terminal);
                continue;
            }

            state.transition(DriftPhase::LocalExpand);
            let questions = state.take_pending(params.drift_k_followups);

            let mut seeds = Vec::new();
            for question in &questions {
                match self.expander.map_query_to_entities(question, params.top_k_entities).await {
                    Ok(entities) => seeds.extend(entities),
                    Err(e) => usage.warn(format!("entity lookup failed at depth {}: {}", state.depth, e)),
                }
            }
            if state.depth == 0 {
                seeds.extend(primer_candidates.iter().cloned());
            }
            let seeds = dedup_entities(seeds);

            let local_context = self
                .expander
                .expand_from(&seeds, params.max_hops, &mut state.visited_entity_ids);
            if local_context.is_empty() {
                usage.warn(format!("no new entities at drift depth {}", state.depth));
            }
            let context = local_context_builder.build(&local_context, community_reports);
            usage.traceability.merge(&context.traceability);

            let answer = self
                .answer(query, &questions, &context.context_text, &primer_point, &state, options, &params, &mut usage)
                .await;
            match answer {
                Ok((response, score)) => state.collected_answers.push(DriftAnswer {
                    depth: state.depth,
                    questions,
                    response,
                    score,
                    traceability: context.traceability,
                }),
                Err(e) => {
                    answer_failures += 1;
                    usage.warn(format!("drift answer failed at depth {}: {}", state.depth, e));
                }
            }

            if state.depth >= params.n_depth {
                state.transition(DriftPhase::Terminal);
                continue;
            }
            if deadline_passed(deadline) {
                usage.warn(format!("deadline reached at drift depth {}", state.depth));
                state.transition(DriftPhase::Terminal);
                continue;
            }

            state.transition(DriftPhase::Followup);
            let followups = match self.followups(query, &state, options, &params, &mut usage).await {
                Ok(followups) => followups,
                Err(e) => {
                    usage.warn(format!("follow-up generation failed at depth {}: {}", state.depth, e));
                    Vec::new()
                }
            };
            if state.add_followups(followups, params.drift_k_followups) == 0 {
                tracing::debug!(depth = state.depth, "No new follow-up questions");
                state.transition(DriftPhase::Terminal);
                continue;
            }
            state.depth += 1;
        }

        tracing::info!(
            cycles = state.local_cycles(),
            answers = state.collected_answers.len(),
            answer_failures,
            visited = state.visited_entity_ids.len(),
            "Drift search loop finished"
        );

        if primer_point.is_none() && state.collected_answers.is_empty() {
            return Err(SearchError::AllBatchesFailed(1 + state.local_cycles()));
        }

        state.transition(DriftPhase::Reduce);
        let mut key_points: Vec<KeyPoint> = primer_point.into_iter().collect();
        key_points.extend(state.collected_answers.iter().map(|answer| {
            KeyPoint {
                sources: answer.traceability.clone(),
                ..KeyPoint::new(
                    answer.response.clone(),
                    answer.score,
                    answer.traceability.report_ids.iter().cloned().collect(),
                )
            }
        }));

        let reduce_processor = ReduceProcessor::new(self.llm.clone(), options.reduce_params(), options.retry.clone())
            .with_num_tokens_fn(self.num_tokens_fn);
        let mut result = reduce_processor
            .reduce_key_points(query, key_points, options.output_format)
            .await?;

        result.mode = SearchMode::Drift;
        result.traceability.merge(&usage.traceability);
        result.llm_calls += usage.llm_calls;
        result.total_tokens += usage.total_tokens;
        usage.warnings.append(&mut result.warnings);
        result.warnings = usage.warnings;
        result.elapsed_time = start_time.elapsed();
        Ok(result)
    }

    /// Global map-reduce over the first `primer_folds` batches. Returns the
    /// primer answer as a key point and the entities it mentions.
    async fn run_primer(
        &self,
        query: &str,
        community_reports: &[CommunityReport],
        options: &SearchOptions,
        params: &DriftSearchParams,
        deadline: Option<Instant>,
        usage: &mut DriftUsage,
    ) -> Result<(Option<KeyPoint>, Vec<Entity>), SearchError> {
        let primer = self
            .primer
            .search_batches(query, community_reports, options, Some(params.primer_folds), deadline)
            .await;

        let primer = match primer {
            Ok(primer) => primer,
            Err(e) if e.is_pre_flight() => return Err(e),
            Err(e) => {
                usage.warn(format!("drift primer failed: {}", e));
                return Ok((None, Vec::new()));
            }
        };

        usage.llm_calls += primer.llm_calls;
        usage.total_tokens += primer.total_tokens;
        usage.traceability.merge(&primer.traceability);
        usage.warnings.extend(primer.warnings.iter().cloned());

        if primer.response_text == NO_DATA_ANSWER {
            return Ok((None, Vec::new()));
        }

        let candidates = find_mentioned_entities(&primer.response_text, &self.expander.graph().entities());
        let score = if primer.key_points.is_empty() {
            DEFAULT_ANSWER_SCORE
        } else {
            (primer.confidence() * 100.0).round() as u32
        };
        let key_point = KeyPoint {
            sources: primer.traceability.clone(),
            ..KeyPoint::new(
                primer.response_text.clone(),
                score,
                primer.traceability.report_ids.iter().cloned().collect(),
            )
        };

        tracing::debug!(candidates = candidates.len(), score, "Drift primer finished");
        Ok((Some(key_point), candidates))
    }

    #[allow(clippy::too_many_arguments)]
    async fn answer(
        &self,
        query: &str,
        questions: &[String],
        context_text: &str,
        primer_point: &Option<KeyPoint>,
        state: &DriftState,
        options: &SearchOptions,
        params: &DriftSearchParams,
        usage: &mut DriftUsage,
    ) -> anyhow::Result<(String, u32)> {
        let mut findings: Vec<String> = primer_point
            .iter()
            .map(|point| format!("- {}", point.description))
            .collect();
        findings.extend(
            state
                .collected_answers
                .iter()
                .map(|answer| format!("- {}", answer.response)),
        );
        let findings = if findings.is_empty() {
            "None".to_string()
        } else {
            findings.join("\n")
        };

        let search_prompt = DRIFT_LOCAL_SYSTEM_PROMPT
            .replace("{global_query}", query)
            .replace("{findings}", &findings)
            .replace("{context_data}", context_text);
        let messages = MessageType::chat(&search_prompt, &questions.join("\n"));
        usage.total_tokens += count_message_tokens(&messages.text_parts(), self.num_tokens_fn);
        usage.llm_calls += 1;

        let response = complete_with_retry(
            self.llm.as_ref(),
            messages,
            params.llm_params.clone(),
            SearchPhase::DriftAnswer,
            &options.retry,
        )
        .await?;
        usage.total_tokens += (self.num_tokens_fn)(&response);

        Ok(parse_drift_answer(&response))
    }

    async fn followups(
        &self,
        query: &str,
        state: &DriftState,
        options: &SearchOptions,
        params: &DriftSearchParams,
        usage: &mut DriftUsage,
    ) -> anyhow::Result<Vec<String>> {
        let latest_answer = state
            .collected_answers
            .last()
            .map(|answer| answer.response.as_str())
            .unwrap_or("");

        let search_prompt = DRIFT_FOLLOWUP_PROMPT
            .replace("{k}", &params.drift_k_followups.to_string())
            .replace("{global_query}", query)
            .replace("{asked}", &state.asked_questions().join("\n"))
            .replace("{answer}", latest_answer);
        let messages = MessageType::chat(&search_prompt, query);
        usage.total_tokens += count_message_tokens(&messages.text_parts(), self.num_tokens_fn);
        usage.llm_calls += 1;

        let response = complete_with_retry(
            self.llm.as_ref(),
            messages,
            params.llm_params.clone(),
            SearchPhase::DriftFollowup,
            &options.retry,
        )
        .await?;
        usage.total_tokens += (self.num_tokens_fn)(&response);

        Ok(parse_followups(&response))
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |deadline| Instant::now() >= deadline)
}

fn dedup_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|entity| seen.insert(entity.id.clone()))
        .collect()
}

/// `{"response": ..., "score": ...}`, or the raw text with a neutral score.
pub fn parse_drift_answer(response: &str) -> (String, u32) {
    if let Some(Value::Object(object)) = parse_json_response(response) {
        if let Some(text) = object.get("response").and_then(Value::as_str) {
            let score = object
                .get("score")
                .and_then(|score| match score {
                    Value::Number(number) => number.as_f64(),
                    Value::String(text) => text.trim().parse().ok(),
                    _ => None,
                })
                .map(|score| score.clamp(0.0, 100.0).round() as u32)
                .unwrap_or(DEFAULT_ANSWER_SCORE);
            return (text.trim().to_string(), score);
        }
    }

    (response.trim().to_string(), DEFAULT_ANSWER_SCORE)
}

/// Follow-up questions from a JSON object, a bare list, or one question per
/// line.
pub fn parse_followups(response: &str) -> Vec<String> {
    let strings = |items: &[Value]| -> Vec<String> {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(|question| question.trim().to_string())
            .filter(|question| !question.is_empty())
            .collect()
    };

    match parse_json_response(response) {
        Some(Value::Array(items)) => return strings(items.as_slice()),
        Some(Value::Object(object)) => {
            for key in ["follow_up_queries", "followups", "questions"] {
                if let Some(Value::Array(items)) = object.get(key) {
                    return strings(items.as_slice());
                }
            }
            return Vec::new();
        }
        _ => {}
    }

    response
        .lines()
        .map(|line| line.trim().trim_start_matches(|c: char| c == '-' || c == '*' || c == '.' || c.is_ascii_digit()))
        .map(str::trim)
        .filter(|line| line.ends_with('?'))
        .map(str::to_string)
        .collect()
}
