use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{ResponseFormat, ResponseType, RetryPolicy};
use crate::context_builder::local_context::{LocalContextBuilder, LocalContextBuilderParams};
use crate::error::SearchError;
use crate::llm::base::{Completer, LLMParams, MessageType, SearchPhase};
use crate::llm::retry::complete_with_retry;
use crate::llm::utils::{count_message_tokens, num_tokens};
use crate::models::CommunityReport;
use crate::search::base::SearchResult;
use crate::search::router::SearchMode;

use super::expander::LocalExpander;
use super::prompts::LOCAL_SEARCH_SYSTEM_PROMPT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSearchParams {
    pub top_k_entities: usize,
    pub max_hops: usize,
    pub response_type: ResponseType,
    pub context_params: LocalContextBuilderParams,
    pub llm_params: LLMParams,
}

impl Default for LocalSearchParams {
    fn default() -> Self {
        LocalSearchParams {
            top_k_entities: 10,
            max_hops: 2,
            response_type: ResponseType::MultipleParagraphs,
            context_params: LocalContextBuilderParams::default(),
            llm_params: LLMParams::default(),
        }
    }
}

/// Entity-centric search: seed entities, neighbourhood expansion, one answer
/// call.
pub struct LocalSearch {
    llm: Arc<dyn Completer>,
    expander: LocalExpander,
    retry_policy: RetryPolicy,
    system_prompt: String,
    num_tokens_fn: fn(&str) -> usize,
}

impl LocalSearch {
    pub fn new(llm: Arc<dyn Completer>, expander: LocalExpander, retry_policy: RetryPolicy) -> Self {
        LocalSearch {
            llm,
            expander,
            retry_policy,
            system_prompt: LOCAL_SEARCH_SYSTEM_PROMPT.to_string(),
            num_tokens_fn: num_tokens,
        }
    }

    pub fn with_num_tokens_fn(mut self, num_tokens_fn: fn(&str) -> usize) -> Self {
        self.num_tokens_fn = num_tokens_fn;
        self
    }

    pub async fn search(
        &self,
        query: &str,
        community_reports: &[CommunityReport],
        params: &LocalSearchParams,
        output_format: ResponseFormat,
    ) -> Result<SearchResult, SearchError> {
        let start_time = Instant::now();

        let selected_entities = self.expander.map_query_to_entities(query, params.top_k_entities).await?;
        if selected_entities.is_empty() {
            tracing::info!(query, "No entities matched the query");
            return Ok(SearchResult::no_data(SearchMode::Local, output_format, params.response_type));
        }

        let local_context = self.expander.expand(&selected_entities, params.max_hops);
        let context = LocalContextBuilder::new(params.context_params.clone())
            .with_num_tokens_fn(self.num_tokens_fn)
            .build(&local_context, community_reports);

        let search_prompt = self
            .system_prompt
            .replace("{context_data}", &context.context_text)
            .replace("{response_type}", &params.response_type.to_string());
        let messages = MessageType::chat(&search_prompt, query);
        let prompt_tokens = count_message_tokens(&messages.text_parts(), self.num_tokens_fn);

        let search_response = complete_with_retry(
            self.llm.as_ref(),
            messages,
            params.llm_params.clone(),
            SearchPhase::Local,
            &self.retry_policy,
        )
        .await
        .map_err(|e| SearchError::LocalLlm(e.to_string()))?;

        tracing::info!(
            entities = context.traceability.entity_ids.len(),
            chunks = context.traceability.chunk_ids.len(),
            context_tokens = context.tokens,
            "Local search finished"
        );

        Ok(SearchResult {
            mode: SearchMode::Local,
            response_text: search_response.trim().to_string(),
            response_format: output_format,
            response_type: params.response_type,
            key_points: Vec::new(),
            traceability: context.traceability,
            total_tokens: prompt_tokens + (self.num_tokens_fn)(&search_response),
            llm_calls: 1,
            elapsed_time: start_time.elapsed(),
            warnings: Vec::new(),
        })
    }
}
