use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context_builder::community_context::CommunityContextBuilderParams;
use crate::context_builder::local_context::LocalContextBuilderParams;
use crate::error::SearchError;
use crate::llm::base::LLMParams;
use crate::search::drift_search::search::DriftSearchParams;
use crate::search::global_search::reduce::ReduceParams;
use crate::search::local_search::search::LocalSearchParams;

/// Transport encoding of a `SearchResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Markdown,
    Json,
}

/// Shape of the answer the LLM is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResponseType {
    #[default]
    #[serde(rename = "multiple paragraphs")]
    MultipleParagraphs,
    #[serde(rename = "single paragraph")]
    SingleParagraph,
    #[serde(rename = "list")]
    List,
    #[serde(rename = "json")]
    Json,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseType::MultipleParagraphs => "multiple paragraphs",
            ResponseType::SingleParagraph => "single paragraph",
            ResponseType::List => "list",
            ResponseType::Json => "json",
        };
        write!(f, "{}", s)
    }
}

/// What to do with a community report that alone exceeds the batch budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizedPolicy {
    #[default]
    PassThrough,
    Truncate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

/// Options accepted by `SearchModeRouter::route`.
///
/// Every field has a typed default so a partial JSON/TOML document
/// deserializes into a usable value; `validate` is run once per call before
/// any collaborator is touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub min_community_rank: u32,
    pub response_type: ResponseType,
    pub output_format: ResponseFormat,
    pub max_concurrent: usize,
    /// Total token budget, split evenly between the map and reduce phases
    /// (or between context and answer for local search).
    pub max_tokens: usize,
    pub batch_size_tokens: usize,
    pub normalize_community_weight: bool,
    pub require_community_weight: bool,
    pub oversized_policy: OversizedPolicy,
    pub allow_general_knowledge: bool,
    pub max_key_points: usize,
    pub community_top_k: Option<usize>,
    pub top_k_entities: usize,
    pub max_hops: usize,
    pub n_depth: usize,
    pub drift_k_followups: usize,
    pub primer_folds: usize,
    pub auto_entity_confidence: f64,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            min_community_rank: 0,
            response_type: ResponseType::MultipleParagraphs,
            output_format: ResponseFormat::Markdown,
            max_concurrent: 50,
            max_tokens: 12_000,
            batch_size_tokens: 8000,
            normalize_community_weight: true,
            require_community_weight: true,
            oversized_policy: OversizedPolicy::PassThrough,
            allow_general_knowledge: false,
            max_key_points: 20,
            community_top_k: None,
            top_k_entities: 10,
            max_hops: 2,
            n_depth: 2,
            drift_k_followups: 3,
            primer_folds: 2,
            auto_entity_confidence: 0.8,
            temperature: 0.0,
            top_p: 1.0,
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl SearchOptions {
    pub fn validate(&self) -> Result<(), SearchError> {
        let invalid = |reason: &str| Err(SearchError::InvalidConfig(reason.to_string()));

        if self.max_concurrent == 0 {
            return invalid("max_concurrent must be greater than 0");
        }
        if self.max_tokens < 2 {
            return invalid("max_tokens must be at least 2");
        }
        if self.batch_size_tokens == 0 {
            return invalid("batch_size_tokens must be greater than 0");
        }
        if self.max_key_points == 0 {
            return invalid("max_key_points must be greater than 0");
        }
        if self.top_k_entities == 0 {
            return invalid("top_k_entities must be greater than 0");
        }
        if self.primer_folds == 0 {
            return invalid("primer_folds must be greater than 0");
        }
        if self.community_top_k == Some(0) {
            return invalid("community_top_k must be greater than 0 when set");
        }
        if !(0.0..=1.0).contains(&self.auto_entity_confidence) {
            return invalid("auto_entity_confidence must be within 0.0..=1.0");
        }
        if self.temperature < 0.0 {
            return invalid("temperature must not be negative");
        }
        if self.top_p <= 0.0 || self.top_p > 1.0 {
            return invalid("top_p must be within (0.0, 1.0]");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be greater than 0");
        }

        Ok(())
    }

    pub fn map_tokens(&self) -> usize {
        self.max_tokens / 2
    }

    pub fn reduce_tokens(&self) -> usize {
        self.max_tokens - self.map_tokens()
    }

    pub fn community_context_params(&self) -> CommunityContextBuilderParams {
        CommunityContextBuilderParams {
            min_community_rank: self.min_community_rank,
            max_batch_tokens: self.batch_size_tokens,
            normalize_community_weight: self.normalize_community_weight,
            require_community_weight: self.require_community_weight,
            oversized_policy: self.oversized_policy,
            ..CommunityContextBuilderParams::default()
        }
    }

    pub fn map_llm_params(&self) -> LLMParams {
        LLMParams {
            max_tokens: u32::try_from(self.map_tokens()).unwrap_or(u32::MAX),
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }

    pub fn reduce_llm_params(&self) -> LLMParams {
        LLMParams {
            max_tokens: u32::try_from(self.reduce_tokens()).unwrap_or(u32::MAX),
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }

    pub fn reduce_params(&self) -> ReduceParams {
        ReduceParams {
            response_type: self.response_type,
            max_key_points: self.max_key_points,
            max_data_tokens: self.reduce_tokens(),
            allow_general_knowledge: self.allow_general_knowledge,
            llm_params: self.reduce_llm_params(),
        }
    }

    pub fn local_context_params(&self) -> LocalContextBuilderParams {
        LocalContextBuilderParams {
            max_tokens: self.map_tokens(),
            ..LocalContextBuilderParams::default()
        }
    }

    pub fn local_search_params(&self) -> LocalSearchParams {
        LocalSearchParams {
            top_k_entities: self.top_k_entities,
            max_hops: self.max_hops,
            response_type: self.response_type,
            context_params: self.local_context_params(),
            llm_params: self.reduce_llm_params(),
        }
    }

    pub fn drift_params(&self) -> DriftSearchParams {
        DriftSearchParams {
            n_depth: self.n_depth,
            drift_k_followups: self.drift_k_followups,
            primer_folds: self.primer_folds,
            top_k_entities: self.top_k_entities,
            max_hops: self.max_hops,
            context_params: self.local_context_params(),
            llm_params: self.map_llm_params(),
        }
    }
}
