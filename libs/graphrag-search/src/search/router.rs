use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::SearchOptions;
use crate::error::SearchError;
use crate::llm::base::Completer;
use crate::llm::utils::num_tokens;
use crate::models::CommunityReport;
use crate::retrieval::entities::find_mentioned_entities;
use crate::retrieval::graph::RelationshipGraph;
use crate::vector_stores::vector_store::VectorIndex;

use super::base::SearchResult;
use super::drift_search::search::DriftCombiner;
use super::global_search::search::GlobalSearch;
use super::local_search::expander::LocalExpander;
use super::local_search::search::LocalSearch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Local,
    Global,
    Drift,
    Auto,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchMode::Local => "local",
            SearchMode::Global => "global",
            SearchMode::Drift => "drift",
            SearchMode::Auto => "auto",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SearchMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(SearchMode::Local),
            "global" => Ok(SearchMode::Global),
            "drift" => Ok(SearchMode::Drift),
            "auto" => Ok(SearchMode::Auto),
            _ => Err(SearchError::InvalidMode(s.to_string())),
        }
    }
}

/// Entry point: picks a strategy and returns a traced result.
pub struct SearchModeRouter {
    llm: Arc<dyn Completer>,
    graph: Arc<dyn RelationshipGraph>,
    community_reports: Vec<CommunityReport>,
    entity_index: Option<Arc<dyn VectorIndex>>,
    community_index: Option<Arc<dyn VectorIndex>>,
    num_tokens_fn: fn(&str) -> usize,
}

impl SearchModeRouter {
    pub fn new(
        llm: Arc<dyn Completer>,
        graph: Arc<dyn RelationshipGraph>,
        community_reports: Vec<CommunityReport>,
    ) -> Self {
        SearchModeRouter {
            llm,
            graph,
            community_reports,
            entity_index: None,
            community_index: None,
            num_tokens_fn: num_tokens,
        }
    }

    pub fn with_entity_index(mut self, entity_index: Arc<dyn VectorIndex>) -> Self {
        self.entity_index = Some(entity_index);
        self
    }

    pub fn with_community_index(mut self, community_index: Arc<dyn VectorIndex>) -> Self {
        self.community_index = Some(community_index);
        self
    }

    pub fn with_num_tokens_fn(mut self, num_tokens_fn: fn(&str) -> usize) -> Self {
        self.num_tokens_fn = num_tokens_fn;
        self
    }

    /// Parses `mode` case-insensitively and runs the search.
    pub async fn route(&self, query: &str, mode: &str, options: &SearchOptions) -> Result<SearchResult, SearchError> {
        let mode = mode.parse::<SearchMode>()?;
        self.route_mode(query, mode, options).await
    }

    pub async fn route_mode(
        &self,
        query: &str,
        mode: SearchMode,
        options: &SearchOptions,
    ) -> Result<SearchResult, SearchError> {
        options.validate()?;
        let start_time = Instant::now();
        let deadline = options.timeout.and_then(|timeout| start_time.checked_add(timeout));

        let resolved = match mode {
            SearchMode::Auto => self.resolve_auto(query, options).await,
            mode => mode,
        };
        tracing::info!(requested = %mode, resolved = %resolved, "Routing query");

        let outcome = match resolved {
            SearchMode::Local => {
                LocalSearch::new(self.llm.clone(), self.expander(), options.retry.clone())
                    .with_num_tokens_fn(self.num_tokens_fn)
                    .search(query, &self.community_reports, &options.local_search_params(), options.output_format)
                    .await
            }
            SearchMode::Drift => {
                DriftCombiner::new(self.llm.clone(), self.expander(), self.community_index.clone())
                    .with_num_tokens_fn(self.num_tokens_fn)
                    .search(query, &self.community_reports, options, deadline)
                    .await
            }
            SearchMode::Global | SearchMode::Auto => {
                GlobalSearch::new(self.llm.clone(), self.community_index.clone())
                    .with_num_tokens_fn(self.num_tokens_fn)
                    .search(query, &self.community_reports, options, deadline)
                    .await
            }
        };

        match outcome {
            Ok(mut result) => {
                result.elapsed_time = start_time.elapsed();
                tracing::info!(
                    mode = %resolved,
                    llm_calls = result.llm_calls,
                    total_tokens = result.total_tokens,
                    warnings = result.warnings.len(),
                    "Search finished"
                );
                Ok(result)
            }
            Err(SearchError::NoReports) => {
                tracing::info!(mode = %resolved, "No community reports to search");
                Ok(SearchResult::no_data(resolved, options.output_format, options.response_type))
            }
            Err(e @ (SearchError::InvalidMode(_) | SearchError::InvalidConfig(_))) => Err(e),
            Err(e) => {
                tracing::error!(mode = %resolved, error = %e, "Search failed");
                Err(e.in_mode(resolved))
            }
        }
    }

    fn expander(&self) -> LocalExpander {
        LocalExpander::new(self.graph.clone(), self.entity_index.clone())
    }

    /// Local when the query names a known entity or the entity index is
    /// confident about one; global otherwise.
    async fn resolve_auto(&self, query: &str, options: &SearchOptions) -> SearchMode {
        if !find_mentioned_entities(query, &self.graph.entities()).is_empty() {
            return SearchMode::Local;
        }

        let Some(entity_index) = &self.entity_index else {
            return SearchMode::Global;
        };

        match entity_index.similarity_search_by_text(query, 1).await {
            Ok(hits) => {
                let top_score = hits.iter().map(|hit| hit.score).fold(f64::NEG_INFINITY, f64::max);
                if top_score >= options.auto_entity_confidence {
                    SearchMode::Local
                } else {
                    SearchMode::Global
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Entity index lookup failed, routing to global search");
                SearchMode::Global
            }
        }
    }
}
