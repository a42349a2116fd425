use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::Instant;

use crate::config::SearchOptions;
use crate::context_builder::community_context::CommunityContextBuilder;
use crate::error::SearchError;
use crate::llm::base::Completer;
use crate::llm::utils::num_tokens;
use crate::models::CommunityReport;
use crate::search::base::SearchResult;
use crate::vector_stores::vector_store::VectorIndex;

use super::map::MapProcessor;
use super::reduce::ReduceProcessor;

/// Map-reduce search over community reports.
#[derive(Clone)]
pub struct GlobalSearch {
    llm: Arc<dyn Completer>,
    community_index: Option<Arc<dyn VectorIndex>>,
    num_tokens_fn: fn(&str) -> usize,
}

impl GlobalSearch {
    pub fn new(llm: Arc<dyn Completer>, community_index: Option<Arc<dyn VectorIndex>>) -> Self {
        GlobalSearch {
            llm,
            community_index,
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
        options: &SearchOptions,
        deadline: Option<Instant>,
    ) -> Result<SearchResult, SearchError> {
        self.search_batches(query, community_reports, options, None, deadline)
            .await
    }

    /// Map-reduce over at most `max_batches` of the highest-weighted batches.
    pub async fn search_batches(
        &self,
        query: &str,
        community_reports: &[CommunityReport],
        options: &SearchOptions,
        max_batches: Option<usize>,
        deadline: Option<Instant>,
    ) -> Result<SearchResult, SearchError> {
        let start_time = Instant::now();
        let mut warnings = Vec::new();

        let candidate_reports = self
            .prefilter_reports(query, community_reports, options, &mut warnings)
            .await;

        let context_builder =
            CommunityContextBuilder::new(options.community_context_params()).with_num_tokens_fn(self.num_tokens_fn);
        let mut batches = context_builder.build(&candidate_reports)?;
        if let Some(max_batches) = max_batches {
            batches.truncate(max_batches);
        }
        for batch in batches.iter().filter(|batch| batch.oversized) {
            warnings.push(format!(
                "batch {} exceeds the token budget ({} > {})",
                batch.id, batch.token_count, options.batch_size_tokens
            ));
        }

        tracing::info!(
            reports = candidate_reports.len(),
            batches = batches.len(),
            max_concurrent = options.max_concurrent,
            "Starting global search"
        );

        let map_processor = MapProcessor::new(self.llm.clone(), options.map_llm_params(), options.retry.clone())
            .with_num_tokens_fn(self.num_tokens_fn);
        let map_results = map_processor
            .process_all(query, &batches, options.max_concurrent, deadline)
            .await?;

        let reduce_processor = ReduceProcessor::new(self.llm.clone(), options.reduce_params(), options.retry.clone())
            .with_num_tokens_fn(self.num_tokens_fn);
        let mut result = reduce_processor
            .reduce(query, &map_results, options.output_format)
            .await?;

        warnings.append(&mut result.warnings);
        result.warnings = warnings;
        result.elapsed_time = start_time.elapsed();
        Ok(result)
    }

    /// Restricts reports to the community index hits when `community_top_k`
    /// is set. Lookup failures and empty hits keep the full set.
    async fn prefilter_reports(
        &self,
        query: &str,
        community_reports: &[CommunityReport],
        options: &SearchOptions,
        warnings: &mut Vec<String>,
    ) -> Vec<CommunityReport> {
        let (Some(index), Some(top_k)) = (&self.community_index, options.community_top_k) else {
            return community_reports.to_vec();
        };

        match index.similarity_search_by_text(query, top_k).await {
            Ok(hits) => {
                let hit_ids: HashSet<String> = hits.into_iter().map(|hit| hit.id).collect();
                let selected: Vec<CommunityReport> = community_reports
                    .iter()
                    .filter(|report| hit_ids.contains(&report.id) || hit_ids.contains(&report.community_id))
                    .cloned()
                    .collect();
                if selected.is_empty() {
                    tracing::warn!(top_k, "Community index returned no known reports, using all reports");
                    warnings.push("community index returned no known reports".to_string());
                    return community_reports.to_vec();
                }
                tracing::debug!(selected = selected.len(), top_k, "Pre-filtered community reports");
                selected
            }
            Err(e) => {
                tracing::warn!(error = %e, "Community index lookup failed, using all reports");
                warnings.push(format!("community index lookup failed: {}", e));
                community_reports.to_vec()
            }
        }
    }
}
