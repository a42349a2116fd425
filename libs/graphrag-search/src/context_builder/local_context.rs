use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::llm::utils::num_tokens;
use crate::models::CommunityReport;
use crate::retrieval::community_reports::get_candidate_communities;
use crate::search::base::TraceabilityInfo;
use crate::search::local_search::expander::LocalContext;

use super::context_table::build_context_table;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalContextBuilderParams {
    pub max_tokens: usize,
    pub community_prop: f32,
    pub text_unit_prop: f32,
    pub column_delimiter: String,
}

impl Default for LocalContextBuilderParams {
    fn default() -> Self {
        LocalContextBuilderParams {
            max_tokens: 6000,
            community_prop: 0.25,
            text_unit_prop: 0.5,
            column_delimiter: "|".to_string(),
        }
    }
}

/// Context text sent to the LLM together with the ids that made it in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalContextText {
    pub context_text: String,
    pub tokens: usize,
    pub traceability: TraceabilityInfo,
}

/// Renders an expanded entity neighbourhood as Reports, Entities,
/// Relationships and Sources tables, each within its share of the budget.
pub struct LocalContextBuilder {
    params: LocalContextBuilderParams,
    num_tokens_fn: fn(&str) -> usize,
}

impl LocalContextBuilder {
    pub fn new(params: LocalContextBuilderParams) -> Self {
        LocalContextBuilder {
            params,
            num_tokens_fn: num_tokens,
        }
    }

    pub fn with_num_tokens_fn(mut self, num_tokens_fn: fn(&str) -> usize) -> Self {
        self.num_tokens_fn = num_tokens_fn;
        self
    }

    pub fn build(&self, context: &LocalContext, community_reports: &[CommunityReport]) -> LocalContextText {
        let max_tokens = self.params.max_tokens;
        let community_tokens = (max_tokens as f32 * self.params.community_prop) as usize;
        let text_unit_tokens = (max_tokens as f32 * self.params.text_unit_prop) as usize;
        let local_tokens = max_tokens.saturating_sub(community_tokens + text_unit_tokens);
        let delimiter = self.params.column_delimiter.as_str();

        let mut traceability = TraceabilityInfo::default();
        let mut sections = Vec::new();
        let mut tokens = 0;

        // Reports
        let selected_reports = get_candidate_communities(&context.entities, community_reports);
        let report_table = build_context_table(
            "Reports",
            &["id", "title", "content"],
            selected_reports
                .iter()
                .map(|report| (report.id.clone(), vec![report.id.clone(), report.title.clone(), report.summary_text.clone()])),
            delimiter,
            community_tokens,
            self.num_tokens_fn,
        );
        for report in selected_reports.iter().filter(|r| report_table.included_ids.contains(&r.id)) {
            traceability.add_report(report);
        }

        // Entities, then relationships among what fits
        let entity_table = build_context_table(
            "Entities",
            &["id", "entity", "description", "rank"],
            context.entities.iter().map(|entity| {
                (
                    entity.id.clone(),
                    vec![
                        entity.id.clone(),
                        entity.title.clone(),
                        entity.description.clone(),
                        entity.rank.to_string(),
                    ],
                )
            }),
            delimiter,
            local_tokens,
            self.num_tokens_fn,
        );
        let included_entities: HashSet<&str> = entity_table.included_ids.iter().map(|id| id.as_str()).collect();
        traceability
            .entity_ids
            .extend(entity_table.included_ids.iter().cloned());

        let mut relationships: Vec<_> = context
            .relationships
            .iter()
            .filter(|rel| {
                included_entities.contains(rel.source_id.as_str()) || included_entities.contains(rel.target_id.as_str())
            })
            .collect();
        relationships.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        let relationship_table = build_context_table(
            "Relationships",
            &["id", "source", "target", "description", "weight"],
            relationships.iter().map(|rel| {
                (
                    rel.id.clone(),
                    vec![
                        rel.id.clone(),
                        rel.source_id.clone(),
                        rel.target_id.clone(),
                        rel.description.clone(),
                        format!("{:.2}", rel.weight),
                    ],
                )
            }),
            delimiter,
            local_tokens.saturating_sub(entity_table.tokens),
            self.num_tokens_fn,
        );

        // Sources
        let source_table = build_context_table(
            "Sources",
            &["id", "text"],
            context
                .text_units
                .iter()
                .map(|unit| (unit.id.clone(), vec![unit.id.clone(), unit.text.clone()])),
            delimiter,
            text_unit_tokens,
            self.num_tokens_fn,
        );
        for unit in context
            .text_units
            .iter()
            .filter(|unit| source_table.included_ids.contains(&unit.id))
        {
            traceability.add_text_unit(unit);
        }

        for table in [report_table, entity_table, relationship_table, source_table] {
            if table.is_empty() {
                continue;
            }
            tokens += table.tokens;
            sections.push(table.text);
        }

        LocalContextText {
            context_text: sections.join("\n\n"),
            tokens,
            traceability,
        }
    }
}
