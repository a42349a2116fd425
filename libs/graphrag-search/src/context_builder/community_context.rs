use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::config::OversizedPolicy;
use crate::error::SearchError;
use crate::llm::utils::num_tokens;
use crate::models::CommunityReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityContextBuilderParams {
    pub min_community_rank: u32,
    pub max_batch_tokens: usize,
    pub normalize_community_weight: bool,
    pub require_community_weight: bool,
    pub oversized_policy: OversizedPolicy,
    pub context_name: String,
    pub column_delimiter: String,
}

impl Default for CommunityContextBuilderParams {
    fn default() -> Self {
        CommunityContextBuilderParams {
            min_community_rank: 0,
            max_batch_tokens: 8000,
            normalize_community_weight: true,
            require_community_weight: true,
            oversized_policy: OversizedPolicy::PassThrough,
            context_name: "Reports".to_string(),
            column_delimiter: "|".to_string(),
        }
    }
}

/// A group of community reports rendered as one table, sent to the LLM in a
/// single map call.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: usize,
    pub reports: Vec<CommunityReport>,
    pub context_text: String,
    pub token_count: usize,
    pub oversized: bool,
    pub truncated: bool,
}

impl Batch {
    pub fn report_ids(&self) -> Vec<String> {
        self.reports.iter().map(|report| report.id.clone()).collect()
    }

    pub fn report(&self, report_id: &str) -> Option<&CommunityReport> {
        self.reports.iter().find(|report| report.id == report_id)
    }
}

pub struct CommunityContextBuilder {
    params: CommunityContextBuilderParams,
    num_tokens_fn: fn(&str) -> usize,
}

impl CommunityContextBuilder {
    pub fn new(params: CommunityContextBuilderParams) -> Self {
        CommunityContextBuilder {
            params,
            num_tokens_fn: num_tokens,
        }
    }

    pub fn with_num_tokens_fn(mut self, num_tokens_fn: fn(&str) -> usize) -> Self {
        self.num_tokens_fn = num_tokens_fn;
        self
    }

    pub fn params(&self) -> &CommunityContextBuilderParams {
        &self.params
    }

    /// Filters, weights, sorts and packs reports into token-bounded batches.
    pub fn build(&self, community_reports: &[CommunityReport]) -> Result<Vec<Batch>, SearchError> {
        let mut selected_reports: Vec<CommunityReport> = community_reports
            .iter()
            .filter(|report| report.rank >= self.params.min_community_rank)
            .cloned()
            .collect();

        if self.params.require_community_weight {
            let missing: Vec<String> = selected_reports
                .iter()
                .filter(|report| !has_weight(report))
                .map(|report| report.id.clone())
                .collect();
            if !missing.is_empty() {
                return Err(SearchError::WeightsNotSet(missing));
            }
        }

        if selected_reports.is_empty() {
            return Err(SearchError::NoReports);
        }

        if self.params.normalize_community_weight {
            normalize_weights(&mut selected_reports);
        }

        selected_reports.sort_by(compare_reports);

        let batches = self.pack(selected_reports);
        tracing::debug!(
            reports = community_reports.len(),
            batches = batches.len(),
            max_batch_tokens = self.params.max_batch_tokens,
            "Built community context batches"
        );

        Ok(batches)
    }

    fn header(&self) -> String {
        let header = ["id", "title", "summary", "rank", "weight"];
        format!(
            "-----{}-----\n{}\n",
            self.params.context_name,
            header.join(self.params.column_delimiter.as_str())
        )
    }

    fn report_row(&self, report: &CommunityReport, summary: &str) -> String {
        let rank = report.rank.to_string();
        let weight = report.weight.map(|w| format!("{:.3}", w)).unwrap_or_default();
        let context = [report.id.as_str(), report.title.as_str(), summary, rank.as_str(), weight.as_str()];
        context.join(self.params.column_delimiter.as_str()) + "\n"
    }

    fn pack(&self, reports: Vec<CommunityReport>) -> Vec<Batch> {
        let max_tokens = self.params.max_batch_tokens;
        let header = self.header();
        let header_tokens = (self.num_tokens_fn)(&header);

        let mut batches: Vec<Batch> = Vec::new();
        let mut batch_text = header.clone();
        let mut batch_tokens = header_tokens;
        let mut batch_reports: Vec<CommunityReport> = Vec::new();

        let cut_batch = |batches: &mut Vec<Batch>, text: String, tokens: usize, reports: Vec<CommunityReport>| {
            if reports.is_empty() {
                return;
            }
            batches.push(Batch {
                id: batches.len(),
                reports,
                context_text: text,
                token_count: tokens,
                oversized: false,
                truncated: false,
            });
        };

        for report in reports {
            let row = self.report_row(&report, &report.summary_text);
            let row_tokens = (self.num_tokens_fn)(&row);

            if header_tokens + row_tokens > max_tokens {
                cut_batch(
                    &mut batches,
                    std::mem::replace(&mut batch_text, header.clone()),
                    batch_tokens,
                    std::mem::take(&mut batch_reports),
                );
                batch_tokens = header_tokens;

                let oversized = self.oversized_batch(batches.len(), report, &header, header_tokens, row, row_tokens);
                batches.push(oversized);
                continue;
            }

            if batch_tokens + row_tokens > max_tokens {
                cut_batch(
                    &mut batches,
                    std::mem::replace(&mut batch_text, header.clone()),
                    batch_tokens,
                    std::mem::take(&mut batch_reports),
                );
                batch_tokens = header_tokens;
            }

            batch_text.push_str(&row);
            batch_tokens += row_tokens;
            batch_reports.push(report);
        }

        cut_batch(&mut batches, batch_text, batch_tokens, batch_reports);
        batches
    }

    fn oversized_batch(
        &self,
        id: usize,
        mut report: CommunityReport,
        header: &str,
        header_tokens: usize,
        row: String,
        row_tokens: usize,
    ) -> Batch {
        let max_tokens = self.params.max_batch_tokens;

        match self.params.oversized_policy {
            OversizedPolicy::PassThrough => {
                tracing::warn!(
                    report_id = %report.id,
                    tokens = header_tokens + row_tokens,
                    max_tokens,
                    "Community report exceeds the batch budget, sending it alone"
                );
                Batch {
                    id,
                    context_text: format!("{}{}", header, row),
                    token_count: header_tokens + row_tokens,
                    reports: vec![report],
                    oversized: true,
                    truncated: false,
                }
            }
            OversizedPolicy::Truncate => {
                let row_budget = max_tokens.saturating_sub(header_tokens);
                let summary = self.truncate_summary(&report, row_budget);
                let row = self.report_row(&report, &summary);
                let token_count = header_tokens + (self.num_tokens_fn)(&row);

                tracing::warn!(
                    report_id = %report.id,
                    original_chars = report.summary_text.len(),
                    kept_chars = summary.len(),
                    max_tokens,
                    "Truncated community report summary to fit the batch budget"
                );

                report.summary_text = summary;
                Batch {
                    id,
                    context_text: format!("{}{}", header, row),
                    token_count,
                    reports: vec![report],
                    oversized: token_count > max_tokens,
                    truncated: true,
                }
            }
        }
    }

    /// Longest char-boundary prefix of the summary whose row fits `row_budget`.
    fn truncate_summary(&self, report: &CommunityReport, row_budget: usize) -> String {
        let boundaries: Vec<usize> = report
            .summary_text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(report.summary_text.len()))
            .collect();

        let fits = |end: usize| {
            let row = self.report_row(report, &report.summary_text[..end]);
            (self.num_tokens_fn)(&row) <= row_budget
        };

        let (mut lo, mut hi) = (0usize, boundaries.len() - 1);
        if !fits(boundaries[lo]) {
            return String::new();
        }
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if fits(boundaries[mid]) {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        report.summary_text[..boundaries[lo]].to_string()
    }
}

fn has_weight(report: &CommunityReport) -> bool {
    matches!(report.weight, Some(weight) if weight.is_finite() && weight > 0.0)
}

/// Rescales weights to sum to 1.0. Missing weights count as zero and an
/// all-zero set becomes uniform.
pub fn normalize_weights(reports: &mut [CommunityReport]) {
    if reports.is_empty() {
        return;
    }

    let weight_of = |report: &CommunityReport| match report.weight {
        Some(weight) if weight.is_finite() && weight > 0.0 => weight,
        _ => 0.0,
    };
    let total: f64 = reports.iter().map(weight_of).sum();

    if total > 0.0 {
        for report in reports.iter_mut() {
            report.weight = Some(weight_of(report) / total);
        }
    } else {
        let uniform = 1.0 / reports.len() as f64;
        for report in reports.iter_mut() {
            report.weight = Some(uniform);
        }
    }
}

fn compare_reports(a: &CommunityReport, b: &CommunityReport) -> Ordering {
    let weight_a = a.weight.unwrap_or(0.0);
    let weight_b = b.weight.unwrap_or(0.0);

    weight_b
        .partial_cmp(&weight_a)
        .unwrap_or(Ordering::Equal)
        .then(b.rank.cmp(&a.rank))
        .then(a.id.cmp(&b.id))
}
