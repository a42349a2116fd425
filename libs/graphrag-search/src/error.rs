use thiserror::Error;

use crate::search::router::SearchMode;

#[derive(Error, Debug, PartialEq)]
pub enum SearchError {
    #[error("Community weights are not set for reports: {}", .0.join(", "))]
    WeightsNotSet(Vec<String>),
    #[error("Invalid search mode '{0}', expected one of: local, global, drift, auto")]
    InvalidMode(String),
    #[error("Invalid search options: {0}")]
    InvalidConfig(String),
    #[error("No community reports left after filtering")]
    NoReports,
    #[error("All {0} map batches failed")]
    AllBatchesFailed(usize),
    #[error("Reduce LLM call failed: {0}")]
    ReduceLlm(String),
    #[error("Local search LLM call failed: {0}")]
    LocalLlm(String),
    #[error("Vector index lookup failed: {0}")]
    VectorIndex(String),
    #[error("{mode} search failed: {source}")]
    Strategy {
        mode: SearchMode,
        #[source]
        source: Box<SearchError>,
    },
}

impl SearchError {
    pub fn in_mode(self, mode: SearchMode) -> Self {
        match self {
            SearchError::Strategy { .. } => self,
            other => SearchError::Strategy {
                mode,
                source: Box::new(other),
            },
        }
    }

    /// Errors raised before any LLM cost is incurred.
    pub fn is_pre_flight(&self) -> bool {
        matches!(
            self,
            SearchError::WeightsNotSet(_) | SearchError::InvalidMode(_) | SearchError::InvalidConfig(_)
        )
    }
}

/// Failure reported by a `Completer`. Anything that is not an `LLMError` is
/// treated as transient by the retry helper.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LLMError {
    #[error("Transient LLM failure: {0}")]
    Transient(String),
    #[error("Permanent LLM failure: {0}")]
    Permanent(String),
}
