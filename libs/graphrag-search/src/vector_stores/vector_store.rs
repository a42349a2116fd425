use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorStoreSearchResult {
    pub id: String,
    pub score: f64,
}

/// Similarity lookup over an embedded collection (entities or community
/// reports). Embedding the query is the implementor's concern.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn similarity_search_by_text(&self, text: &str, k: usize) -> anyhow::Result<Vec<VectorStoreSearchResult>>;
}
