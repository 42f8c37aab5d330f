//! Embedding model abstraction

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Fixed output dimension for turn embeddings.
pub const EMBEDDING_DIMENSION: usize = 1536;

/// Text embedding provider.
#[async_trait]
pub trait Embeddings: Send + Sync {
    /// Embed a batch of documents. Output order matches input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| crate::error::Error::internal("embedding batch returned empty"))
    }

    /// Model identifier recorded alongside stored embeddings.
    fn model_id(&self) -> &str;

    /// Output vector dimension.
    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

/// Shared handle to an embedding provider.
pub type EmbeddingsHandle = Arc<dyn Embeddings>;

/// Cosine similarity between two vectors of equal dimension.
///
/// Returns 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
