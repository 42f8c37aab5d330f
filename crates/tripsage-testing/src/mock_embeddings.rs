//! Deterministic embeddings for tests

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tripsage_core::{Embeddings, Result};

/// Hash-derived embeddings: identical text always embeds identically, and
/// distinct texts are very unlikely to collide. Optionally fails on demand to
/// exercise embedding-failure paths.
#[derive(Clone)]
pub struct MockEmbeddings {
    dimension: usize,
    fail_next: Arc<Mutex<bool>>,
    calls: Arc<Mutex<usize>>,
}

impl Default for MockEmbeddings {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail_next: Arc::new(Mutex::new(false)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Fail the next embed call with `PROVIDER_UNAVAILABLE`.
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        // Stretch the 32 digest bytes across the requested dimension.
        let digest = Sha256::digest(text.as_bytes());
        let mut vector = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            let byte = digest[i % digest.len()];
            let mixed = byte.wrapping_add((i / digest.len()) as u8);
            vector.push(f32::from(mixed) / 255.0 - 0.5);
        }
        vector
    }
}

#[async_trait]
impl Embeddings for MockEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        {
            let mut fail = self.fail_next.lock().unwrap_or_else(|e| e.into_inner());
            if *fail {
                *fail = false;
                return Err(tripsage_core::Error::ProviderUnavailable(
                    "mock embeddings offline".into(),
                ));
            }
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_id(&self) -> &str {
        "mock-embed-1"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripsage_core::cosine_similarity;

    #[tokio::test]
    async fn test_identical_text_identical_vector() {
        let embeddings = MockEmbeddings::default();
        let vectors = embeddings
            .embed_documents(&["hello".into(), "hello".into(), "world".into()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vectors[1]);
        assert!(cosine_similarity(&vectors[0], &vectors[2]) < 0.999);
    }

    #[tokio::test]
    async fn test_dimension_respected() {
        let embeddings = MockEmbeddings::new(16);
        let vector = embeddings.embed_query("x").await.unwrap();
        assert_eq!(vector.len(), 16);
    }

    #[tokio::test]
    async fn test_fail_next() {
        let embeddings = MockEmbeddings::default();
        embeddings.fail_next();
        assert!(embeddings.embed_documents(&["a".into()]).await.is_err());
        assert!(embeddings.embed_documents(&["a".into()]).await.is_ok());
    }
}
