//! A deterministic, test-only embedding backend.
//!
//! No model weights, no network. Determinism comes from hashing the input
//! text into a seed and expanding it into a unit vector, so the same text
//! always embeds to the same vector and distinct texts embed to visibly
//! distinct vectors — enough to exercise similarity ranking in tests
//! without pulling in a real model.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::PhantomError;

use super::EmbeddingBackend;

/// Deterministic hash-based embedding backend for tests.
#[derive(Clone, Copy, Debug)]
pub struct MockEmbeddingBackend {
    dimensions: usize,
}

impl MockEmbeddingBackend {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbeddingBackend {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PhantomError> {
        let mut seed = DefaultHasher::new();
        text.hash(&mut seed);
        let mut state = seed.finish();

        let mut vector = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            // xorshift64 keeps each component decorrelated from the last
            // without re-hashing the whole text every iteration.
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let component = (state as f64 / u64::MAX as f64) as f32 * 2.0 - 1.0;
            vector.push(component);
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for component in &mut vector {
                *component /= norm;
            }
        }

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_embeds_identically() {
        let backend = MockEmbeddingBackend::new(16);
        let a = backend.embed("hello world").await.unwrap();
        let b = backend.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn different_text_embeds_differently() {
        let backend = MockEmbeddingBackend::new(16);
        let a = backend.embed("hello world").await.unwrap();
        let b = backend.embed("goodbye world").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn respects_configured_dimensions() {
        let backend = MockEmbeddingBackend::new(64);
        let vector = backend.embed("anything").await.unwrap();
        assert_eq!(vector.len(), 64);
        assert_eq!(backend.dimensions(), 64);
    }

    #[tokio::test]
    async fn embed_batch_preserves_order() {
        let backend = MockEmbeddingBackend::new(8);
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let batch = backend.embed_batch(&texts).await.unwrap();
        for (text, vector) in texts.iter().zip(batch.iter()) {
            assert_eq!(&backend.embed(text).await.unwrap(), vector);
        }
    }
}
