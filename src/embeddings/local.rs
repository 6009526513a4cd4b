//! An in-process embedding backend using a local sentence-embedding model.
//!
//! Gated behind the `embedding-local` feature since `rust-bert` pulls in a
//! sizeable native dependency. Model inference is blocking CPU work, so it
//! runs on `tokio::task::spawn_blocking` rather than tying up the async
//! runtime's worker threads.

use std::sync::Arc;

use async_trait::async_trait;
use rust_bert::pipelines::sentence_embeddings::{
    SentenceEmbeddingsBuilder, SentenceEmbeddingsModel, SentenceEmbeddingsModelType,
};
use tokio::sync::Mutex;

use crate::error::PhantomError;

use super::EmbeddingBackend;

/// Embedding backend backed by a `rust-bert` sentence-embeddings model
/// loaded once at construction and reused for every call.
pub struct LocalEmbeddingBackend {
    model: Arc<Mutex<SentenceEmbeddingsModel>>,
    dimensions: usize,
}

impl LocalEmbeddingBackend {
    /// Load `model_name` (an `all-MiniLM-L6-v2`-style identifier) onto the
    /// current device. This downloads model weights on first use and blocks
    /// the calling thread, so callers should construct it from a
    /// `spawn_blocking` context if they're already inside an async runtime.
    pub fn load(model_name: &str, dimensions: usize) -> Result<Self, PhantomError> {
        let model_type = parse_model_type(model_name)?;
        let model = SentenceEmbeddingsBuilder::remote(model_type)
            .create_model()
            .map_err(|err| PhantomError::EmbeddingUnavailable {
                message: format!("failed to load local model '{model_name}': {err}"),
            })?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dimensions,
        })
    }
}

fn parse_model_type(model_name: &str) -> Result<SentenceEmbeddingsModelType, PhantomError> {
    match model_name {
        "all-MiniLM-L6-v2" => Ok(SentenceEmbeddingsModelType::AllMiniLmL6V2),
        "all-MiniLM-L12-v2" => Ok(SentenceEmbeddingsModelType::AllMiniLmL12V2),
        "all-distilroberta-v1" => Ok(SentenceEmbeddingsModelType::AllDistilrobertaV1),
        other => Err(PhantomError::InvalidEnum {
            field: "local_model",
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl EmbeddingBackend for LocalEmbeddingBackend {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PhantomError> {
        let batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        batch.into_iter().next().ok_or_else(|| PhantomError::EmbeddingUnavailable {
            message: "local backend returned no embeddings".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PhantomError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model.clone();
        let owned_texts = texts.to_vec();
        let expected = self.dimensions;

        tokio::task::spawn_blocking(move || {
            let model = model.blocking_lock();
            let borrowed: Vec<&str> = owned_texts.iter().map(String::as_str).collect();
            let embeddings = model
                .encode(&borrowed)
                .map_err(|err| PhantomError::EmbeddingUnavailable {
                    message: format!("local embedding inference failed: {err}"),
                })?;
            for embedding in &embeddings {
                if embedding.len() != expected {
                    return Err(PhantomError::DimensionMismatch {
                        expected,
                        actual: embedding.len(),
                    });
                }
            }
            Ok(embeddings)
        })
        .await
        .map_err(|err| PhantomError::EmbeddingUnavailable {
            message: format!("local embedding task panicked: {err}"),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_model_name_before_touching_the_filesystem() {
        let err = parse_model_type("not-a-real-model").unwrap_err();
        assert_eq!(err.kind(), "InvalidEnum");
    }
}
