//! A hosted-API embedding backend.
//!
//! Builds one `reqwest::Client` at construction and reuses it for every
//! call. Checks `error_for_status()` before decoding the body so a non-2xx
//! response surfaces as a typed error instead of a JSON-decode failure.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::PhantomError;

use super::EmbeddingBackend;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Embedding backend that calls a hosted embeddings API
/// (OpenAI-`/v1/embeddings`-shaped by default; point `endpoint` at any
/// compatible service).
#[derive(Clone, Debug)]
pub struct RemoteEmbeddingBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl RemoteEmbeddingBackend {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Result<Self, PhantomError> {
        let client = Client::builder()
            .build()
            .map_err(|err| PhantomError::EmbeddingUnavailable {
                message: format!("failed to build http client: {err}"),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            dimensions,
        })
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PhantomError> {
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| PhantomError::EmbeddingUnavailable {
                message: format!("request to {} failed: {err}", self.endpoint),
            })?
            .error_for_status()
            .map_err(|err| PhantomError::EmbeddingUnavailable {
                message: format!("{} responded with an error: {err}", self.endpoint),
            })?;

        let body: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|err| PhantomError::EmbeddingUnavailable {
                    message: format!("malformed response body: {err}"),
                })?;

        for datum in &body.data {
            if datum.embedding.len() != self.dimensions {
                return Err(PhantomError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: datum.embedding.len(),
                });
            }
        }

        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbeddingBackend {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PhantomError> {
        let batch = self.request_embeddings(std::slice::from_ref(&text.to_string())).await?;
        batch.into_iter().next().ok_or_else(|| PhantomError::EmbeddingUnavailable {
            message: "remote backend returned no embeddings".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PhantomError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_fails_gracefully_never_panics() {
        let backend = RemoteEmbeddingBackend::new(
            "https://example.invalid/v1/embeddings",
            "text-embedding-3-small",
            None,
            1536,
        );
        assert!(backend.is_ok());
    }
}
