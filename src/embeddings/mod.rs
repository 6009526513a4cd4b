//! The embedding backend seam and its three implementations.
//!
//! ```text
//!                     ┌──────────────────────┐
//!                     │  EmbeddingBackend     │
//!                     │  (async_trait)        │
//!                     └──────────┬────────────┘
//!                                │
//!          ┌─────────────────────┼─────────────────────┐
//!          │                     │                     │
//!          ▼                     ▼                     ▼
//!   ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!   │    local     │       │  remote_api │       │     mock     │
//!   │  (rust-bert) │       │  (reqwest)  │       │ (deterministic)│
//!   └─────────────┘       └─────────────┘       └─────────────┘
//! ```

pub mod mock;
#[cfg(feature = "embedding-local")]
pub mod local;
pub mod remote;

use async_trait::async_trait;

use crate::error::PhantomError;

/// A source of text embeddings. `embed_batch`'s default forwards to `embed`
/// one call at a time; backends that can batch more efficiently (a local
/// model's forward pass, a remote API's bulk endpoint) should override it.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// The fixed dimensionality of every vector this backend produces.
    fn dimensions(&self) -> usize;

    /// Embed a single piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PhantomError>;

    /// Embed a batch of texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PhantomError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

pub use mock::MockEmbeddingBackend;
#[cfg(feature = "embedding-local")]
pub use local::LocalEmbeddingBackend;
pub use remote::RemoteEmbeddingBackend;
