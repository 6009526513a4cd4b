//! Process-wide configuration and the `.env`/environment loading it's built
//! from.
//!
//! Fields resolve through a `dotenvy::dotenv().ok()` + `std::env::var` +
//! hardcoded-default chain, exposed through `#[must_use]` builder methods
//! rather than a derive macro so callers can override a subset of fields
//! without reconstructing the whole thing.

use crate::error::PhantomError;

/// Which embedding backend an [`crate::Engine`] should construct on open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingBackendKind {
    Local,
    RemoteApi,
}

impl EmbeddingBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddingBackendKind::Local => "local",
            EmbeddingBackendKind::RemoteApi => "remote-api",
        }
    }

    pub fn parse(value: &str) -> Result<Self, PhantomError> {
        match value {
            "local" => Ok(EmbeddingBackendKind::Local),
            "remote-api" => Ok(EmbeddingBackendKind::RemoteApi),
            other => Err(PhantomError::InvalidEnum {
                field: "embedding_backend",
                value: other.to_string(),
            }),
        }
    }
}

/// Default granularity `load_document` splits by when the caller doesn't
/// override it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkGranularity {
    Sentence,
    Paragraph,
    Page,
    Manual,
}

impl ChunkGranularity {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkGranularity::Sentence => "sentence",
            ChunkGranularity::Paragraph => "paragraph",
            ChunkGranularity::Page => "page",
            ChunkGranularity::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Result<Self, PhantomError> {
        match value {
            "sentence" => Ok(ChunkGranularity::Sentence),
            "paragraph" => Ok(ChunkGranularity::Paragraph),
            "page" => Ok(ChunkGranularity::Page),
            "manual" => Ok(ChunkGranularity::Manual),
            other => Err(PhantomError::InvalidEnum {
                field: "chunk_granularity",
                value: other.to_string(),
            }),
        }
    }
}

/// Process-wide configuration pinned at [`crate::Engine::open`].
#[derive(Clone, Debug)]
pub struct Config {
    pub database_path: String,
    pub embedding_backend: EmbeddingBackendKind,
    pub local_model: String,
    pub remote_model: String,
    pub remote_endpoint: String,
    pub remote_api_key: Option<String>,
    pub chunk_granularity: ChunkGranularity,
    pub vector_dimensions: usize,
}

impl Config {
    /// Start a builder requiring only the database path.
    pub fn builder(database_path: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(database_path)
    }

    /// Build a [`Config`] from environment variables (loading a `.env` file
    /// first, if present), falling back to hardcoded defaults for anything
    /// not set. `PHANTOM_STATE_DB_PATH` is required.
    pub fn from_env() -> Result<Self, PhantomError> {
        dotenvy::dotenv().ok();

        let database_path = std::env::var("PHANTOM_STATE_DB_PATH")
            .map_err(|_| PhantomError::StorageError(
                "PHANTOM_STATE_DB_PATH is not set".to_string(),
            ))?;

        let mut builder = ConfigBuilder::new(database_path);

        if let Ok(backend) = std::env::var("PHANTOM_STATE_EMBEDDING_BACKEND") {
            builder = builder.embedding_backend(EmbeddingBackendKind::parse(&backend)?);
        }
        if let Ok(model) = std::env::var("PHANTOM_STATE_LOCAL_MODEL") {
            builder = builder.local_model(model);
        }
        if let Ok(model) = std::env::var("PHANTOM_STATE_REMOTE_MODEL") {
            builder = builder.remote_model(model);
        }
        if let Ok(endpoint) = std::env::var("PHANTOM_STATE_REMOTE_ENDPOINT") {
            builder = builder.remote_endpoint(endpoint);
        }
        if let Ok(key) = std::env::var("PHANTOM_STATE_REMOTE_API_KEY") {
            builder = builder.remote_api_key(key);
        }
        if let Ok(granularity) = std::env::var("PHANTOM_STATE_CHUNK_GRANULARITY") {
            builder = builder.chunk_granularity(ChunkGranularity::parse(&granularity)?);
        }
        if let Ok(dims) = std::env::var("PHANTOM_STATE_VECTOR_DIMENSIONS") {
            let dims: usize = dims.parse().map_err(|_| PhantomError::InvalidEnum {
                field: "vector_dimensions",
                value: dims,
            })?;
            builder = builder.vector_dimensions(dims);
        }

        Ok(builder.build())
    }
}

/// Builder for [`Config`]. Every field besides `database_path` defaults to a
/// value suitable for local development and tests.
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    database_path: String,
    embedding_backend: EmbeddingBackendKind,
    local_model: String,
    remote_model: String,
    remote_endpoint: String,
    remote_api_key: Option<String>,
    chunk_granularity: ChunkGranularity,
    vector_dimensions: usize,
}

impl ConfigBuilder {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            embedding_backend: EmbeddingBackendKind::Local,
            local_model: "all-MiniLM-L6-v2".to_string(),
            remote_model: "text-embedding-3-small".to_string(),
            remote_endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            remote_api_key: None,
            chunk_granularity: ChunkGranularity::Sentence,
            vector_dimensions: 384,
        }
    }

    #[must_use]
    pub fn embedding_backend(mut self, backend: EmbeddingBackendKind) -> Self {
        self.embedding_backend = backend;
        self
    }

    #[must_use]
    pub fn local_model(mut self, model: impl Into<String>) -> Self {
        self.local_model = model.into();
        self
    }

    #[must_use]
    pub fn remote_model(mut self, model: impl Into<String>) -> Self {
        self.remote_model = model.into();
        self
    }

    #[must_use]
    pub fn remote_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.remote_endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn remote_api_key(mut self, key: impl Into<String>) -> Self {
        self.remote_api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn chunk_granularity(mut self, granularity: ChunkGranularity) -> Self {
        self.chunk_granularity = granularity;
        self
    }

    #[must_use]
    pub fn vector_dimensions(mut self, dimensions: usize) -> Self {
        self.vector_dimensions = dimensions;
        self
    }

    pub fn build(self) -> Config {
        Config {
            database_path: self.database_path,
            embedding_backend: self.embedding_backend,
            local_model: self.local_model,
            remote_model: self.remote_model,
            remote_endpoint: self.remote_endpoint,
            remote_api_key: self.remote_api_key,
            chunk_granularity: self.chunk_granularity,
            vector_dimensions: self.vector_dimensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = Config::builder("test.sqlite").build();
        assert_eq!(config.database_path, "test.sqlite");
        assert_eq!(config.embedding_backend, EmbeddingBackendKind::Local);
        assert_eq!(config.vector_dimensions, 384);
    }

    #[test]
    fn builder_overrides() {
        let config = Config::builder("test.sqlite")
            .embedding_backend(EmbeddingBackendKind::RemoteApi)
            .vector_dimensions(1536)
            .build();
        assert_eq!(config.embedding_backend, EmbeddingBackendKind::RemoteApi);
        assert_eq!(config.vector_dimensions, 1536);
    }

    #[test]
    fn embedding_backend_kind_parse_rejects_unknown() {
        assert!(EmbeddingBackendKind::parse("carrier-pigeon").is_err());
        assert_eq!(
            EmbeddingBackendKind::parse("local").unwrap(),
            EmbeddingBackendKind::Local
        );
    }

    #[test]
    fn chunk_granularity_round_trips() {
        for g in [
            ChunkGranularity::Sentence,
            ChunkGranularity::Paragraph,
            ChunkGranularity::Page,
            ChunkGranularity::Manual,
        ] {
            assert_eq!(ChunkGranularity::parse(g.as_str()).unwrap().as_str(), g.as_str());
        }
    }
}
