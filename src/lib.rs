//! ```text
//! Engine API (engine.rs) ─┬─► Storage substrate (storage/) ──► sqlite-vec / SQLite file
//!                         ├─► Embedding backend (embeddings/) ──► local model / remote API
//!                         └─► Query layer (query.rs) ──► take ancestry + temporal + ownership + similarity
//!
//! Every write goes through engine.rs, which validates referential existence
//! (models.rs, error.rs) before handing rows to storage/. Every read goes
//! through query.rs, which composes the take ancestry, temporal, and
//! ownership gating predicates before optionally consulting the vector index.
//! ```
//!
//! Phantom State guarantees, by construction, that a character's retrieval
//! view (`query_state`) contains only the facts and memories that character
//! has actually come to know, in the take and at the moment being queried.
//! The guarantee is structural: nothing in this crate reaches past the
//! gating predicates to hand back ungated rows, so there is no prompt to get
//! wrong.

pub mod chunker;
pub mod codec;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod models;
pub mod query;
pub mod storage;

pub use config::{Config, ConfigBuilder, EmbeddingBackendKind};
pub use engine::Engine;
pub use error::PhantomError;
pub use models::{
    Character, CharacterState, ChunkType, CorpusChunk, DialogueResult, Fact, KnowledgeEvent,
    Memory, Moment, Take, TakeStatus,
};
