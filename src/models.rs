//! Typed records for every entity in the data model.

use serde::{Deserialize, Serialize};

use crate::error::PhantomError;

/// A sequenced temporal marker. Immutable after creation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Moment {
    pub id: String,
    pub sequence: i64,
    pub label: Option<String>,
    pub metadata: serde_json::Value,
}

/// Status of a [`Take`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TakeStatus {
    Active,
    Archived,
    Trunk,
}

impl TakeStatus {
    pub const ALL: [TakeStatus; 3] = [TakeStatus::Active, TakeStatus::Archived, TakeStatus::Trunk];

    pub fn as_str(self) -> &'static str {
        match self {
            TakeStatus::Active => "active",
            TakeStatus::Archived => "archived",
            TakeStatus::Trunk => "trunk",
        }
    }

    pub fn parse(value: &str) -> Result<Self, PhantomError> {
        match value {
            "active" => Ok(TakeStatus::Active),
            "archived" => Ok(TakeStatus::Archived),
            "trunk" => Ok(TakeStatus::Trunk),
            other => Err(PhantomError::InvalidEnum {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// A branch of narrative state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Take {
    pub id: i64,
    pub parent_take_id: Option<i64>,
    pub branch_point: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub status: TakeStatus,
    pub notes: Option<String>,
}

/// A persistent agent with a private experiential-memory store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Character {
    pub id: String,
    pub name: String,
    pub traits: serde_json::Value,
    pub voice: serde_json::Value,
}

/// A world truth, independent of any observer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fact {
    pub id: i64,
    pub content: String,
    pub category: String,
    pub created_at: String,
}

/// How a character came to know a fact.
///
/// `witnessed`/`told`/`inferred`/`discovered` are the well-known tags; any
/// other caller-supplied string is accepted (the glossary calls this out
/// explicitly — `source` is not a closed enum like [`TakeStatus`] or
/// [`ChunkType`]).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnowledgeEvent {
    pub id: i64,
    pub character_id: String,
    pub fact_id: i64,
    pub moment_id: String,
    pub take_id: i64,
    pub source: String,
}

/// The role an experiential memory plays for its owning character.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Said,
    Heard,
    Internal,
    Perceived,
    Action,
}

impl ChunkType {
    pub const ALL: [ChunkType; 5] = [
        ChunkType::Said,
        ChunkType::Heard,
        ChunkType::Internal,
        ChunkType::Perceived,
        ChunkType::Action,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkType::Said => "said",
            ChunkType::Heard => "heard",
            ChunkType::Internal => "internal",
            ChunkType::Perceived => "perceived",
            ChunkType::Action => "action",
        }
    }

    pub fn parse(value: &str) -> Result<Self, PhantomError> {
        match value {
            "said" => Ok(ChunkType::Said),
            "heard" => Ok(ChunkType::Heard),
            "internal" => Ok(ChunkType::Internal),
            "perceived" => Ok(ChunkType::Perceived),
            "action" => Ok(ChunkType::Action),
            other => Err(PhantomError::InvalidEnum {
                field: "chunk_type",
                value: other.to_string(),
            }),
        }
    }
}

/// A retrievable chunk private to one character.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    pub id: String,
    pub character_id: String,
    pub chunk: String,
    pub moment_id: String,
    pub take_id: i64,
    pub chunk_type: ChunkType,
    pub tags: serde_json::Value,
    /// Present only on rows returned from a similarity query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

/// Shared, ungated reference text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CorpusChunk {
    pub id: String,
    pub content: String,
    pub source: String,
    pub section: Option<String>,
    pub category: Option<String>,
    pub version: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

/// Result of [`crate::Engine::query_state`]: everything a character is
/// entitled to retrieve at a given moment in a given take.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CharacterState {
    pub character_id: String,
    pub traits: serde_json::Value,
    pub voice: serde_json::Value,
    pub facts: Vec<Fact>,
    pub memories: Vec<Memory>,
    pub corpus: Vec<CorpusChunk>,
}

/// Result of [`crate::Engine::dialogue`]: the ids of every memory row the
/// fan-out created.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DialogueResult {
    pub speaker_memory_id: String,
    pub listener_memory_ids: Vec<String>,
}
