//! The write surface (`create_*`/`log_*`/`embed_memory`/`dialogue`/`branch`)
//! and the two gated reads (`query_state`, `query_corpus`).
//!
//! Every write validates referential existence before it touches storage;
//! every read composes the take ancestry, temporal, and ownership
//! predicates in `query.rs` before consulting the vector index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_rusqlite::OptionalExtension;
use tracing::{debug, info, instrument, warn};

use crate::codec::{decode_json, encode_json};
use crate::config::{Config, EmbeddingBackendKind};
use crate::embeddings::{EmbeddingBackend, MockEmbeddingBackend, RemoteEmbeddingBackend};
use crate::error::PhantomError;
use crate::models::{
    Character, CharacterState, ChunkType, CorpusChunk, DialogueResult, Fact, KnowledgeEvent,
    Memory, Moment, Take, TakeStatus,
};
use crate::query;
use crate::storage::{MemoryInsert, Storage};

/// The narrative state engine. One instance owns one database connection
/// and one embedding backend; both are shared process-wide for the
/// lifetime of the engine.
#[derive(Clone)]
pub struct Engine {
    storage: Storage,
    embeddings: Arc<dyn EmbeddingBackend>,
    config: Config,
    closed: Arc<AtomicBool>,
}

impl Engine {
    /// Open (and, if needed, initialize) the database named in `config`,
    /// constructing the embedding backend `config.embedding_backend`
    /// selects.
    #[instrument(skip(config))]
    pub async fn open(config: Config) -> Result<Self, PhantomError> {
        let embeddings = build_backend(&config)?;
        Self::open_with_backend(config, embeddings).await
    }

    /// Open with an explicit backend, bypassing `config.embedding_backend`
    /// selection entirely. This is the seam tests use to plug in
    /// [`MockEmbeddingBackend`] instead of a real model or network call.
    pub async fn open_with_backend(
        config: Config,
        embeddings: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self, PhantomError> {
        if embeddings.dimensions() != config.vector_dimensions {
            return Err(reject(PhantomError::DimensionMismatch {
                expected: config.vector_dimensions,
                actual: embeddings.dimensions(),
            }));
        }
        let storage = Storage::open(&config.database_path, config.vector_dimensions).await?;
        info!(path = %config.database_path, "engine opened");
        Ok(Self {
            storage,
            embeddings,
            config,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Release the shared engine handle. Idempotent: a second call is a
    /// no-op rather than an error.
    pub async fn close(&self) -> Result<(), PhantomError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("engine closed");
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---- moments --------------------------------------------------------

    #[instrument(skip(self, label, metadata))]
    pub async fn create_moment(
        &self,
        id: &str,
        sequence: i64,
        label: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), PhantomError> {
        let conn = self.storage.conn();
        let id_owned = id.to_string();
        let exists: Option<String> = conn
            .call(move |conn| {
                conn.query_row("SELECT id FROM moments WHERE id = ?1", [&id_owned], |row| {
                    row.get::<_, String>(0)
                })
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        if exists.is_some() {
            return Err(reject(PhantomError::DuplicateId { id: id.to_string() }));
        }

        let sequence_taken: Option<String> = conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id FROM moments WHERE sequence = ?1",
                    [sequence],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        if sequence_taken.is_some() {
            return Err(reject(PhantomError::DuplicateSequence { sequence }));
        }

        let id = id.to_string();
        let label = label.map(str::to_string);
        let metadata_json = encode_json(&metadata.unwrap_or(serde_json::Value::Null));
        conn.call(move |conn| {
            conn.execute(
                "INSERT INTO moments (id, sequence, label, metadata) VALUES (?1, ?2, ?3, ?4)",
                (&id, sequence, &label, &metadata_json),
            )?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn moment_exists(&self, moment_id: &str) -> Result<bool, PhantomError> {
        let moment_id = moment_id.to_string();
        let found: Option<String> = self
            .storage
            .conn()
            .call(move |conn| {
                conn.query_row("SELECT id FROM moments WHERE id = ?1", [&moment_id], |row| {
                    row.get::<_, String>(0)
                })
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(found.is_some())
    }

    // ---- takes ------------------------------------------------------------

    #[instrument(skip(self, notes))]
    pub async fn create_take(
        &self,
        parent: Option<i64>,
        branch_point: Option<&str>,
        notes: Option<&str>,
    ) -> Result<i64, PhantomError> {
        if let Some(parent_id) = parent {
            if !self.take_exists(parent_id).await? {
                return Err(reject(PhantomError::UnknownTake { id: parent_id }));
            }
        }
        if let Some(moment_id) = branch_point {
            if !self.moment_exists(moment_id).await? {
                return Err(reject(PhantomError::UnknownMoment {
                    id: moment_id.to_string(),
                }));
            }
        }

        let branch_point = branch_point.map(str::to_string);
        let notes = notes.map(str::to_string);
        let created_at = chrono::Utc::now().to_rfc3339();
        let status = TakeStatus::Active.as_str();

        let take_id = self
            .storage
            .conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO takes (parent_take_id, branch_point, created_at, status, notes)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    (&parent, &branch_point, &created_at, status, &notes),
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        debug!(take_id, ?parent, "take created");
        Ok(take_id)
    }

    async fn take_exists(&self, take_id: i64) -> Result<bool, PhantomError> {
        let found: Option<i64> = self
            .storage
            .conn()
            .call(move |conn| {
                conn.query_row("SELECT id FROM takes WHERE id = ?1", [take_id], |row| {
                    row.get::<_, i64>(0)
                })
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(found.is_some())
    }

    pub async fn set_take_status(&self, take_id: i64, status: TakeStatus) -> Result<(), PhantomError> {
        if !self.take_exists(take_id).await? {
            return Err(reject(PhantomError::UnknownTake { id: take_id }));
        }
        let status = status.as_str();
        self.storage
            .conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE takes SET status = ?1 WHERE id = ?2",
                    (status, take_id),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Root-first ancestry of `take_id`.
    pub async fn get_ancestry(&self, take_id: i64) -> Result<Vec<i64>, PhantomError> {
        query::ancestry(self.storage.conn(), take_id).await
    }

    pub async fn list_takes(
        &self,
        status: Option<TakeStatus>,
        branch_point: Option<&str>,
    ) -> Result<Vec<Take>, PhantomError> {
        let status_filter = status.map(TakeStatus::as_str);
        let branch_point = branch_point.map(str::to_string);

        let rows: Vec<(i64, Option<i64>, Option<String>, String, String, Option<String>)> = self
            .storage
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, parent_take_id, branch_point, created_at, status, notes
                     FROM takes
                     WHERE (?1 IS NULL OR status = ?1)
                       AND (?2 IS NULL OR branch_point = ?2)
                     ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map((&status_filter, &branch_point), |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<i64>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, Option<String>>(5)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut takes = Vec::with_capacity(rows.len());
        for (id, parent_take_id, branch_point, created_at, status, notes) in rows {
            let created_at = parse_rfc3339("takes", "created_at", &id.to_string(), &created_at)?;
            takes.push(Take {
                id,
                parent_take_id,
                branch_point,
                created_at,
                status: TakeStatus::parse(&status)?,
                notes,
            });
        }
        Ok(takes)
    }

    /// Convenience wrapper over `create_take` for the common "branch off an
    /// existing take at a moment" case.
    pub async fn branch(
        &self,
        parent_take_id: i64,
        branch_point: &str,
        notes: Option<&str>,
    ) -> Result<i64, PhantomError> {
        self.create_take(Some(parent_take_id), Some(branch_point), notes).await
    }

    // ---- characters -------------------------------------------------------

    #[instrument(skip(self, name, traits, voice))]
    pub async fn register_character(
        &self,
        id: &str,
        name: &str,
        traits: Option<serde_json::Value>,
        voice: Option<serde_json::Value>,
        upsert: bool,
    ) -> Result<(), PhantomError> {
        let traits_json = encode_json(&traits.unwrap_or(serde_json::Value::Null));
        let voice_json = encode_json(&voice.unwrap_or(serde_json::Value::Null));

        match self.get_character(id).await {
            Ok(_) if upsert => {
                let updated = self
                    .storage
                    .update_character(id, name, &traits_json, &voice_json)
                    .await?;
                if !updated {
                    return Err(reject(PhantomError::UnknownCharacter { id: id.to_string() }));
                }
                Ok(())
            }
            Ok(_) => Err(reject(PhantomError::DuplicateId { id: id.to_string() })),
            Err(PhantomError::UnknownCharacter { .. }) => {
                self.storage
                    .provision_character(id, name, &traits_json, &voice_json)
                    .await?;
                debug!(character_id = id, "character registered");
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    pub async fn get_character(&self, id: &str) -> Result<Character, PhantomError> {
        let id_owned = id.to_string();
        let row: Option<(String, String, String, String)> = self
            .storage
            .conn()
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, name, traits, voice FROM characters WHERE id = ?1",
                    [&id_owned],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;

        let (id, name, traits, voice) =
            row.ok_or_else(|| PhantomError::UnknownCharacter { id: id.to_string() })?;
        Ok(Character {
            traits: decode_json(&traits, "characters", "traits", &id)?,
            voice: decode_json(&voice, "characters", "voice", &id)?,
            id,
            name,
        })
    }

    // ---- facts & knowledge --------------------------------------------------

    #[instrument(skip(self, content))]
    pub async fn log_fact(
        &self,
        content: &str,
        category: &str,
        moment_id: &str,
    ) -> Result<i64, PhantomError> {
        if !self.moment_exists(moment_id).await? {
            return Err(reject(PhantomError::UnknownMoment {
                id: moment_id.to_string(),
            }));
        }
        let content = content.to_string();
        let category = category.to_string();
        let moment_id = moment_id.to_string();
        let fact_id = self
            .storage
            .conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO facts (content, category, created_at) VALUES (?1, ?2, ?3)",
                    (&content, &category, &moment_id),
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(fact_id)
    }

    async fn fact_exists(&self, fact_id: i64) -> Result<bool, PhantomError> {
        let found: Option<i64> = self
            .storage
            .conn()
            .call(move |conn| {
                conn.query_row("SELECT id FROM facts WHERE id = ?1", [fact_id], |row| {
                    row.get::<_, i64>(0)
                })
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(found.is_some())
    }

    /// Record that `character_id` learned `fact_id` at `moment_id` in
    /// `take_id`. Idempotent on `(character, fact, take)`: a repeat call
    /// returns the original event id rather than erroring, even if
    /// `source`/`moment_id` differ — first write wins.
    #[instrument(skip(self))]
    pub async fn log_knowledge(
        &self,
        character_id: &str,
        fact_id: i64,
        moment_id: &str,
        take_id: i64,
        source: Option<&str>,
    ) -> Result<i64, PhantomError> {
        self.get_character(character_id).await?;
        if !self.fact_exists(fact_id).await? {
            return Err(reject(PhantomError::UnknownFact { id: fact_id }));
        }
        if !self.moment_exists(moment_id).await? {
            return Err(reject(PhantomError::UnknownMoment {
                id: moment_id.to_string(),
            }));
        }
        if !self.take_exists(take_id).await? {
            return Err(reject(PhantomError::UnknownTake { id: take_id }));
        }

        let character_id_owned = character_id.to_string();
        let existing: Option<i64> = self
            .storage
            .conn()
            .call({
                let character_id = character_id_owned.clone();
                move |conn| {
                    conn.query_row(
                        "SELECT id FROM knowledge_events
                         WHERE character_id = ?1 AND fact_id = ?2 AND take_id = ?3",
                        (&character_id, fact_id, take_id),
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)
                }
            })
            .await?;
        if let Some(event_id) = existing {
            return Ok(event_id);
        }

        let source = source.unwrap_or("witnessed").to_string();
        let moment_id = moment_id.to_string();
        let event_id = self
            .storage
            .conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO knowledge_events (character_id, fact_id, moment_id, take_id, source)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(character_id, fact_id, take_id) DO NOTHING",
                    (&character_id_owned, fact_id, &moment_id, take_id, &source),
                )?;
                conn.query_row(
                    "SELECT id FROM knowledge_events
                     WHERE character_id = ?1 AND fact_id = ?2 AND take_id = ?3",
                    (&character_id_owned, fact_id, take_id),
                    |row| row.get::<_, i64>(0),
                )
            })
            .await?;
        Ok(event_id)
    }

    // ---- memories & dialogue ------------------------------------------------

    /// Embed `chunk` and insert it as a private memory for `character_id`.
    /// Embedding happens before the transaction so a failing provider
    /// leaves no partial row.
    #[instrument(skip(self, chunk, tags))]
    pub async fn embed_memory(
        &self,
        character_id: &str,
        chunk: &str,
        moment_id: &str,
        take_id: i64,
        chunk_type: ChunkType,
        tags: Option<serde_json::Value>,
    ) -> Result<String, PhantomError> {
        self.get_character(character_id).await?;
        if !self.moment_exists(moment_id).await? {
            return Err(reject(PhantomError::UnknownMoment {
                id: moment_id.to_string(),
            }));
        }
        if !self.take_exists(take_id).await? {
            return Err(reject(PhantomError::UnknownTake { id: take_id }));
        }

        let embedding = self.embeddings.embed(chunk).await?;
        if embedding.len() != self.storage.dimensions() {
            return Err(reject(PhantomError::DimensionMismatch {
                expected: self.storage.dimensions(),
                actual: embedding.len(),
            }));
        }

        let table_name = self.storage.ensure_character_vector_table(character_id).await?;
        let id = uuid::Uuid::new_v4().to_string();
        let entry = MemoryInsert {
            id: id.clone(),
            character_id: character_id.to_string(),
            chunk: chunk.to_string(),
            moment_id: moment_id.to_string(),
            take_id,
            chunk_type: chunk_type.as_str(),
            tags_json: encode_json(&tags.unwrap_or(serde_json::Value::Null)),
            table_name,
            embedding,
        };
        self.storage.insert_memories(vec![entry]).await?;
        Ok(id)
    }

    /// Atomic dialogue fan-out: one `said` memory for `speaker`, one
    /// `heard` memory (identical content/moment/take) for each listener.
    /// All inserts commit together or none do. Duplicate listener ids are
    /// de-duplicated, preserving first occurrence; the speaker is never
    /// also treated as their own listener.
    #[instrument(skip(self, content, speaker_tags, listener_tags))]
    pub async fn dialogue(
        &self,
        speaker: &str,
        content: &str,
        moment_id: &str,
        take_id: i64,
        listeners: Option<Vec<String>>,
        speaker_tags: Option<serde_json::Value>,
        listener_tags: Option<serde_json::Value>,
    ) -> Result<DialogueResult, PhantomError> {
        self.get_character(speaker).await?;
        if !self.moment_exists(moment_id).await? {
            return Err(reject(PhantomError::UnknownMoment {
                id: moment_id.to_string(),
            }));
        }
        if !self.take_exists(take_id).await? {
            return Err(reject(PhantomError::UnknownTake { id: take_id }));
        }

        let mut seen = std::collections::HashSet::new();
        seen.insert(speaker.to_string());
        let mut distinct_listeners = Vec::new();
        for listener in listeners.into_iter().flatten() {
            if seen.insert(listener.clone()) {
                distinct_listeners.push(listener);
            }
        }
        for listener in &distinct_listeners {
            self.get_character(listener).await?;
        }

        let embedding = self.embeddings.embed(content).await?;
        if embedding.len() != self.storage.dimensions() {
            return Err(reject(PhantomError::DimensionMismatch {
                expected: self.storage.dimensions(),
                actual: embedding.len(),
            }));
        }

        let speaker_tags_json = encode_json(&speaker_tags.unwrap_or(serde_json::Value::Null));
        let listener_tags_json = encode_json(&listener_tags.unwrap_or(serde_json::Value::Null));

        let speaker_memory_id = uuid::Uuid::new_v4().to_string();
        let speaker_table = self.storage.ensure_character_vector_table(speaker).await?;
        let mut entries = vec![MemoryInsert {
            id: speaker_memory_id.clone(),
            character_id: speaker.to_string(),
            chunk: content.to_string(),
            moment_id: moment_id.to_string(),
            take_id,
            chunk_type: ChunkType::Said.as_str(),
            tags_json: speaker_tags_json,
            table_name: speaker_table,
            embedding: embedding.clone(),
        }];

        let mut listener_memory_ids = Vec::with_capacity(distinct_listeners.len());
        for listener in &distinct_listeners {
            let memory_id = uuid::Uuid::new_v4().to_string();
            let table_name = self.storage.ensure_character_vector_table(listener).await?;
            entries.push(MemoryInsert {
                id: memory_id.clone(),
                character_id: listener.clone(),
                chunk: content.to_string(),
                moment_id: moment_id.to_string(),
                take_id,
                chunk_type: ChunkType::Heard.as_str(),
                tags_json: listener_tags_json.clone(),
                table_name,
                embedding: embedding.clone(),
            });
            listener_memory_ids.push(memory_id);
        }

        self.storage.insert_memories(entries).await?;
        debug!(speaker, listeners = distinct_listeners.len(), "dialogue fanned out");

        Ok(DialogueResult {
            speaker_memory_id,
            listener_memory_ids,
        })
    }

    // ---- corpus -------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, content, metadata))]
    pub async fn load_corpus_chunk(
        &self,
        content: &str,
        source: &str,
        section: Option<&str>,
        category: Option<&str>,
        version: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<String, PhantomError> {
        let embedding = self.embeddings.embed(content).await?;
        if embedding.len() != self.storage.dimensions() {
            return Err(reject(PhantomError::DimensionMismatch {
                expected: self.storage.dimensions(),
                actual: embedding.len(),
            }));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        let metadata_json = encode_json(&metadata.unwrap_or(serde_json::Value::Null));

        self.storage
            .insert_corpus_chunk(
                &id,
                content,
                source,
                section,
                category,
                version,
                &created_at,
                &metadata_json,
                &embedding,
            )
            .await?;
        Ok(id)
    }

    /// Read `path`, split it by `chunker` (or the configured default), embed
    /// and insert every chunk, returning the ids in document order.
    #[instrument(skip(self, chunker, metadata))]
    pub async fn load_document(
        &self,
        path: &str,
        source: &str,
        category: &str,
        version: Option<&str>,
        chunker: Option<crate::config::ChunkGranularity>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Vec<String>, PhantomError> {
        let text = tokio::fs::read_to_string(path).await?;
        let granularity = chunker.unwrap_or(self.config.chunk_granularity);
        let chunks = crate::chunker::split(&text, granularity);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.embeddings.embed_batch(&chunks).await?;
        let metadata_json = encode_json(&metadata.unwrap_or(serde_json::Value::Null));
        let created_at = chrono::Utc::now().to_rfc3339();

        let mut ids = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            if embedding.len() != self.storage.dimensions() {
                return Err(reject(PhantomError::DimensionMismatch {
                    expected: self.storage.dimensions(),
                    actual: embedding.len(),
                }));
            }
            let id = uuid::Uuid::new_v4().to_string();
            self.storage
                .insert_corpus_chunk(
                    &id,
                    chunk,
                    source,
                    None,
                    Some(category),
                    version,
                    &created_at,
                    &metadata_json,
                    embedding,
                )
                .await?;
            ids.push(id);
        }
        Ok(ids)
    }

    pub async fn delete_corpus_version(&self, source: &str, version: &str) -> Result<usize, PhantomError> {
        self.storage.delete_corpus_version(source, version).await
    }

    // ---- reads ----------------------------------------------------------

    /// Everything `character_id` is entitled to retrieve at `moment_id` in
    /// `take_id`: the union of gated facts, gated memories, traits/voice,
    /// and (unless suppressed) the ungated corpus.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, query_text))]
    pub async fn query_state(
        &self,
        character_id: &str,
        moment_id: &str,
        take_id: i64,
        query_text: Option<&str>,
        fact_limit: i64,
        memory_limit: usize,
        include_corpus: bool,
        corpus_limit: usize,
        corpus_category: Option<&str>,
        corpus_version: Option<&str>,
    ) -> Result<CharacterState, PhantomError> {
        let character = self.get_character(character_id).await?;
        let take_ids = query::ancestry(self.storage.conn(), take_id).await?;

        let query_embedding = match query_text {
            Some(text) if !text.is_empty() => Some(self.embeddings.embed(text).await?),
            _ => None,
        };

        let facts = query::gated_facts(
            self.storage.conn(),
            character_id,
            moment_id,
            &take_ids,
            fact_limit,
        )
        .await?;

        let memories = query::gated_memories(
            &self.storage,
            character_id,
            moment_id,
            &take_ids,
            query_embedding.as_deref(),
            memory_limit,
        )
        .await?;

        let corpus = if include_corpus {
            query::query_corpus(
                &self.storage,
                query_embedding.as_deref(),
                corpus_category,
                corpus_version,
                None,
                corpus_limit,
            )
            .await?
        } else {
            Vec::new()
        };

        Ok(CharacterState {
            character_id: character.id,
            traits: character.traits,
            voice: character.voice,
            facts,
            memories,
            corpus,
        })
    }

    /// Shared, ungated corpus lookup. Depends only on `query_text` and the
    /// explicit filters — never on any character, moment, or take.
    pub async fn query_corpus(
        &self,
        query_text: Option<&str>,
        category: Option<&str>,
        version: Option<&str>,
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CorpusChunk>, PhantomError> {
        let query_embedding = match query_text {
            Some(text) if !text.is_empty() => Some(self.embeddings.embed(text).await?),
            _ => None,
        };
        query::query_corpus(
            &self.storage,
            query_embedding.as_deref(),
            category,
            version,
            source,
            limit,
        )
        .await
    }

    pub async fn get_fact(&self, fact_id: i64) -> Result<Fact, PhantomError> {
        let row: Option<(i64, String, String, String)> = self
            .storage
            .conn()
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, content, category, created_at FROM facts WHERE id = ?1",
                    [fact_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        let (id, content, category, created_at) =
            row.ok_or(PhantomError::UnknownFact { id: fact_id })?;
        Ok(Fact {
            id,
            content,
            category,
            created_at,
        })
    }

    pub async fn get_knowledge_event(&self, event_id: i64) -> Result<KnowledgeEvent, PhantomError> {
        let row: Option<(i64, String, i64, String, i64, String)> = self
            .storage
            .conn()
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, character_id, fact_id, moment_id, take_id, source
                     FROM knowledge_events WHERE id = ?1",
                    [event_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        let (id, character_id, fact_id, moment_id, take_id, source) =
            row.ok_or_else(|| PhantomError::StorageError(format!("unknown knowledge event {event_id}")))?;
        Ok(KnowledgeEvent {
            id,
            character_id,
            fact_id,
            moment_id,
            take_id,
            source,
        })
    }

    pub async fn get_moment(&self, id: &str) -> Result<Moment, PhantomError> {
        let id_owned = id.to_string();
        let row: Option<(String, i64, Option<String>, String)> = self
            .storage
            .conn()
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, sequence, label, metadata FROM moments WHERE id = ?1",
                    [&id_owned],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        let (id, sequence, label, metadata) =
            row.ok_or_else(|| PhantomError::UnknownMoment { id: id.to_string() })?;
        Ok(Moment {
            metadata: decode_json(&metadata, "moments", "metadata", &id)?,
            id,
            sequence,
            label,
        })
    }
}

/// Log a validation failure at `warn` before handing it to the caller.
/// Observability only — the engine still never swallows or retries.
fn reject(err: PhantomError) -> PhantomError {
    warn!(kind = err.kind(), %err, "operation rejected");
    err
}

fn build_backend(config: &Config) -> Result<Arc<dyn EmbeddingBackend>, PhantomError> {
    match config.embedding_backend {
        EmbeddingBackendKind::Local => {
            #[cfg(feature = "embedding-local")]
            {
                let backend = crate::embeddings::LocalEmbeddingBackend::load(
                    &config.local_model,
                    config.vector_dimensions,
                )?;
                Ok(Arc::new(backend))
            }
            #[cfg(not(feature = "embedding-local"))]
            {
                Err(reject(PhantomError::EmbeddingUnavailable {
                    message: "local embedding backend requires the 'embedding-local' feature"
                        .to_string(),
                }))
            }
        }
        EmbeddingBackendKind::RemoteApi => {
            let backend = RemoteEmbeddingBackend::new(
                config.remote_endpoint.clone(),
                config.remote_model.clone(),
                config.remote_api_key.clone(),
                config.vector_dimensions,
            )?;
            Ok(Arc::new(backend))
        }
    }
}

/// Build an engine backed by [`MockEmbeddingBackend`] for tests. Not
/// `#[cfg(test)]` so downstream integration tests (`tests/`) can use it too.
pub async fn open_for_tests(database_path: &str, dimensions: usize) -> Result<Engine, PhantomError> {
    let config = Config::builder(database_path)
        .vector_dimensions(dimensions)
        .build();
    let backend: Arc<dyn EmbeddingBackend> = Arc::new(MockEmbeddingBackend::new(dimensions));
    Engine::open_with_backend(config, backend).await
}

fn parse_rfc3339(
    table: &'static str,
    column: &'static str,
    row_id: &str,
    raw: &str,
) -> Result<chrono::DateTime<chrono::Utc>, PhantomError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|err| PhantomError::CorruptRecord {
            table,
            column,
            row_id: row_id.to_string(),
            message: err.to_string(),
        })
}
