//! The SQLite-backed storage substrate: connection lifecycle, schema
//! application, and the per-character/per-corpus `vec0` vector tables.
//!
//! Each registered character gets its own dynamically-created `vec0` table
//! rather than sharing one static table, so a character's memories are only
//! ever reachable through that character's own handle.

pub mod schema;

use tokio_rusqlite::{Connection, OptionalExtension};

use crate::codec::{decode_vector, encode_vector};
use crate::error::PhantomError;

const CORPUS_VECTOR_TABLE: &str = "corpus_vec";

/// Owns the single [`Connection`] this engine operates on and the
/// dimensionality pinned for it.
#[derive(Clone)]
pub struct Storage {
    conn: Connection,
    dimensions: usize,
}

impl Storage {
    /// Open (and, if needed, initialize) the database at `path`, pinning
    /// `dimensions` as the vector width for every table this engine creates.
    /// Reopening an existing database with a different `dimensions` value
    /// fails with [`PhantomError::DimensionMismatch`].
    pub async fn open(path: &str, dimensions: usize) -> Result<Self, PhantomError> {
        schema::register_sqlite_vec()?;
        let conn = Connection::open(path).await?;

        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await?;

        schema::apply_schema(&conn).await?;

        let pinned = schema::read_meta(&conn, schema::ENGINE_META_KEY_VECTOR_DIMENSIONS).await?;
        match pinned {
            Some(value) => {
                let pinned_dimensions: usize = value.parse().map_err(|_| PhantomError::CorruptRecord {
                    table: "engine_meta",
                    column: "value",
                    row_id: schema::ENGINE_META_KEY_VECTOR_DIMENSIONS.to_string(),
                    message: format!("'{value}' is not a valid dimension count"),
                })?;
                if pinned_dimensions != dimensions {
                    return Err(PhantomError::DimensionMismatch {
                        expected: pinned_dimensions,
                        actual: dimensions,
                    });
                }
            }
            None => {
                schema::write_meta_once(
                    &conn,
                    schema::ENGINE_META_KEY_VECTOR_DIMENSIONS,
                    dimensions.to_string(),
                )
                .await?;
            }
        }

        let storage = Self { conn, dimensions };
        storage.ensure_corpus_vector_table().await?;
        Ok(storage)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn ensure_corpus_vector_table(&self) -> Result<(), PhantomError> {
        let dimensions = self.dimensions;
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "CREATE VIRTUAL TABLE IF NOT EXISTS {CORPUS_VECTOR_TABLE} USING vec0(embedding float[{dimensions}])"
                    ),
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Get the `vec0` table name backing `character_id`'s private store,
    /// creating it (and a row in `character_vector_stores`) on first use.
    /// The table name is a surrogate derived from SQLite's own
    /// autoincrementing rowid, never the caller-supplied id, so it's always
    /// a safe SQL identifier to interpolate.
    pub async fn ensure_character_vector_table(
        &self,
        character_id: &str,
    ) -> Result<String, PhantomError> {
        let dimensions = self.dimensions;
        let character_id = character_id.to_string();

        self.conn
            .call(move |conn| {
                if let Some(existing) = conn
                    .query_row(
                        "SELECT table_name FROM character_vector_stores WHERE character_id = ?1",
                        [&character_id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?
                {
                    return Ok(existing);
                }

                conn.execute(
                    "INSERT INTO character_vector_stores (character_id, table_name) VALUES (?1, '')",
                    [&character_id],
                )?;
                let rowid = conn.last_insert_rowid();
                let table_name = format!("mem_vec_{rowid}");

                conn.execute(
                    "UPDATE character_vector_stores SET table_name = ?1 WHERE character_id = ?2",
                    (&table_name, &character_id),
                )?;
                conn.execute(
                    &format!(
                        "CREATE VIRTUAL TABLE \"{table_name}\" USING vec0(embedding float[{dimensions}])"
                    ),
                    [],
                )?;

                Ok(table_name)
            })
            .await
            .map_err(PhantomError::from)
    }

    /// Insert or replace the embedding for the row at `rowid` in
    /// `table_name` (a character's private table, or [`CORPUS_VECTOR_TABLE`]).
    pub async fn upsert_embedding(
        &self,
        table_name: &str,
        rowid: i64,
        embedding: &[f32],
    ) -> Result<(), PhantomError> {
        if embedding.len() != self.dimensions {
            return Err(PhantomError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        let encoded = encode_vector(embedding)?;
        let table_name = table_name.to_string();

        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO \"{table_name}\" (rowid, embedding) VALUES (?1, vec_f32(?2))
                         ON CONFLICT(rowid) DO UPDATE SET embedding = vec_f32(?2)"
                    ),
                    (rowid, &encoded),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// The rowid SQLite assigned to the most recently inserted row, for
    /// callers that need to link a freshly-inserted memory/corpus chunk row
    /// to its vector table entry.
    pub async fn last_insert_rowid(&self) -> Result<i64, PhantomError> {
        Ok(self.conn.call(|conn| Ok(conn.last_insert_rowid())).await?)
    }

    /// Nearest neighbors of `embedding` in `table_name`, restricted to the
    /// rowids in `candidate_rowids` (the gating predicates already applied
    /// at the SQL level by the caller), ordered by ascending cosine
    /// distance with ties broken by ascending rowid for a stable order.
    /// Returns `(rowid, distance)` pairs — smaller distance is more similar.
    pub async fn nearest_neighbors(
        &self,
        table_name: &str,
        embedding: &[f32],
        candidate_rowids: &[i64],
        top_k: usize,
    ) -> Result<Vec<(i64, f32)>, PhantomError> {
        if candidate_rowids.is_empty() {
            return Ok(Vec::new());
        }
        let encoded = encode_vector(embedding)?;
        let table_name = table_name.to_string();
        let candidate_rowids = candidate_rowids.to_vec();

        let rows = self
            .conn
            .call(move |conn| {
                // candidate_rowids come from our own gated query, never from
                // caller-supplied text, so inlining them as a literal list is
                // safe and sidesteps a variable-arity bind.
                let rowid_list = candidate_rowids
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                let sql = format!(
                    "SELECT rowid, vec_distance_cosine(embedding, vec_f32(?1)) AS distance
                     FROM \"{table_name}\"
                     WHERE rowid IN ({rowid_list})
                     ORDER BY distance ASC, rowid ASC
                     LIMIT {top_k}"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([&encoded], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, f32>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows)
    }

    /// Decode the raw JSON-array vector stored for `rowid` in `table_name`,
    /// if present. Used by tests and diagnostics, not the gated read path.
    pub async fn read_embedding(
        &self,
        table_name: &str,
        rowid: i64,
    ) -> Result<Option<Vec<f32>>, PhantomError> {
        let table_name = table_name.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT vec_to_json(embedding) FROM \"{table_name}\" WHERE rowid = ?1"),
                    [rowid],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        raw.map(|raw| decode_vector(&raw)).transpose()
    }
}

pub const fn corpus_vector_table() -> &'static str {
    CORPUS_VECTOR_TABLE
}

/// One memory row to insert alongside its vector, bound for a specific
/// character's private table. Used both by `embed_memory` (a vec of one)
/// and `dialogue`'s fan-out (a vec of speaker + listeners), so that both
/// go through [`Storage::insert_memories`]'s single transaction.
pub struct MemoryInsert {
    pub id: String,
    pub character_id: String,
    pub chunk: String,
    pub moment_id: String,
    pub take_id: i64,
    pub chunk_type: &'static str,
    pub tags_json: String,
    pub table_name: String,
    pub embedding: Vec<f32>,
}

impl Storage {
    /// Insert `characters` + `character_vector_stores` row + the matching
    /// `vec0` table in one transaction, so a crash between the two never
    /// leaves a character without a private store. Engine callers are
    /// expected to have already checked the id is free; a race loses to
    /// SQLite's own constraint and surfaces as `StorageError`.
    pub async fn provision_character(
        &self,
        id: &str,
        name: &str,
        traits_json: &str,
        voice_json: &str,
    ) -> Result<(), PhantomError> {
        let dimensions = self.dimensions;
        let id = id.to_string();
        let name = name.to_string();
        let traits_json = traits_json.to_string();
        let voice_json = voice_json.to_string();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO characters (id, name, traits, voice) VALUES (?1, ?2, ?3, ?4)",
                    (&id, &name, &traits_json, &voice_json),
                )?;
                tx.execute(
                    "INSERT INTO character_vector_stores (character_id, table_name) VALUES (?1, '')",
                    [&id],
                )?;
                let rowid = tx.last_insert_rowid();
                let table_name = format!("mem_vec_{rowid}");
                tx.execute(
                    "UPDATE character_vector_stores SET table_name = ?1 WHERE character_id = ?2",
                    (&table_name, &id),
                )?;
                tx.execute(
                    &format!(
                        "CREATE VIRTUAL TABLE \"{table_name}\" USING vec0(embedding float[{dimensions}])"
                    ),
                    [],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Replace `name`/`traits`/`voice` for an existing character, leaving
    /// its private vector store untouched. Returns `false` if no row
    /// matched (the caller translates that to `UnknownCharacter`).
    pub async fn update_character(
        &self,
        id: &str,
        name: &str,
        traits_json: &str,
        voice_json: &str,
    ) -> Result<bool, PhantomError> {
        let id = id.to_string();
        let name = name.to_string();
        let traits_json = traits_json.to_string();
        let voice_json = voice_json.to_string();

        let updated = self
            .conn
            .call(move |conn| {
                let rows = conn.execute(
                    "UPDATE characters SET name = ?1, traits = ?2, voice = ?3 WHERE id = ?4",
                    (&name, &traits_json, &voice_json, &id),
                )?;
                Ok(rows)
            })
            .await?;
        Ok(updated > 0)
    }

    /// Insert every row in `entries` plus its embedding atomically: either
    /// the whole fan-out (speaker + all listeners) lands, or none of it
    /// does. Each entry's embedding must already be computed — the backend
    /// is never called from inside this transaction.
    pub async fn insert_memories(&self, entries: Vec<MemoryInsert>) -> Result<(), PhantomError> {
        for entry in &entries {
            if entry.embedding.len() != self.dimensions {
                return Err(PhantomError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: entry.embedding.len(),
                });
            }
        }
        let encoded = entries
            .iter()
            .map(|entry| encode_vector(&entry.embedding))
            .collect::<Result<Vec<_>, _>>()?;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (entry, encoded) in entries.iter().zip(encoded.iter()) {
                    tx.execute(
                        "INSERT INTO memory_metadata
                            (id, character_id, chunk, moment_id, take_id, chunk_type, tags)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        (
                            &entry.id,
                            &entry.character_id,
                            &entry.chunk,
                            &entry.moment_id,
                            entry.take_id,
                            entry.chunk_type,
                            &entry.tags_json,
                        ),
                    )?;
                    let rowid = tx.last_insert_rowid();
                    tx.execute(
                        &format!(
                            "INSERT INTO \"{}\" (rowid, embedding) VALUES (?1, vec_f32(?2))",
                            entry.table_name
                        ),
                        (rowid, encoded),
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert a corpus chunk plus its embedding atomically.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_corpus_chunk(
        &self,
        id: &str,
        content: &str,
        source: &str,
        section: Option<&str>,
        category: Option<&str>,
        version: Option<&str>,
        created_at: &str,
        metadata_json: &str,
        embedding: &[f32],
    ) -> Result<(), PhantomError> {
        if embedding.len() != self.dimensions {
            return Err(PhantomError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        let encoded = encode_vector(embedding)?;
        let id = id.to_string();
        let content = content.to_string();
        let source = source.to_string();
        let section = section.map(str::to_string);
        let category = category.map(str::to_string);
        let version = version.map(str::to_string);
        let created_at = created_at.to_string();
        let metadata_json = metadata_json.to_string();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO corpus
                        (id, content, source, section, category, version, created_at, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    (
                        &id,
                        &content,
                        &source,
                        &section,
                        &category,
                        &version,
                        &created_at,
                        &metadata_json,
                    ),
                )?;
                let rowid = tx.last_insert_rowid();
                tx.execute(
                    &format!(
                        "INSERT INTO {CORPUS_VECTOR_TABLE} (rowid, embedding) VALUES (?1, vec_f32(?2))"
                    ),
                    (rowid, &encoded),
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Delete every corpus chunk (and its vector row) for `(source,
    /// version)`, returning the number of chunks removed. The only delete
    /// path the core exposes.
    pub async fn delete_corpus_version(
        &self,
        source: &str,
        version: &str,
    ) -> Result<usize, PhantomError> {
        let source = source.to_string();
        let version = version.to_string();

        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let rowids: Vec<i64> = {
                    let mut stmt = tx.prepare(
                        "SELECT rowid FROM corpus WHERE source = ?1 AND version = ?2",
                    )?;
                    stmt.query_map((&source, &version), |row| row.get::<_, i64>(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                };
                for rowid in &rowids {
                    tx.execute(
                        &format!("DELETE FROM {CORPUS_VECTOR_TABLE} WHERE rowid = ?1"),
                        [rowid],
                    )?;
                }
                let deleted = tx.execute(
                    "DELETE FROM corpus WHERE source = ?1 AND version = ?2",
                    (&source, &version),
                )?;
                tx.commit()?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }
}
