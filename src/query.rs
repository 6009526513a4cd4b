//! The gated read layer: take ancestry, temporal cutoff, and ownership,
//! composed ahead of an optional similarity pass.
//!
//! Take ancestry is computed as an iterative parent-chain walk in plain
//! Rust rather than a recursive SQL query, since `tokio_rusqlite`'s
//! connection-actor closures read more plainly as simple queries than as a
//! single recursive CTE. The similarity join (`vec_distance_cosine`) is
//! generalized over whichever table the caller names — a character's
//! private store or the shared corpus store.

use std::collections::HashMap;

use tokio_rusqlite::{Connection, OptionalExtension};

use crate::codec::decode_json;
use crate::error::PhantomError;
use crate::models::{ChunkType, CorpusChunk, Fact, Memory};
use crate::storage::Storage;

/// Root-first ancestry of `take_id`: the take itself plus every ancestor up
/// to the root, via its `parent_take_id` chain. Bounded by the number of
/// takes in the database so a corrupted cycle can't loop forever.
pub async fn ancestry(conn: &Connection, take_id: i64) -> Result<Vec<i64>, PhantomError> {
    let edges: Vec<(i64, Option<i64>)> = conn
        .call(|conn| {
            let mut stmt = conn.prepare("SELECT id, parent_take_id FROM takes")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;

    let parents: HashMap<i64, Option<i64>> = edges.into_iter().collect();
    if !parents.contains_key(&take_id) {
        return Err(PhantomError::UnknownTake { id: take_id });
    }

    let bound = parents.len();
    let mut chain = Vec::new();
    let mut current = Some(take_id);
    while let Some(id) = current {
        if chain.len() > bound {
            break;
        }
        chain.push(id);
        current = parents.get(&id).copied().flatten();
    }
    chain.reverse();
    Ok(chain)
}

/// The `moments.sequence` value for `moment_id`, or `UnknownMoment`.
pub async fn moment_sequence(conn: &Connection, moment_id: &str) -> Result<i64, PhantomError> {
    let owned_moment_id = moment_id.to_string();
    let sequence = conn
        .call(move |conn| {
            conn.query_row(
                "SELECT sequence FROM moments WHERE id = ?1",
                [&owned_moment_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await?;
    sequence.ok_or_else(|| PhantomError::UnknownMoment {
        id: moment_id.to_string(),
    })
}

fn take_id_list(take_ids: &[i64]) -> String {
    take_ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
}

/// Facts `character_id` has come to know as of `target_moment_id`, within
/// `take_ids` (the requested take's ancestry), chronological by the moment
/// at which the knowledge was first recorded.
pub async fn gated_facts(
    conn: &Connection,
    character_id: &str,
    target_moment_id: &str,
    take_ids: &[i64],
    limit: i64,
) -> Result<Vec<Fact>, PhantomError> {
    let target_sequence = moment_sequence(conn, target_moment_id).await?;
    let character_id = character_id.to_string();
    let take_id_list = take_id_list(take_ids);

    let rows = conn
        .call(move |conn| {
            let sql = format!(
                "SELECT f.id, f.content, f.category, f.created_at, MIN(m.sequence) AS eff_seq
                 FROM facts f
                 JOIN knowledge_events ke ON ke.fact_id = f.id
                 JOIN moments m ON m.id = ke.moment_id
                 WHERE ke.character_id = ?1
                   AND ke.take_id IN ({take_id_list})
                   AND m.sequence <= ?2
                 GROUP BY f.id
                 ORDER BY eff_seq ASC, f.id ASC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((&character_id, target_sequence, limit), |row| {
                    Ok(Fact {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        category: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;
    Ok(rows)
}

struct MemoryCandidate {
    memory: Memory,
    rowid: i64,
    sequence: i64,
}

async fn gated_memory_candidates(
    conn: &Connection,
    character_id: &str,
    target_sequence: i64,
    take_ids: &[i64],
) -> Result<Vec<MemoryCandidate>, PhantomError> {
    let character_id_owned = character_id.to_string();
    let take_id_list = take_id_list(take_ids);

    let rows: Vec<(String, String, String, i64, String, String, i64, i64)> = conn
        .call(move |conn| {
            let sql = format!(
                "SELECT mm.id, mm.chunk, mm.moment_id, mm.take_id, mm.chunk_type, mm.tags,
                        mm.rowid, m.sequence
                 FROM memory_metadata mm
                 JOIN moments m ON m.id = mm.moment_id
                 WHERE mm.character_id = ?1
                   AND mm.take_id IN ({take_id_list})
                   AND m.sequence <= ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((&character_id_owned, target_sequence), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;

    let character_id = character_id.to_string();
    let mut candidates = Vec::with_capacity(rows.len());
    for (id, chunk, moment_id, take_id, chunk_type, tags, rowid, sequence) in rows {
        let tags = decode_json(&tags, "memory_metadata", "tags", &id)?;
        candidates.push(MemoryCandidate {
            memory: Memory {
                id: id.clone(),
                character_id: character_id.clone(),
                chunk,
                moment_id,
                take_id,
                chunk_type: ChunkType::parse(&chunk_type)?,
                tags,
                distance: None,
            },
            rowid,
            sequence,
        });
    }
    Ok(candidates)
}

/// Gated memories for `character_id` as of `target_moment_id`. When
/// `query_embedding` is supplied, ranks by cosine distance within the gated
/// candidate set; otherwise returns chronological order.
pub async fn gated_memories(
    storage: &Storage,
    character_id: &str,
    target_moment_id: &str,
    take_ids: &[i64],
    query_embedding: Option<&[f32]>,
    limit: usize,
) -> Result<Vec<Memory>, PhantomError> {
    let target_sequence = moment_sequence(storage.conn(), target_moment_id).await?;
    let candidates =
        gated_memory_candidates(storage.conn(), character_id, target_sequence, take_ids).await?;

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    match query_embedding {
        Some(embedding) => {
            let table_name = storage.ensure_character_vector_table(character_id).await?;
            let rowids: Vec<i64> = candidates.iter().map(|c| c.rowid).collect();
            let ranked = storage
                .nearest_neighbors(&table_name, embedding, &rowids, limit)
                .await?;
            let mut by_rowid: HashMap<i64, Memory> =
                candidates.into_iter().map(|c| (c.rowid, c.memory)).collect();
            let mut result = Vec::with_capacity(ranked.len());
            for (rowid, distance) in ranked {
                if let Some(mut memory) = by_rowid.remove(&rowid) {
                    memory.distance = Some(distance);
                    result.push(memory);
                }
            }
            Ok(result)
        }
        None => {
            let mut candidates = candidates;
            candidates.sort_by(|a, b| a.sequence.cmp(&b.sequence).then(a.memory.id.cmp(&b.memory.id)));
            Ok(candidates.into_iter().take(limit).map(|c| c.memory).collect())
        }
    }
}

struct CorpusCandidate {
    chunk: CorpusChunk,
    rowid: i64,
}

async fn corpus_candidates(
    conn: &Connection,
    category: Option<&str>,
    version: Option<&str>,
    source: Option<&str>,
) -> Result<Vec<CorpusCandidate>, PhantomError> {
    let category = category.map(str::to_string);
    let version = version.map(str::to_string);
    let source = source.map(str::to_string);

    let rows: Vec<(String, String, String, Option<String>, Option<String>, Option<String>, String, String, i64)> =
        conn.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content, source, section, category, version, created_at, metadata, rowid
                 FROM corpus
                 WHERE (?1 IS NULL OR category = ?1)
                   AND (?2 IS NULL OR version = ?2)
                   AND (?3 IS NULL OR source = ?3)",
            )?;
            let rows = stmt
                .query_map((&category, &version, &source), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, i64>(8)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;

    let mut candidates = Vec::with_capacity(rows.len());
    for (id, content, source, section, category, version, created_at, metadata, rowid) in rows {
        let metadata = decode_json(&metadata, "corpus", "metadata", &id)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|err| PhantomError::CorruptRecord {
                table: "corpus",
                column: "created_at",
                row_id: id.clone(),
                message: err.to_string(),
            })?;
        candidates.push(CorpusCandidate {
            chunk: CorpusChunk {
                id,
                content,
                source,
                section,
                category,
                version,
                created_at,
                metadata,
                distance: None,
            },
            rowid,
        });
    }
    Ok(candidates)
}

/// Shared, ungated corpus lookup. Depends only on the filters passed in —
/// never on a character, moment, or take.
pub async fn query_corpus(
    storage: &Storage,
    query_embedding: Option<&[f32]>,
    category: Option<&str>,
    version: Option<&str>,
    source: Option<&str>,
    limit: usize,
) -> Result<Vec<CorpusChunk>, PhantomError> {
    let candidates = corpus_candidates(storage.conn(), category, version, source).await?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    match query_embedding {
        Some(embedding) => {
            let rowids: Vec<i64> = candidates.iter().map(|c| c.rowid).collect();
            let ranked = storage
                .nearest_neighbors(crate::storage::corpus_vector_table(), embedding, &rowids, limit)
                .await?;
            let mut by_rowid: HashMap<i64, CorpusChunk> =
                candidates.into_iter().map(|c| (c.rowid, c.chunk)).collect();
            let mut result = Vec::with_capacity(ranked.len());
            for (rowid, distance) in ranked {
                if let Some(mut chunk) = by_rowid.remove(&rowid) {
                    chunk.distance = Some(distance);
                    result.push(chunk);
                }
            }
            Ok(result)
        }
        None => {
            let mut candidates = candidates;
            candidates.sort_by(|a, b| {
                b.chunk.created_at.cmp(&a.chunk.created_at).then(a.chunk.id.cmp(&b.chunk.id))
            });
            Ok(candidates.into_iter().take(limit).map(|c| c.chunk).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_id_list_formats_as_comma_separated_literals() {
        assert_eq!(take_id_list(&[1, 2, 3]), "1,2,3");
        assert_eq!(take_id_list(&[7]), "7");
    }
}
