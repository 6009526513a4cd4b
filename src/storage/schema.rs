//! `sqlite-vec` extension registration and schema application.
//!
//! Registration is `Once`-guarded: the extension's entry point is transmuted
//! into an `unsafe extern "C"` function pointer and handed to
//! `ffi::sqlite3_auto_extension` exactly once per process, with the outcome
//! cached behind a `Mutex` so every caller after the first sees the same
//! result without re-registering.

use std::mem::transmute;
use std::os::raw::c_char;
use std::sync::{Mutex, Once};

use tokio_rusqlite::{ffi, Connection, OptionalExtension};

use crate::error::PhantomError;

/// The dimensionality `engine_meta` pins the first time a database is
/// opened; every vector table created afterward must agree with it.
pub const ENGINE_META_KEY_VECTOR_DIMENSIONS: &str = "vector_dimensions";

pub fn register_sqlite_vec() -> Result<(), PhantomError> {
    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

    INIT.call_once(|| {
        let result = unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != ffi::SQLITE_OK {
                Err(format!("failed to register sqlite-vec extension (code {rc})"))
            } else {
                Ok(())
            }
        };
        *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
    });

    INIT_RESULT
        .lock()
        .expect("init result mutex poisoned")
        .clone()
        .expect("init was called but result not set")
        .map_err(PhantomError::StorageError)
}

/// Create every table this engine needs if it doesn't already exist. Safe to
/// call on every open — the DDL is all `IF NOT EXISTS`.
pub async fn apply_schema(conn: &Connection) -> Result<(), PhantomError> {
    conn.call(|conn| {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS engine_meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS moments (
                id       TEXT PRIMARY KEY,
                sequence INTEGER NOT NULL UNIQUE,
                label    TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS takes (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_take_id INTEGER REFERENCES takes(id),
                branch_point   TEXT REFERENCES moments(id),
                created_at     TEXT NOT NULL,
                status         TEXT NOT NULL,
                notes          TEXT
            );

            CREATE TABLE IF NOT EXISTS characters (
                id     TEXT PRIMARY KEY,
                name   TEXT NOT NULL,
                traits TEXT NOT NULL DEFAULT '{}',
                voice  TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS character_vector_stores (
                character_id TEXT PRIMARY KEY REFERENCES characters(id),
                table_name   TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS facts (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                content    TEXT NOT NULL,
                category   TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS knowledge_events (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                character_id TEXT NOT NULL REFERENCES characters(id),
                fact_id      INTEGER NOT NULL REFERENCES facts(id),
                moment_id    TEXT NOT NULL REFERENCES moments(id),
                take_id      INTEGER NOT NULL REFERENCES takes(id),
                source       TEXT NOT NULL,
                UNIQUE(character_id, fact_id, take_id)
            );

            CREATE INDEX IF NOT EXISTS idx_takes_parent
                ON takes(parent_take_id);

            CREATE INDEX IF NOT EXISTS idx_takes_status
                ON takes(status);

            CREATE INDEX IF NOT EXISTS idx_knowledge_events_character
                ON knowledge_events(character_id);

            CREATE INDEX IF NOT EXISTS idx_knowledge_events_take
                ON knowledge_events(take_id);

            CREATE TABLE IF NOT EXISTS memory_metadata (
                id           TEXT PRIMARY KEY,
                character_id TEXT NOT NULL REFERENCES characters(id),
                chunk        TEXT NOT NULL,
                moment_id    TEXT NOT NULL REFERENCES moments(id),
                take_id      INTEGER NOT NULL REFERENCES takes(id),
                chunk_type   TEXT NOT NULL,
                tags         TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_memories_character_moment_take_type
                ON memory_metadata(character_id, moment_id, take_id, chunk_type);

            CREATE TABLE IF NOT EXISTS corpus (
                id         TEXT PRIMARY KEY,
                content    TEXT NOT NULL,
                source     TEXT NOT NULL,
                section    TEXT,
                category   TEXT,
                version    TEXT,
                created_at TEXT NOT NULL,
                metadata   TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_corpus_source_category_version
                ON corpus(source, category, version);
            ",
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}

/// Read a pinned value out of `engine_meta`, if set.
pub async fn read_meta(conn: &Connection, key: &'static str) -> Result<Option<String>, PhantomError> {
    let value = conn
        .call(move |conn| {
            conn.query_row(
                "SELECT value FROM engine_meta WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await?;
    Ok(value)
}

/// Pin a value in `engine_meta`, failing if it's already set to something
/// different. Used to lock in `vector_dimensions` on first use.
pub async fn write_meta_once(
    conn: &Connection,
    key: &'static str,
    value: String,
) -> Result<(), PhantomError> {
    conn.call(move |conn| {
        conn.execute(
            "INSERT INTO engine_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO NOTHING",
            (key, value),
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}
