//! End-to-end coverage of the bounded-knowledge guarantee, built against
//! [`MockEmbeddingBackend`] so the suite never touches a network or a real
//! model. Deterministic and CI-safe.

use phantom_state::engine::open_for_tests;
use phantom_state::{ChunkType, PhantomError, TakeStatus};

async fn setup() -> (phantom_state::Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("phantom.sqlite");
    let engine = open_for_tests(db_path.to_str().unwrap(), 16).await.unwrap();
    (engine, dir)
}

#[tokio::test]
async fn bounded_knowledge_scenario() {
    let (engine, _dir) = setup().await;

    engine.register_character("a", "Aria", None, None, false).await.unwrap();
    engine.register_character("b", "Bram", None, None, false).await.unwrap();
    engine.create_moment("m1", 1, None, None).await.unwrap();
    let t1 = engine.create_take(None, None, None).await.unwrap();

    let fid = engine
        .log_fact("The treasure is under the oak", "secret", "m1")
        .await
        .unwrap();
    engine.log_knowledge("a", fid, "m1", t1, Some("discovered")).await.unwrap();

    let a_state = engine
        .query_state("a", "m1", t1, None, 50, 20, false, 20, None, None)
        .await
        .unwrap();
    assert_eq!(a_state.facts.iter().map(|f| f.id).collect::<Vec<_>>(), vec![fid]);

    let b_state = engine
        .query_state("b", "m1", t1, None, 50, 20, false, 20, None, None)
        .await
        .unwrap();
    assert!(b_state.facts.is_empty());
}

#[tokio::test]
async fn temporal_monotonicity_scenario() {
    let (engine, _dir) = setup().await;

    engine.register_character("a", "Aria", None, None, false).await.unwrap();
    engine.register_character("b", "Bram", None, None, false).await.unwrap();
    engine.create_moment("m1", 1, None, None).await.unwrap();
    let t1 = engine.create_take(None, None, None).await.unwrap();

    let fid = engine
        .log_fact("The treasure is under the oak", "secret", "m1")
        .await
        .unwrap();
    engine.log_knowledge("a", fid, "m1", t1, Some("discovered")).await.unwrap();

    engine.create_moment("m2", 2, None, None).await.unwrap();

    let a_at_m2 = engine
        .query_state("a", "m2", t1, None, 50, 20, false, 20, None, None)
        .await
        .unwrap();
    assert_eq!(a_at_m2.facts.iter().map(|f| f.id).collect::<Vec<_>>(), vec![fid]);

    let b_at_m2 = engine
        .query_state("b", "m2", t1, None, 50, 20, false, 20, None, None)
        .await
        .unwrap();
    assert!(b_at_m2.facts.is_empty());
}

#[tokio::test]
async fn branch_isolation_scenario() {
    let (engine, _dir) = setup().await;

    engine.register_character("a", "Aria", None, None, false).await.unwrap();
    engine.register_character("b", "Bram", None, None, false).await.unwrap();
    engine.create_moment("m1", 1, None, None).await.unwrap();
    let t1 = engine.create_take(None, None, None).await.unwrap();

    let fid = engine
        .log_fact("The treasure is under the oak", "secret", "m1")
        .await
        .unwrap();
    engine.log_knowledge("a", fid, "m1", t1, Some("discovered")).await.unwrap();

    let t2 = engine.branch(t1, "m1", None).await.unwrap();
    engine.log_knowledge("b", fid, "m1", t2, Some("told")).await.unwrap();

    let b_in_t2 = engine
        .query_state("b", "m1", t2, None, 50, 20, false, 20, None, None)
        .await
        .unwrap();
    assert_eq!(b_in_t2.facts.iter().map(|f| f.id).collect::<Vec<_>>(), vec![fid]);

    let b_in_t1 = engine
        .query_state("b", "m1", t1, None, 50, 20, false, 20, None, None)
        .await
        .unwrap();
    assert!(b_in_t1.facts.is_empty());
}

#[tokio::test]
async fn dialogue_atomicity_scenario() {
    let (engine, _dir) = setup().await;

    engine.register_character("a", "Aria", None, None, false).await.unwrap();
    engine.register_character("b", "Bram", None, None, false).await.unwrap();
    engine.create_moment("m1", 1, None, None).await.unwrap();
    let t1 = engine.create_take(None, None, None).await.unwrap();

    let result = engine
        .dialogue("a", "Hello", "m1", t1, Some(vec!["b".to_string()]), None, None)
        .await
        .unwrap();
    assert_eq!(result.listener_memory_ids.len(), 1);

    let a_state = engine
        .query_state("a", "m1", t1, None, 50, 20, false, 20, None, None)
        .await
        .unwrap();
    let said = a_state
        .memories
        .iter()
        .find(|m| m.id == result.speaker_memory_id)
        .expect("speaker memory present");
    assert_eq!(said.chunk, "Hello");
    assert_eq!(said.chunk_type, ChunkType::Said);

    let b_state = engine
        .query_state("b", "m1", t1, None, 50, 20, false, 20, None, None)
        .await
        .unwrap();
    let heard = b_state
        .memories
        .iter()
        .find(|m| m.id == result.listener_memory_ids[0])
        .expect("listener memory present");
    assert_eq!(heard.chunk, "Hello");
    assert_eq!(heard.chunk_type, ChunkType::Heard);
}

#[tokio::test]
async fn dialogue_deduplicates_listeners_preserving_first_occurrence() {
    let (engine, _dir) = setup().await;

    engine.register_character("a", "Aria", None, None, false).await.unwrap();
    engine.register_character("b", "Bram", None, None, false).await.unwrap();
    engine.create_moment("m1", 1, None, None).await.unwrap();
    let t1 = engine.create_take(None, None, None).await.unwrap();

    let result = engine
        .dialogue(
            "a",
            "Hi",
            "m1",
            t1,
            Some(vec!["b".to_string(), "b".to_string()]),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.listener_memory_ids.len(), 1);
}

#[tokio::test]
async fn dialogue_excludes_speaker_from_listeners_even_if_named() {
    let (engine, _dir) = setup().await;

    engine.register_character("a", "Aria", None, None, false).await.unwrap();
    engine.register_character("b", "Bram", None, None, false).await.unwrap();
    engine.create_moment("m1", 1, None, None).await.unwrap();
    let t1 = engine.create_take(None, None, None).await.unwrap();

    let result = engine
        .dialogue(
            "a",
            "Hi",
            "m1",
            t1,
            Some(vec!["a".to_string(), "b".to_string()]),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.listener_memory_ids.len(), 1, "speaker must not double as a listener");
}

#[tokio::test]
async fn cross_character_isolation_scenario() {
    let (engine, _dir) = setup().await;

    engine.register_character("a", "Aria", None, None, false).await.unwrap();
    engine.register_character("b", "Bram", None, None, false).await.unwrap();
    engine.create_moment("m1", 1, None, None).await.unwrap();
    let t1 = engine.create_take(None, None, None).await.unwrap();

    engine
        .embed_memory("a", "a secret inner thought", "m1", t1, ChunkType::Internal, None)
        .await
        .unwrap();

    let b_state = engine
        .query_state("b", "m1", t1, None, 50, 20, false, 20, None, None)
        .await
        .unwrap();
    assert!(b_state.memories.is_empty());
}

#[tokio::test]
async fn knowledge_idempotence_scenario() {
    let (engine, _dir) = setup().await;

    engine.register_character("a", "Aria", None, None, false).await.unwrap();
    engine.create_moment("m1", 1, None, None).await.unwrap();
    engine.create_moment("m2", 2, None, None).await.unwrap();
    let t1 = engine.create_take(None, None, None).await.unwrap();
    let t2 = engine.branch(t1, "m1", None).await.unwrap();

    let fid = engine.log_fact("The door is locked", "secret", "m1").await.unwrap();

    let first = engine.log_knowledge("a", fid, "m1", t1, Some("witnessed")).await.unwrap();
    let second = engine.log_knowledge("a", fid, "m2", t1, Some("told")).await.unwrap();
    assert_eq!(first, second, "same (character, fact, take) is idempotent");

    let third = engine.log_knowledge("a", fid, "m1", t2, Some("witnessed")).await.unwrap();
    assert_ne!(first, third, "a different take creates a separate event");
}

#[tokio::test]
async fn create_moment_rejects_duplicate_sequence() {
    let (engine, _dir) = setup().await;

    engine.create_moment("m1", 1, None, None).await.unwrap();
    let err = engine.create_moment("x", 1, None, None).await.unwrap_err();
    assert_eq!(err.kind(), "DuplicateSequence");
}

#[tokio::test]
async fn create_moment_rejects_duplicate_id() {
    let (engine, _dir) = setup().await;

    engine.create_moment("m1", 1, None, None).await.unwrap();
    let err = engine.create_moment("m1", 2, None, None).await.unwrap_err();
    assert_eq!(err.kind(), "DuplicateId");
}

#[tokio::test]
async fn dimension_mismatch_rejects_before_any_write() {
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("phantom.sqlite");
    let config = phantom_state::Config::builder(db_path.to_str().unwrap())
        .vector_dimensions(16)
        .build();
    let mismatched_backend: Arc<dyn phantom_state::embeddings::EmbeddingBackend> =
        Arc::new(phantom_state::embeddings::MockEmbeddingBackend::new(32));

    let err = phantom_state::Engine::open_with_backend(config, mismatched_backend)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "DimensionMismatch");
}

#[tokio::test]
async fn corpus_is_ungated_by_character_moment_or_take() {
    let (engine, _dir) = setup().await;

    engine
        .load_corpus_chunk("The ancient map depicts three rivers.", "atlas", None, Some("geo"), None, None)
        .await
        .unwrap();

    let via_corpus_query = engine.query_corpus(None, None, None, None, 20).await.unwrap();
    assert_eq!(via_corpus_query.len(), 1);

    engine.create_moment("m1", 1, None, None).await.unwrap();
    let t1 = engine.create_take(None, None, None).await.unwrap();
    engine.register_character("a", "Aria", None, None, false).await.unwrap();

    let state = engine
        .query_state("a", "m1", t1, None, 50, 20, true, 20, None, None)
        .await
        .unwrap();
    assert_eq!(state.corpus.len(), 1);
    assert_eq!(state.corpus[0].content, via_corpus_query[0].content);
}

#[tokio::test]
async fn unknown_moment_fails_with_stable_kind() {
    let (engine, _dir) = setup().await;
    let t1 = engine.create_take(None, None, None).await.unwrap();
    engine.register_character("a", "Aria", None, None, false).await.unwrap();

    let err = engine
        .query_state("a", "does-not-exist", t1, None, 50, 20, false, 20, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UnknownMoment");
}

#[tokio::test]
async fn register_character_fails_without_upsert() {
    let (engine, _dir) = setup().await;
    engine.register_character("a", "Aria", None, None, false).await.unwrap();
    let err = engine
        .register_character("a", "Aria Renamed", None, None, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "DuplicateId");
}

#[tokio::test]
async fn register_character_upsert_replaces_attributes() {
    let (engine, _dir) = setup().await;
    engine.register_character("a", "Aria", None, None, false).await.unwrap();
    engine
        .register_character("a", "Aria Renamed", Some(serde_json::json!({"brave": true})), None, true)
        .await
        .unwrap();

    let character = engine.get_character("a").await.unwrap();
    assert_eq!(character.name, "Aria Renamed");
    assert_eq!(character.traits, serde_json::json!({"brave": true}));
}

#[tokio::test]
async fn take_status_round_trips() {
    let (engine, _dir) = setup().await;
    let t1 = engine.create_take(None, None, None).await.unwrap();
    engine.set_take_status(t1, TakeStatus::Archived).await.unwrap();

    let takes = engine.list_takes(Some(TakeStatus::Archived), None).await.unwrap();
    assert_eq!(takes.len(), 1);
    assert_eq!(takes[0].id, t1);
}

#[tokio::test]
async fn memory_similarity_ranks_closer_chunks_first() {
    let (engine, _dir) = setup().await;
    engine.register_character("a", "Aria", None, None, false).await.unwrap();
    engine.create_moment("m1", 1, None, None).await.unwrap();
    let t1 = engine.create_take(None, None, None).await.unwrap();

    engine
        .embed_memory("a", "the oak tree in the courtyard", "m1", t1, ChunkType::Perceived, None)
        .await
        .unwrap();
    engine
        .embed_memory("a", "a distant clap of thunder", "m1", t1, ChunkType::Perceived, None)
        .await
        .unwrap();

    let state = engine
        .query_state(
            "a",
            "m1",
            t1,
            Some("the oak tree in the courtyard"),
            50,
            20,
            false,
            20,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(state.memories.len(), 2);
    assert_eq!(state.memories[0].chunk, "the oak tree in the courtyard");
}

#[tokio::test]
async fn embed_memory_rejects_unknown_character() {
    let (engine, _dir) = setup().await;
    engine.create_moment("m1", 1, None, None).await.unwrap();
    let t1 = engine.create_take(None, None, None).await.unwrap();

    let err = engine
        .embed_memory("ghost", "whisper", "m1", t1, ChunkType::Heard, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PhantomError::UnknownCharacter { .. }));
}

#[tokio::test]
async fn delete_corpus_version_removes_only_matching_rows() {
    let (engine, _dir) = setup().await;

    engine
        .load_corpus_chunk("v1 content", "atlas", None, None, Some("v1"), None)
        .await
        .unwrap();
    engine
        .load_corpus_chunk("v2 content", "atlas", None, None, Some("v2"), None)
        .await
        .unwrap();

    let deleted = engine.delete_corpus_version("atlas", "v1").await.unwrap();
    assert_eq!(deleted, 1);

    let remaining = engine.query_corpus(None, None, None, None, 20).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].version.as_deref(), Some("v2"));
}
