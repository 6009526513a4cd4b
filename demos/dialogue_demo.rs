//! Demonstrates the dialogue fan-out primitive and the bounded-knowledge
//! guarantee it feeds: one spoken line becomes a `said` memory for its
//! speaker and a `heard` memory for each listener, and a character who
//! wasn't present never sees it.
//!
//! ```bash
//! cargo run --example dialogue_demo
//! ```

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("dialogue_demo.sqlite");
    let engine = phantom_state::engine::open_for_tests(db_path.to_str().unwrap(), 16).await?;

    engine
        .register_character("aria", "Aria", Some(serde_json::json!({"cautious": true})), None, false)
        .await?;
    engine.register_character("bram", "Bram", None, None, false).await?;
    engine.register_character("cael", "Cael", None, None, false).await?;

    engine.create_moment("m1", 1, Some("the tavern"), None).await?;
    let trunk = engine.create_take(None, None, Some("trunk")).await?;

    let result = engine
        .dialogue(
            "aria",
            "The cellar key is under the third floorboard.",
            "m1",
            trunk,
            Some(vec!["bram".to_string()]),
            None,
            None,
        )
        .await?;

    println!("speaker memory: {}", result.speaker_memory_id);
    println!("listener memories: {:?}", result.listener_memory_ids);

    let bram_state = engine
        .query_state("bram", "m1", trunk, None, 50, 20, false, 20, None, None)
        .await?;
    println!("bram heard {} memories", bram_state.memories.len());

    let cael_state = engine
        .query_state("cael", "m1", trunk, None, 50, 20, false, 20, None, None)
        .await?;
    println!(
        "cael (never present) heard {} memories — the cellar key stays secret",
        cael_state.memories.len()
    );

    engine.close().await?;
    Ok(())
}
