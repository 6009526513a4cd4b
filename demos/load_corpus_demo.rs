//! Demonstrates loading a document into the shared, ungated corpus and
//! retrieving from it by similarity — the only part of a character's
//! retrieval view that is never subject to temporal, branch, or ownership
//! gating.
//!
//! ```bash
//! cargo run --example load_corpus_demo
//! ```

use std::io::Write;

use phantom_state::config::ChunkGranularity;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("corpus_demo.sqlite");
    let engine = phantom_state::engine::open_for_tests(db_path.to_str().unwrap(), 16).await?;

    let doc_path = dir.path().join("setting.txt");
    let mut file = std::fs::File::create(&doc_path)?;
    writeln!(
        file,
        "The city of Ashreach sits on three rivers. Its oldest quarter is built from black stone. \
         The harbor guild controls trade along the eastern river. Winters here are long and wet."
    )?;
    drop(file);

    let ids = engine
        .load_document(
            doc_path.to_str().unwrap(),
            "setting-bible",
            "world",
            Some("v1"),
            Some(ChunkGranularity::Sentence),
            None,
        )
        .await?;
    println!("loaded {} corpus chunks", ids.len());

    let results = engine
        .query_corpus(Some("who controls trade in the city"), None, None, None, 3)
        .await?;
    for chunk in &results {
        println!("- {}", chunk.content);
    }

    engine.close().await?;
    Ok(())
}
