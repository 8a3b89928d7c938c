//! Index a local folder and ask one question about it.
//!
//! ```text
//! cargo run -p quarry-core --example local_rag -- ./notes "What did we decide?"
//! ```
//!
//! Needs an Ollama server at the default region's endpoint with the
//! configured embedding and generation models pulled.

use quarry_core::{
    BuildRequest, Config, FsStore, IndexBuilder, ObjectStore, OllamaProvider, Provider,
    QueryRequest, RagEngine,
};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quarry_core=info".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(root), Some(question)) = (args.next(), args.next()) else {
        eprintln!("usage: local_rag <folder> <question>");
        return;
    };

    let config = Config::load_or_default();
    let region = &config.provider.default_region;
    let provider: Arc<dyn Provider> = match OllamaProvider::for_region(&config.provider, region) {
        Some(Ok(p)) => Arc::new(p),
        Some(Err(e)) => {
            eprintln!("Failed to create provider: {}", e);
            return;
        }
        None => {
            eprintln!("No endpoint configured for region {}", region);
            return;
        }
    };
    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(&root));

    // Documents live at the bucket root; the index goes under .quarry/
    let request = BuildRequest::new("", ".quarry/index", ".quarry/metadata.json");
    let builder = IndexBuilder::new(store.clone(), provider.clone(), &config);
    match builder.build(&request).await {
        Ok(report) => println!(
            "Indexed {} documents ({} chunks embedded, {} reused)",
            report.documents, report.embedded, report.reused
        ),
        Err(e) => {
            eprintln!("Build failed: {}", e);
            eprintln!("\nTroubleshooting:");
            eprintln!("  1. Is Ollama running? (ollama serve)");
            eprintln!("  2. Is the model pulled? (ollama pull {})", config.embedding.model);
            return;
        }
    }

    let engine = RagEngine::new(store, provider, &config);
    let query = QueryRequest::new(
        &request.index_key,
        &request.metadata_key,
        question,
        config.query.default_top_k,
    );
    match engine.answer(&query).await {
        Ok(result) => {
            println!("\nSources:");
            for key in &result.retrieved_doc_keys {
                println!("  - {}", key);
            }
            println!("\n{}", result.answer);
        }
        Err(e) => eprintln!("Query failed at {}: {}", e.stage, e.source),
    }
}
