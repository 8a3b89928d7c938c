use quarry_core::{ChunkingPolicy, Config, FakeProvider, MemoryStore, ObjectStore, RetryPolicy};
use quarry_ops::{default_registry, ServiceContext};
use quarry_rpc::{Access, OperationRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const REGION: &str = "ap-northeast-1";

fn config() -> Config {
    let mut config = Config::default();
    config.embedding.model = "fake-embed".to_string();
    config.chunking = ChunkingPolicy::new(128, 16).unwrap();
    config.retry = RetryPolicy::default().with_initial_delay(Duration::from_millis(1));
    config
}

async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    let docs = [
        ("docs/france.md", "Paris is the capital of France and sits on the Seine."),
        ("docs/japan.md", "Tokyo is the capital of Japan and its largest city."),
        ("docs/bread.md", "Bread is baked from flour, water, yeast and salt."),
    ];
    for (key, text) in docs {
        store.put(key, text.as_bytes().to_vec(), None).await.unwrap();
    }
    store
}

fn registry(store: &MemoryStore, provider: &Arc<FakeProvider>) -> OperationRegistry {
    let context = ServiceContext::new(config())
        .with_bucket("kb", Arc::new(store.clone()))
        .with_provider(REGION, provider.clone());
    default_registry(Arc::new(context), Access::PUBLIC_API_KEY)
}

fn embedding_args() -> Value {
    json!({
        "s3_bucket": "kb",
        "s3_folder_prefix": "docs/",
        "s3_index_key": "indexes/main",
        "bedrock_region": REGION,
        "metadata_key": "indexes/meta.json"
    })
}

fn rag_chat_args(query: &str) -> Value {
    json!({
        "s3_bucket": "kb",
        "s3_index_key": "indexes/main",
        "metadata_key": "indexes/meta.json",
        "query": query
    })
}

async fn call(registry: &OperationRegistry, name: &str, args: Value) -> Value {
    serde_json::to_value(registry.invoke(name, args).await).unwrap()
}

#[tokio::test]
async fn test_embedding_then_rag_chat() {
    let store = seeded_store().await;
    let provider = Arc::new(FakeProvider::new(256).with_answer("Paris."));
    let registry = registry(&store, &provider);

    let built = call(&registry, "embedding", embedding_args()).await;
    assert_eq!(built["ok"], json!(true), "{built}");
    assert_eq!(built["data"]["status"], json!("built"));
    assert_eq!(built["data"]["documents"], json!(3));

    let mut args = rag_chat_args("What is the capital of France?");
    args["top_k"] = json!(1);
    let answered = call(&registry, "ragChat", args).await;
    assert_eq!(answered["ok"], json!(true), "{answered}");
    assert_eq!(
        answered["data"],
        json!({
            "query": "What is the capital of France?",
            "retrieved_doc_keys": ["docs/france.md"],
            "answer": "Paris."
        })
    );
}

#[tokio::test]
async fn test_wrapped_arguments_and_default_top_k() {
    let store = seeded_store().await;
    let provider = Arc::new(FakeProvider::new(256));
    let registry = registry(&store, &provider);

    let built = call(&registry, "embedding", json!({"arguments": embedding_args()})).await;
    assert_eq!(built["ok"], json!(true), "{built}");

    // No top_k: the configured default of 3 covers every document
    let answered = call(&registry, "ragChat", json!({"arguments": rag_chat_args("capital")})).await;
    assert_eq!(answered["data"]["retrieved_doc_keys"].as_array().unwrap().len(), 3);

    // Asking for more than the index holds returns what exists
    let mut args = rag_chat_args("capital");
    args["top_k"] = json!(5);
    let answered = call(&registry, "ragChat", args).await;
    assert_eq!(answered["data"]["retrieved_doc_keys"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_rebuild_is_unchanged() {
    let store = seeded_store().await;
    let provider = Arc::new(FakeProvider::new(256));
    let registry = registry(&store, &provider);

    call(&registry, "embedding", embedding_args()).await;
    let embedded = provider.embedded_texts();
    let again = call(&registry, "embedding", embedding_args()).await;
    assert_eq!(again["data"]["status"], json!("unchanged"));
    assert_eq!(provider.embedded_texts(), embedded);
}

#[tokio::test]
async fn test_concurrent_builds_of_one_index() {
    let store = seeded_store().await;
    let provider = Arc::new(FakeProvider::new(256));
    let registry = registry(&store, &provider);

    let (a, b) = tokio::join!(
        call(&registry, "embedding", embedding_args()),
        call(&registry, "embedding", embedding_args()),
    );
    let mut statuses = vec![a["data"]["status"].clone(), b["data"]["status"].clone()];
    statuses.sort_by_key(|s| s.to_string());
    assert_eq!(statuses, vec![json!("built"), json!("unchanged")]);
}

#[tokio::test]
async fn test_input_validation() {
    let store = seeded_store().await;
    let provider = Arc::new(FakeProvider::new(256));
    let registry = registry(&store, &provider);

    let cases = [
        ("ragChat", json!({"s3_bucket": "kb"})),
        ("ragChat", {
            let mut args = rag_chat_args("q");
            args["top_k"] = json!(0);
            args
        }),
        ("ragChat", {
            let mut args = rag_chat_args("q");
            args["top_k"] = json!(2.5);
            args
        }),
        ("ragChat", rag_chat_args("   ")),
        ("ragChat", {
            let mut args = rag_chat_args("q");
            args["s3_bucket"] = json!("unknown");
            args
        }),
        ("embedding", {
            let mut args = embedding_args();
            args["bedrock_region"] = json!("us-east-1");
            args
        }),
        ("embedding", {
            let mut args = embedding_args();
            args["s3_index_key"] = json!("");
            args
        }),
    ];

    for (name, args) in cases {
        let envelope = call(&registry, name, args.clone()).await;
        assert_eq!(envelope["ok"], json!(false), "{name} {args}");
        assert_eq!(envelope["error"]["code"], json!("INPUT_VALIDATION"), "{name} {args}");
    }
    assert_eq!(provider.embed_calls(), 0);
}

#[tokio::test]
async fn test_missing_index_and_unknown_operation() {
    let store = seeded_store().await;
    let provider = Arc::new(FakeProvider::new(256));
    let registry = registry(&store, &provider);

    let envelope = call(&registry, "ragChat", rag_chat_args("capital")).await;
    assert_eq!(envelope["error"]["code"], json!("INDEX_NOT_FOUND"));

    let envelope = call(&registry, "deleteEverything", json!({})).await;
    assert_eq!(envelope["error"]["code"], json!("UNKNOWN_OPERATION"));
}

#[tokio::test]
async fn test_generation_failure_hides_provider_body() {
    let store = seeded_store().await;
    let provider = Arc::new(FakeProvider::new(256));
    let registry = registry(&store, &provider);
    call(&registry, "embedding", embedding_args()).await;

    provider.fail_next_chats(10);
    let envelope = call(&registry, "ragChat", rag_chat_args("capital")).await;
    assert_eq!(envelope["error"]["code"], json!("GENERATION"));
    let message = envelope["error"]["message"].as_str().unwrap();
    assert!(!message.contains("injected chat failure"));
}

#[tokio::test]
async fn test_deleted_document_degrades_gracefully() {
    let store = seeded_store().await;
    let provider = Arc::new(FakeProvider::new(256));
    let registry = registry(&store, &provider);
    call(&registry, "embedding", embedding_args()).await;

    store.delete("docs/france.md").await.unwrap();
    let envelope = call(&registry, "ragChat", rag_chat_args("capital of France")).await;
    assert_eq!(envelope["ok"], json!(true), "{envelope}");
    let prompt = provider.last_prompt().unwrap();
    assert!(!prompt.contains("Key: docs/france.md"));
}

#[tokio::test]
async fn test_specs_list_both_operations() {
    let store = seeded_store().await;
    let provider = Arc::new(FakeProvider::new(256));
    let registry = registry(&store, &provider);

    assert_eq!(registry.names(), vec!["embedding", "ragChat"]);
    let specs = registry.specs();
    assert!(specs
        .iter()
        .all(|spec| spec["parameters"]["required"].as_array().is_some()));
}
