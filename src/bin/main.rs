use banking_support_agent::{
    dispatcher::FunctionDispatcher,
    knowledge::KnowledgeStore,
    models::ToolCall,
    retrieval::{EmbeddingBackend, HttpEmbeddingBackend, OfflineEmbedder, RetrievalService},
    session::{LoopbackTransport, NullAudio, SessionController, TokioClock},
    support::SupportService,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    info!("Banking Support Agent starting");

    // Create components
    let store = Arc::new(KnowledgeStore::load_bundled()?);
    info!(documents = store.len(), "Knowledge base loaded");

    let backend: Arc<dyn EmbeddingBackend> = match HttpEmbeddingBackend::from_env() {
        Some(http) => Arc::new(http),
        None => {
            eprintln!("EMBEDDING_API_BASE_URL not set; using offline embedder");
            Arc::new(OfflineEmbedder::new())
        }
    };

    let retrieval = Arc::new(RetrievalService::new(store, backend));
    let support = Arc::new(SupportService::new(retrieval));
    let dispatcher = Arc::new(FunctionDispatcher::new(support));
    dispatcher.initialize().await?;

    // Bring up a local session against the loopback transport
    let mut session = SessionController::new(
        dispatcher,
        Arc::new(LoopbackTransport::new()),
        Arc::new(NullAudio),
        Arc::new(TokioClock),
    );
    session.connect().await?;
    info!(state = %session.state(), "Session established");

    // Run a sample tool-call batch
    let calls = vec![
        ToolCall {
            id: "demo-1".to_string(),
            name: "search_knowledge".to_string(),
            args: json!({ "query": "personal loan interest rates" }),
        },
        ToolCall {
            id: "demo-2".to_string(),
            name: "calculate_emi".to_string(),
            args: json!({
                "loan_amount": 1_000_000,
                "annual_rate_percent": 12.5,
                "tenure_months": 60
            }),
        },
        ToolCall {
            id: "demo-3".to_string(),
            name: "get_exchange_rates".to_string(),
            args: json!({ "currency": "USD" }),
        },
    ];

    let responses = session.handle_tool_call(calls).await?;

    println!("\n=== TOOL RESPONSES ===");
    for response in &responses {
        println!("\n[{}] {}", response.id, response.name);
        println!("{}", serde_json::to_string_pretty(&response.response)?);
    }

    session.disconnect().await;
    info!("Session closed");

    Ok(())
}
