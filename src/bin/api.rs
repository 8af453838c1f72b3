use banking_support_agent::{
    api::start_server,
    dispatcher::FunctionDispatcher,
    knowledge::KnowledgeStore,
    retrieval::{EmbeddingBackend, HttpEmbeddingBackend, OfflineEmbedder, RetrievalService},
    support::SupportService,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Banking Support Agent - API Server");
    info!("Port: {}", api_port);

    // Create components
    let store = Arc::new(KnowledgeStore::load_bundled()?);
    info!(documents = store.len(), "Knowledge base loaded");

    let backend: Arc<dyn EmbeddingBackend> = match HttpEmbeddingBackend::from_env() {
        Some(http) => Arc::new(http),
        None => {
            eprintln!("EMBEDDING_API_BASE_URL not set in .env; using offline embedder");
            Arc::new(OfflineEmbedder::new())
        }
    };

    let retrieval = Arc::new(RetrievalService::new(store, backend));
    let support = Arc::new(SupportService::new(retrieval));
    let dispatcher = Arc::new(FunctionDispatcher::new(support));
    dispatcher.initialize().await?;

    info!("Dispatcher initialized");
    info!("Starting API server...");

    // Start API server
    start_server(dispatcher, api_port).await?;

    Ok(())
}
