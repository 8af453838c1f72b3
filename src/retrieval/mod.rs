//! Retrieval service
//!
//! Ranked similarity search over the knowledge store. One retrieval
//! strategy only: cosine similarity over vectors from a hosted embedding
//! endpoint, computed client-side. The backend is a trait so tests can
//! inject a deterministic embedder.

use crate::error::SupportError;
use crate::knowledge::KnowledgeStore;
use crate::models::{Document, SearchOutcome};
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Trait for the embedding backend (HTTP in production, mock in tests)
#[async_trait::async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// HTTP embedding backend (connection-pooled, long-lived client)
pub struct HttpEmbeddingBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEmbeddingBackend {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Build from EMBEDDING_API_BASE_URL / EMBEDDING_API_KEY. Returns None
    /// when no backend is configured.
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("EMBEDDING_API_BASE_URL").ok()?;
        let api_key = env::var("EMBEDDING_API_KEY").ok();
        Some(Self::new(base_url, api_key))
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embed", self.base_url);

        let mut request = self.client.post(&url).json(&EmbedRequest { text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            SupportError::BackendUnavailable(format!("embedding request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SupportError::BackendUnavailable(format!(
                "embedding backend returned {}",
                status
            )));
        }

        let body: EmbedResponse = response.json().await.map_err(|e| {
            SupportError::BackendUnavailable(format!("malformed embedding response: {}", e))
        })?;

        Ok(body.embedding)
    }
}

/// Offline fallback: hashed bag-of-words vectors. Used when no embedding
/// backend is configured so local runs still retrieve something sensible.
pub struct OfflineEmbedder {
    dimensions: usize,
}

impl OfflineEmbedder {
    pub fn new() -> Self {
        Self { dimensions: 256 }
    }
}

impl Default for OfflineEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for OfflineEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use sha2::{Digest, Sha256};

        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
        {
            let hash = Sha256::digest(token.as_bytes());
            let bucket = u16::from_be_bytes([hash[0], hash[1]]) as usize % self.dimensions;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }
}

/// Retrieval service over a read-only knowledge store.
///
/// Documents are embedded once via `index()`; searches embed the query and
/// rank by cosine similarity, descending, ties broken by load order.
pub struct RetrievalService {
    store: Arc<KnowledgeStore>,
    backend: Arc<dyn EmbeddingBackend>,
    // (document index, embedding); populated once by index()
    embeddings: RwLock<Vec<(usize, Vec<f32>)>>,
}

impl RetrievalService {
    pub fn new(store: Arc<KnowledgeStore>, backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            store,
            backend,
            embeddings: RwLock::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// Embed every document in the store. Per-document failures are logged
    /// and skipped; the document simply never matches a query.
    pub async fn index(&self) -> Result<()> {
        let mut embeddings = Vec::with_capacity(self.store.len());

        for (idx, doc) in self.store.documents().iter().enumerate() {
            let text = format!("{}\n{}", doc.title, doc.content);
            match self.backend.embed(&text).await {
                Ok(vector) => embeddings.push((idx, vector)),
                Err(e) => {
                    warn!(doc_id = %doc.id, error = %e, "Failed to embed document");
                }
            }
        }

        info!(
            embedded = embeddings.len(),
            total = self.store.len(),
            "Retrieval index built"
        );

        let mut guard = self.embeddings.write().await;
        *guard = embeddings;
        Ok(())
    }

    pub async fn indexed_count(&self) -> usize {
        self.embeddings.read().await.len()
    }

    /// Ranked similarity search.
    ///
    /// `total_results` counts every document at or above the threshold;
    /// `documents` is the top `limit` of them. An empty hit list is a
    /// successful outcome, distinct from a backend failure.
    pub async fn search(&self, query: &str, limit: usize, threshold: f32) -> Result<SearchOutcome> {
        if query.trim().is_empty() {
            return Err(SupportError::InvalidArgument(
                "query must be a non-empty string".to_string(),
            ));
        }

        let start = Instant::now();
        let query_embedding = self.backend.embed(query).await?;

        let embeddings = self.embeddings.read().await;
        let mut matches: Vec<Document> = Vec::new();

        for (idx, doc_embedding) in embeddings.iter() {
            let similarity = cosine_similarity(&query_embedding, doc_embedding);
            if similarity >= threshold {
                let mut doc = self.store.documents()[*idx].clone();
                doc.embedding = None;
                doc.score = Some(similarity);
                matches.push(doc);
            }
        }

        // Stable sort: equal scores keep load order
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
        });

        let total_results = matches.len();
        matches.truncate(limit);

        let elapsed_ms = start.elapsed().as_millis() as u64;

        debug!(
            query = %query,
            total_results,
            returned = matches.len(),
            elapsed_ms,
            "Knowledge search completed"
        );

        Ok(SearchOutcome {
            documents: matches,
            query: query.to_string(),
            total_results,
            elapsed_ms,
        })
    }
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero-norm
/// inputs rather than an error, so a bad embedding never poisons a search.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeStore;

    /// Deterministic embedder: projects text onto fixed topic axes.
    pub struct MockEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingBackend for MockEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            let loan = if lower.contains("loan") { 1.0 } else { 0.0 };
            let savings = if lower.contains("savings") { 1.0 } else { 0.0 };
            let card = if lower.contains("card") { 1.0 } else { 0.0 };
            Ok(vec![loan, savings, card, 0.1])
        }
    }

    pub struct DownEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingBackend for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(SupportError::BackendUnavailable(
                "connection refused".to_string(),
            ))
        }
    }

    fn test_store() -> Arc<KnowledgeStore> {
        let raw = r#"[
            {
                "id": "kb-loans",
                "title": "Personal loan rates",
                "tags": ["loans"],
                "product_area": "lending",
                "type": "faq",
                "requires_auth": false,
                "pii": false,
                "last_reviewed": "2025-06-01",
                "content": "Personal loan interest rates start at 12% per annum."
            },
            {
                "id": "kb-savings",
                "title": "Savings account growth",
                "tags": ["savings"],
                "product_area": "deposits",
                "type": "faq",
                "requires_auth": false,
                "pii": false,
                "last_reviewed": "2025-06-01",
                "content": "Savings accounts earn compound interest monthly."
            },
            {
                "id": "kb-cards",
                "title": "Credit card fees",
                "tags": ["cards"],
                "product_area": "cards",
                "type": "faq",
                "requires_auth": false,
                "pii": false,
                "last_reviewed": "2025-06-01",
                "content": "Annual card fee is waived in the first year."
            }
        ]"#;
        Arc::new(KnowledgeStore::from_json(raw).unwrap())
    }

    async fn indexed_service() -> RetrievalService {
        let service = RetrievalService::new(test_store(), Arc::new(MockEmbedder));
        service.index().await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let service = indexed_service().await;

        let outcome = service.search("loan interest", 5, 0.5).await.unwrap();
        assert!(!outcome.documents.is_empty());
        assert_eq!(outcome.documents[0].id, "kb-loans");
        assert!(outcome.documents[0].score.unwrap() > 0.5);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let service = indexed_service().await;

        let err = service.search("   ", 5, 0.5).await.unwrap_err();
        assert!(matches!(err, SupportError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_backend_down_is_unavailable() {
        let service = RetrievalService::new(test_store(), Arc::new(DownEmbedder));

        let err = service.search("loans", 5, 0.5).await.unwrap_err();
        assert!(matches!(err, SupportError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_no_hits_is_success_not_error() {
        let service = indexed_service().await;

        // Nothing matches the threshold; this is a successful empty outcome
        let outcome = service.search("mortgage insurance", 5, 0.95).await.unwrap();
        assert_eq!(outcome.total_results, 0);
        assert!(outcome.documents.is_empty());
    }

    #[tokio::test]
    async fn test_search_is_idempotent() {
        let service = indexed_service().await;

        let first = service.search("savings growth", 5, 0.3).await.unwrap();
        let second = service.search("savings growth", 5, 0.3).await.unwrap();

        let ids = |outcome: &SearchOutcome| {
            outcome
                .documents
                .iter()
                .map(|d| d.id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn test_limit_truncates_after_ranking() {
        let service = indexed_service().await;

        let outcome = service.search("loan savings card", 1, 0.0).await.unwrap();
        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.total_results, 3);
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        let sim = cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }
}
