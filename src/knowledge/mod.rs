//! Knowledge base store
//!
//! Loads the static document set once at startup.
//! Read-only after load; shared freely across concurrent searches.

use crate::error::SupportError;
use crate::models::{Document, DocumentMetadata};
use crate::Result;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Write;
use tracing::info;

/// Raw knowledge base entry as shipped in the JSON file. `content` may be a
/// plain string or a structured object; objects are flattened to searchable
/// text at load time.
#[derive(Debug, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub product_area: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub requires_auth: bool,
    pub pii: bool,
    pub last_reviewed: String,
    pub content: serde_json::Value,
}

/// In-memory document store. Documents keep their load order, which is the
/// tie-break order for equal search scores.
pub struct KnowledgeStore {
    documents: Vec<Document>,
    corpus_hash: String,
}

impl KnowledgeStore {
    /// Parse and load a JSON array of knowledge entries.
    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: Vec<KnowledgeEntry> = serde_json::from_str(raw)?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<KnowledgeEntry>) -> Self {
        let documents: Vec<Document> = entries
            .into_iter()
            .map(|entry| {
                let content = flatten_content(&entry.content);
                Document {
                    id: entry.id,
                    title: entry.title,
                    content,
                    metadata: DocumentMetadata {
                        tags: entry.tags,
                        product_area: entry.product_area,
                        doc_type: entry.doc_type,
                        requires_auth: entry.requires_auth,
                        pii: entry.pii,
                        last_reviewed: entry.last_reviewed,
                    },
                    embedding: None,
                    score: None,
                }
            })
            .collect();

        let corpus_hash = compute_corpus_hash(&documents);

        info!(
            document_count = documents.len(),
            corpus_hash = %corpus_hash,
            "Knowledge base loaded"
        );

        Self {
            documents,
            corpus_hash,
        }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|doc| doc.id == id)
    }

    pub fn by_product_area(&self, product_area: &str) -> Vec<&Document> {
        self.documents
            .iter()
            .filter(|doc| doc.metadata.product_area == product_area)
            .collect()
    }

    pub fn by_tags(&self, tags: &[&str]) -> Vec<&Document> {
        self.documents
            .iter()
            .filter(|doc| {
                tags.iter()
                    .any(|tag| doc.metadata.tags.iter().any(|t| t == tag))
            })
            .collect()
    }

    /// Documents that need no customer authentication.
    pub fn public_documents(&self) -> Vec<&Document> {
        self.documents
            .iter()
            .filter(|doc| !doc.metadata.requires_auth)
            .collect()
    }

    pub fn non_pii_documents(&self) -> Vec<&Document> {
        self.documents
            .iter()
            .filter(|doc| !doc.metadata.pii)
            .collect()
    }

    pub fn corpus_hash(&self) -> &str {
        &self.corpus_hash
    }

    /// Load the bundled knowledge base shipped with the crate.
    pub fn load_bundled() -> Result<Self> {
        Self::from_json(include_str!("../../data/knowledge-base.json")).map_err(|e| {
            SupportError::KnowledgeLoadError(format!("bundled knowledge base is invalid: {}", e))
        })
    }

    pub fn stats(&self) -> serde_json::Value {
        let product_areas: BTreeSet<&str> = self
            .documents
            .iter()
            .map(|doc| doc.metadata.product_area.as_str())
            .collect();
        let doc_types: BTreeSet<&str> = self
            .documents
            .iter()
            .map(|doc| doc.metadata.doc_type.as_str())
            .collect();
        let tags: BTreeSet<&str> = self
            .documents
            .iter()
            .flat_map(|doc| doc.metadata.tags.iter().map(String::as_str))
            .collect();

        serde_json::json!({
            "total_documents": self.documents.len(),
            "product_areas": product_areas,
            "document_types": doc_types,
            "total_tags": tags.len(),
            "public_documents": self.public_documents().len(),
            "non_pii_documents": self.non_pii_documents().len(),
            "corpus_hash": self.corpus_hash,
        })
    }
}

/// Flatten heterogeneous content (string or object) into searchable text.
fn flatten_content(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Compute SHA256 hash over the ordered document set.
/// Uses streaming serialization into the hasher (no intermediate String).
fn compute_corpus_hash(documents: &[Document]) -> String {
    let mut hasher = Sha256::new();

    for doc in documents {
        if serde_json::to_writer(&mut HashWriter(&mut hasher), doc).is_err() {
            return String::new();
        }
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
