//! Core data models for the banking support agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

//
// ================= Knowledge Documents =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub tags: Vec<String>,
    pub product_area: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub requires_auth: bool,
    pub pii: bool,
    pub last_reviewed: String,
}

/// A knowledge base document. Immutable after load; `score` is attached
/// transiently on clones returned from a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub metadata: DocumentMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub documents: Vec<Document>,
    pub query: String,
    pub total_results: usize,
    pub elapsed_ms: u64,
}

//
// ================= Tool Call Protocol =================
//

/// A single tool call delivered by the live session. Consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Uniform response envelope. Every call id produces exactly one of these,
/// including failures (error populated, result null).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResult {
    pub result: serde_json::Value,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionResult {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            result,
            sources: Vec::new(),
            grounding_chunks: Vec::new(),
            error: None,
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            result: serde_json::Value::Null,
            sources: Vec::new(),
            grounding_chunks: Vec::new(),
            error: Some(message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingChunk {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web: Option<WebSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSource {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub response: FunctionResult,
}

//
// ================= Support Service Data =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub currency: String,
    pub buy_rate: f64,
    pub sell_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub services: Vec<String>,
    pub hours: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfirmation {
    pub reference: String,
    pub phone_number: String,
    pub scheduled_time: DateTime<Utc>,
    pub purpose: String,
    pub confirmation_message: String,
}

//
// ================= Session State =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    ToolExecuting,
    Reconnecting,
}

/// Connection bookkeeping owned exclusively by the session controller and
/// mutated only from its own event handlers.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub consecutive_failures: u32,
    pub circuit_open_until: Option<Instant>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            connected: false,
            reconnect_attempts: 0,
            consecutive_failures: 0,
            circuit_open_until: None,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::ToolExecuting => "tool-executing",
            SessionState::Reconnecting => "reconnecting",
        };
        write!(f, "{}", s)
    }
}
