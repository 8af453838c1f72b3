//! Banking Support Agent
//!
//! Core of a voice-assisted banking customer-support agent:
//! - Read-only knowledge store loaded from bundled JSON
//! - Embedding-backed similarity retrieval with graceful degradation
//! - Deterministic finance calculators (EMI, savings projections)
//! - Function dispatcher bridging live tool calls to backend capabilities
//! - Session controller with reconnect backoff and a circuit breaker
//!
//! SESSION LOOP:
//! CONNECT → LISTEN → TOOL CALL → EXECUTE → RESPOND → (RECONNECT?) → CLOSE

pub mod api;
pub mod dispatcher;
pub mod error;
pub mod finance;
pub mod knowledge;
pub mod models;
pub mod retrieval;
pub mod session;
pub mod support;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use dispatcher::FunctionDispatcher;
