//! Typed error taxonomy for the engine.
//!
//! Callers pattern-match intent explicitly instead of inspecting exception
//! strings. Note that hitting the orchestrator loop bound is *not* an error:
//! it is a named completion reason on the investigation state.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine and its collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A domain tried to write fields outside its whitelist. Fatal only in
    /// strict enforcement mode; production mode strips and records a warning.
    #[error("whitelist violation in domain '{domain}': blocked fields {fields:?}")]
    WhitelistViolation { domain: String, fields: Vec<String> },

    /// Optimistic concurrency failure. The caller must re-fetch and retry,
    /// never overwrite blindly.
    #[error("version conflict on investigation '{id}': expected v{expected}, found v{actual}")]
    VersionConflict { id: String, expected: u64, actual: u64 },

    #[error("investigation '{0}' not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The graph spec failed validation at construction time. A dangling edge
    /// is rejected here rather than discovered mid-execution.
    #[error("graph validation failed: {0}")]
    GraphValidation(String),

    /// A per-tool or per-investigation deadline elapsed. Recorded as a failed
    /// tool record, never a process abort.
    #[error("'{operation}' exceeded its deadline after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}
