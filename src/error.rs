//! Error types for the claim ledger
//!
//! Data-quality problems never surface here: they are recorded on the
//! verification report instead. What remains are caller bugs (bad agent ids,
//! bad configuration) and KV backend failures, which the sync layer absorbs.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the reputation ledger
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Invalid agent id '{id}': {reason}")]
    InvalidAgentId { id: String, reason: &'static str },

    #[error("Agent '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Agent '{0}' is not registered")]
    UnknownAgent(String),
}

/// Errors talking to the external KV backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("KV backend unreachable: {0}")]
    Unavailable(String),

    #[error("KV backend returned HTTP {status} for {operation} '{key}'")]
    Status {
        status: u16,
        operation: &'static str,
        key: String,
    },

    #[error("KV {operation} timed out after {duration_ms}ms")]
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },

    #[error("KV {operation} cancelled: caller deadline reached")]
    Cancelled { operation: &'static str },

    #[error("Stale snapshot for agent '{agent_id}': remote record at {remote} is newer than local write at {local}")]
    ConcurrencyConflict {
        agent_id: String,
        remote: DateTime<Utc>,
        local: DateTime<Utc>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("KV store misconfigured: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Timeout { .. } => true,
            StoreError::Status { status, .. } => *status == 429 || *status >= 500,
            StoreError::Cancelled { .. }
            | StoreError::ConcurrencyConflict { .. }
            | StoreError::Serialization(_)
            | StoreError::Configuration(_) => false,
        }
    }
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from service operations that touch both the store and the ledger
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Stored snapshot rejected by ledger: {0}")]
    Ledger(#[from] LedgerError),
}
