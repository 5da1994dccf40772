//! Distributed state store
//!
//! A tiny KV contract the ledger mirrors its state into. The store is an
//! eventually-consistent cache shared between process instances; in-process
//! decisions never wait on it.
//!
//! ## Key layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `{ns}:agent:{id}` | `AgentSnapshot` |
//! | `{ns}:cert:{hash}` | `Certificate` (write-once) |
//! | `{ns}:cascade:{sync_id}` | `CascadeEvent` |
//! | `{ns}:repid_change:{id}:{unix_ts}` | `ReputationChange` |
//! | `{ns}:health_check` | health record, overwritten by each check |

pub mod http;
pub mod memory;
pub mod sync;

pub use http::HttpKvStore;
pub use memory::MemoryKvStore;
pub use sync::{HealthStatus, PendingWrite, RetryPolicy, StateSync, SyncReport};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

/// Minimal async KV backend. Values are JSON text.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// `Ok(None)` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Keys starting with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Namespaced key builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn agent(&self, agent_id: &str) -> String {
        format!("{}:agent:{}", self.namespace, agent_id)
    }

    pub fn agent_prefix(&self) -> String {
        format!("{}:agent:", self.namespace)
    }

    pub fn certificate(&self, hash: &str) -> String {
        format!("{}:cert:{}", self.namespace, hash)
    }

    pub fn cascade(&self, sync_id: &Uuid) -> String {
        format!("{}:cascade:{}", self.namespace, sync_id)
    }

    pub fn reputation_change(&self, agent_id: &str, at: &DateTime<Utc>) -> String {
        format!(
            "{}:repid_change:{}:{}",
            self.namespace,
            agent_id,
            at.timestamp_micros()
        )
    }

    pub fn health_check(&self) -> String {
        format!("{}:health_check", self.namespace)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("repid")
    }
}
