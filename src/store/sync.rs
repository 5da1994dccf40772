//! Best-effort mirroring of ledger state into the KV store
//!
//! ## Rules
//!
//! 1. **LOCAL FIRST** - the ledger has already committed; nothing here rolls
//!    it back. Failures become warnings on a [`SyncReport`].
//! 2. **LAST WRITE WINS** - agent snapshots are read, compared on
//!    `updated_at`, then written. A newer remote record is never clobbered.
//! 3. **WRITE ONCE** - certificates are content-addressed and never rewritten.
//! 4. **BOUNDED** - every call has a timeout, a bounded retry with exponential
//!    backoff, and honours an optional caller deadline.
//! 5. **EVENTUAL** - writes that fail on transport go to a bounded retry
//!    queue, drained at the start of the next sync or by the flush worker.
//!    Writes the store rejects outright (4xx) are warned about and dropped.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cascade_types::{AgentSnapshot, CascadeEvent, ReputationChange};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{KeySpace, KvStore};
use crate::cascade::EligibilityCriteria;
use crate::certificate::Certificate;
use crate::error::StoreError;

const CONCURRENT_FETCHES: usize = 8;

// ============================================================================
// Policy & reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per call, first try included
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Per-attempt timeout
    pub request_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            queue_capacity: 1024,
        }
    }
}

/// A write waiting for the store to come back
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Snapshot(AgentSnapshot),
    Certificate(Box<Certificate>),
    Cascade(Box<CascadeEvent>),
    ReputationChange(ReputationChange),
}

impl PendingWrite {
    pub fn label(&self) -> &'static str {
        match self {
            PendingWrite::Snapshot(_) => "snapshot",
            PendingWrite::Certificate(_) => "certificate",
            PendingWrite::Cascade(_) => "cascade",
            PendingWrite::ReputationChange(_) => "repid_change",
        }
    }

    fn snapshot_agent(&self) -> Option<&str> {
        match self {
            PendingWrite::Snapshot(s) => Some(&s.agent_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Written,
    /// Already present (certificate) or identical (snapshot)
    Unchanged,
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub written: usize,
    pub unchanged: usize,
    /// Earlier queued writes that went through this time
    pub flushed: usize,
    pub queued: usize,
    pub warnings: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.queued == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub detail: String,
    pub checked_at: DateTime<Utc>,
    pub latency_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct HealthRecord {
    status: String,
    timestamp: DateTime<Utc>,
}

/// Worth keeping in the retry queue: the store or the caller's deadline
/// gave out, not the write itself. 4xx rejections are dropped.
fn is_transient(err: &StoreError) -> bool {
    err.is_retryable() || matches!(err, StoreError::Cancelled { .. })
}

// ============================================================================
// StateSync
// ============================================================================

pub struct StateSync {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    policy: RetryPolicy,
    pending: Mutex<VecDeque<PendingWrite>>,
}

impl std::fmt::Debug for StateSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSync")
            .field("keys", &self.keys)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl StateSync {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace, policy: RetryPolicy) -> Self {
        Self {
            store,
            keys,
            policy,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    // ------------------------------------------------------------------------
    // Call plumbing
    // ------------------------------------------------------------------------

    /// One attempt bounded by the request timeout and the caller deadline
    async fn attempt<T, Fut>(
        &self,
        operation: &'static str,
        deadline: Option<Instant>,
        fut: Fut,
    ) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StoreError::Cancelled { operation });
        }
        let timed = tokio::time::timeout(self.policy.request_timeout, fut);
        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, timed)
                .await
                .map_err(|_| StoreError::Cancelled { operation })?,
            None => timed.await,
        };
        match outcome {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                duration_ms: self.policy.request_timeout.as_millis() as u64,
            }),
        }
    }

    /// Retry transient failures with exponential backoff
    async fn call<T, F, Fut>(
        &self,
        operation: &'static str,
        deadline: Option<Instant>,
        mut f: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.attempt(operation, deadline, f()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "KV call failed, retrying"
                    );
                    let wake = Instant::now() + backoff;
                    if deadline.is_some_and(|d| wake >= d) {
                        return Err(StoreError::Cancelled { operation });
                    }
                    tokio::time::sleep_until(wake).await;
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        key: &str,
        deadline: Option<Instant>,
    ) -> Result<Option<T>, StoreError> {
        let raw = self.call("get", deadline, || self.store.get(key)).await?;
        raw.map(|body| serde_json::from_str(&body))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn put_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        deadline: Option<Instant>,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(value)?;
        let body = body.as_str();
        self.call("put", deadline, || self.store.put(key, body)).await
    }

    // ------------------------------------------------------------------------
    // Typed operations
    // ------------------------------------------------------------------------

    /// Last-write-wins upsert of an agent snapshot
    pub async fn upsert_snapshot(
        &self,
        snapshot: &AgentSnapshot,
        deadline: Option<Instant>,
    ) -> Result<bool, StoreError> {
        self.upsert(snapshot, deadline)
            .await
            .map(|outcome| outcome == WriteOutcome::Written)
    }

    /// One read, one compare. A newer remote record is final for this
    /// snapshot: re-reading cannot make the local copy newer.
    async fn upsert(
        &self,
        snapshot: &AgentSnapshot,
        deadline: Option<Instant>,
    ) -> Result<WriteOutcome, StoreError> {
        let key = self.keys.agent(&snapshot.agent_id);
        let remote: Option<AgentSnapshot> = self.fetch_json(&key, deadline).await?;
        match remote {
            Some(remote) if remote.updated_at > snapshot.updated_at => {
                debug!(
                    agent_id = %snapshot.agent_id,
                    remote = %remote.updated_at,
                    local = %snapshot.updated_at,
                    "remote snapshot is newer"
                );
                Err(StoreError::ConcurrencyConflict {
                    agent_id: snapshot.agent_id.clone(),
                    remote: remote.updated_at,
                    local: snapshot.updated_at,
                })
            }
            Some(remote) if remote == *snapshot => Ok(WriteOutcome::Unchanged),
            _ => {
                self.put_json(&key, snapshot, deadline).await?;
                Ok(WriteOutcome::Written)
            }
        }
    }

    /// Write a certificate unless its hash is already stored
    pub async fn store_certificate(
        &self,
        certificate: &Certificate,
        deadline: Option<Instant>,
    ) -> Result<bool, StoreError> {
        let key = self.keys.certificate(certificate.hash());
        let key = key.as_str();
        let existing = self.call("get", deadline, || self.store.get(key)).await?;
        if existing.is_some() {
            debug!(hash = %certificate.hash(), "certificate already stored");
            return Ok(false);
        }
        self.put_json(key, certificate, deadline).await?;
        Ok(true)
    }

    pub async fn record_change(
        &self,
        change: &ReputationChange,
        deadline: Option<Instant>,
    ) -> Result<(), StoreError> {
        let key = self.keys.reputation_change(&change.agent_id, &change.timestamp);
        self.put_json(&key, change, deadline).await
    }

    pub async fn record_cascade(
        &self,
        event: &CascadeEvent,
        deadline: Option<Instant>,
    ) -> Result<(), StoreError> {
        let key = self.keys.cascade(&event.sync_id);
        self.put_json(&key, event, deadline).await
    }

    pub async fn fetch_snapshot(
        &self,
        agent_id: &str,
        deadline: Option<Instant>,
    ) -> Result<Option<AgentSnapshot>, StoreError> {
        self.fetch_json(&self.keys.agent(agent_id), deadline).await
    }

    pub async fn fetch_certificate(
        &self,
        hash: &str,
        deadline: Option<Instant>,
    ) -> Result<Option<Certificate>, StoreError> {
        self.fetch_json(&self.keys.certificate(hash), deadline).await
    }

    pub async fn fetch_cascade(
        &self,
        sync_id: &uuid::Uuid,
        deadline: Option<Instant>,
    ) -> Result<Option<CascadeEvent>, StoreError> {
        self.fetch_json(&self.keys.cascade(sync_id), deadline).await
    }

    /// Every agent snapshot in the namespace, sorted by id. Unreadable
    /// records are skipped with a warning.
    pub async fn list_snapshots(
        &self,
        deadline: Option<Instant>,
    ) -> Result<Vec<AgentSnapshot>, StoreError> {
        let prefix = self.keys.agent_prefix();
        let prefix = prefix.as_str();
        let keys = self.call("list", deadline, || self.store.list(prefix)).await?;

        let fetched: Vec<Result<Option<AgentSnapshot>, StoreError>> = stream::iter(keys.iter())
            .map(|key| self.fetch_json::<AgentSnapshot>(key, deadline))
            .buffer_unordered(CONCURRENT_FETCHES)
            .collect()
            .await;

        let mut snapshots = Vec::with_capacity(fetched.len());
        for result in fetched {
            match result {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => {}
                Err(StoreError::Serialization(e)) => {
                    warn!(error = %e, "skipping unreadable agent snapshot");
                }
                Err(e) => return Err(e),
            }
        }
        snapshots.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(snapshots)
    }

    /// Agents in the store that meet the cascade eligibility criteria
    pub async fn cascade_ready(
        &self,
        criteria: &EligibilityCriteria,
        deadline: Option<Instant>,
    ) -> Result<Vec<AgentSnapshot>, StoreError> {
        let mut snapshots = self.list_snapshots(deadline).await?;
        snapshots.retain(|s| criteria.is_eligible(s));
        Ok(snapshots)
    }

    /// Overwrite the health key and read it back
    pub async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let checked_at = Utc::now();
        let key = self.keys.health_check();
        let record = HealthRecord {
            status: "ok".to_string(),
            timestamp: checked_at,
        };

        let result = async {
            self.put_json(&key, &record, None).await?;
            self.fetch_json::<HealthRecord>(&key, None).await
        }
        .await;

        let (healthy, detail) = match result {
            Ok(Some(read)) if read.timestamp == checked_at => (true, "read-after-write ok".to_string()),
            Ok(Some(_)) => (false, "health record read back with different content".to_string()),
            Ok(None) => (false, "health record missing after write".to_string()),
            Err(e) => (false, e.to_string()),
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        if healthy {
            info!(latency_ms, "KV health check passed");
        } else {
            warn!(latency_ms, detail = %detail, "KV health check failed");
        }

        HealthStatus {
            healthy,
            detail,
            checked_at,
            latency_ms,
        }
    }

    // ------------------------------------------------------------------------
    // Batches & retry queue
    // ------------------------------------------------------------------------

    async fn write(&self, write: &PendingWrite, deadline: Option<Instant>) -> Result<WriteOutcome, StoreError> {
        match write {
            PendingWrite::Snapshot(snapshot) => self.upsert(snapshot, deadline).await,
            PendingWrite::Certificate(certificate) => {
                let written = self.store_certificate(certificate, deadline).await?;
                Ok(if written {
                    WriteOutcome::Written
                } else {
                    WriteOutcome::Unchanged
                })
            }
            PendingWrite::Cascade(event) => {
                self.record_cascade(event, deadline).await?;
                Ok(WriteOutcome::Written)
            }
            PendingWrite::ReputationChange(change) => {
                self.record_change(change, deadline).await?;
                Ok(WriteOutcome::Written)
            }
        }
    }

    /// Drain queued writes first, then apply `writes` in order. Once the
    /// store fails on transport, the remaining writes are queued untried.
    pub async fn sync(&self, writes: Vec<PendingWrite>, deadline: Option<Instant>) -> SyncReport {
        let mut report = SyncReport {
            flushed: self.flush_pending(deadline).await,
            ..SyncReport::default()
        };

        let mut store_down = false;
        for write in writes {
            if store_down {
                self.enqueue(write).await;
                report.queued += 1;
                continue;
            }
            match self.write(&write, deadline).await {
                Ok(WriteOutcome::Written) => report.written += 1,
                Ok(WriteOutcome::Unchanged) => report.unchanged += 1,
                Err(e) if is_transient(&e) => {
                    warn!(kind = write.label(), error = %e, "KV sync failed, queued for retry");
                    report.warnings.push(format!("{}: {}", write.label(), e));
                    self.enqueue(write).await;
                    report.queued += 1;
                    store_down = true;
                }
                Err(e) => {
                    warn!(kind = write.label(), error = %e, "KV sync rejected write");
                    report.warnings.push(format!("{}: {}", write.label(), e));
                }
            }
        }
        report
    }

    async fn enqueue(&self, write: PendingWrite) {
        let mut pending = self.pending.lock().await;
        if let Some(agent) = write.snapshot_agent() {
            pending.retain(|queued| queued.snapshot_agent() != Some(agent));
        }
        if pending.len() >= self.policy.queue_capacity.max(1) {
            if let Some(dropped) = pending.pop_front() {
                warn!(kind = dropped.label(), "retry queue full, dropping oldest write");
            }
        }
        pending.push_back(write);
    }

    /// Put a write back at the head unless a newer snapshot superseded it
    async fn requeue_front(&self, write: PendingWrite) {
        let mut pending = self.pending.lock().await;
        if let Some(agent) = write.snapshot_agent() {
            if pending.iter().any(|queued| queued.snapshot_agent() == Some(agent)) {
                return;
            }
        }
        pending.push_front(write);
    }

    /// Retry queued writes in order, stopping at the first transport failure.
    /// Returns how many went through.
    pub async fn flush_pending(&self, deadline: Option<Instant>) -> usize {
        let mut flushed = 0;
        loop {
            let next = self.pending.lock().await.pop_front();
            let Some(write) = next else { break };
            match self.write(&write, deadline).await {
                Ok(_) => flushed += 1,
                Err(e) if is_transient(&e) => {
                    debug!(kind = write.label(), error = %e, "store still unavailable");
                    self.requeue_front(write).await;
                    break;
                }
                Err(e) => {
                    warn!(kind = write.label(), error = %e, "dropping queued write");
                }
            }
        }
        if flushed > 0 {
            info!(flushed, "flushed queued KV writes");
        }
        flushed
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn pending_writes(&self) -> Vec<PendingWrite> {
        self.pending.lock().await.iter().cloned().collect()
    }

    /// Periodically drain the retry queue in the background
    pub fn spawn_flush_worker(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.pending_len().await > 0 {
                    self.flush_pending(None).await;
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
