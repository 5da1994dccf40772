//! Cascade Service
//!
//! Single entry point for hosts: verify and certify a claim on the ledger,
//! evaluate the cascade, then mirror everything into the KV store on a
//! best-effort basis.
//!
//! The certificate is final once the ledger returns it. Store trouble only
//! shows up as warnings on the receipt's [`SyncReport`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cascade_types::{AgentSnapshot, CascadeEvent, Claim, ReputationChange};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cascade::CascadeCoordinator;
use crate::certificate::Certificate;
use crate::config::CascadeConfig;
use crate::error::{ConfigError, LedgerError, ServiceError};
use crate::ledger::{AgentId, ReputationLedger};
use crate::store::{HealthStatus, HttpKvStore, KvStore, PendingWrite, StateSync, SyncReport};
use crate::verification::StatisticalVerifier;

/// Everything produced by one submission
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub certificate: Certificate,
    pub change: Option<ReputationChange>,
    pub cascade: Option<CascadeEvent>,
    /// `None` when no store is configured
    pub sync: Option<SyncReport>,
}

#[derive(Debug)]
pub struct CascadeService {
    ledger: ReputationLedger,
    coordinator: CascadeCoordinator,
    sync: Option<Arc<StateSync>>,
    flush_interval: Option<Duration>,
}

impl CascadeService {
    /// Local-only service; nothing is mirrored
    pub fn new(config: &CascadeConfig) -> Self {
        Self {
            ledger: ReputationLedger::new(
                StatisticalVerifier::new(config.verifier.clone()),
                config.ledger.clone(),
            ),
            coordinator: CascadeCoordinator::new(config.cascade.clone()),
            sync: None,
            flush_interval: config.store.flush_interval(),
        }
    }

    /// Service mirroring into the given store
    pub fn with_store(config: &CascadeConfig, store: Arc<dyn KvStore>) -> Self {
        let sync = StateSync::new(
            store,
            config.store.key_space(),
            config.store.retry_policy(),
        );
        Self {
            sync: Some(Arc::new(sync)),
            ..Self::new(config)
        }
    }

    /// HTTP-backed service when `store.base_url` is set, local-only otherwise
    pub fn from_config(config: &CascadeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        match &config.store.base_url {
            Some(base_url) => {
                let store = HttpKvStore::new(
                    base_url,
                    config.store.api_token.clone().unwrap_or_default(),
                    config.store.request_timeout(),
                )?;
                info!(base_url = %base_url, namespace = %config.store.namespace, "KV sync enabled");
                Ok(Self::with_store(config, Arc::new(store)))
            }
            None => {
                info!("no KV backend configured, running local-only");
                Ok(Self::new(config))
            }
        }
    }

    /// Build from `REPID_*` environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = CascadeConfig::from_env().context("Failed to load cascade configuration")?;
        Self::from_config(&config).context("Failed to build cascade service")
    }

    pub fn ledger(&self) -> &ReputationLedger {
        &self.ledger
    }

    pub fn coordinator(&self) -> &CascadeCoordinator {
        &self.coordinator
    }

    pub fn state_sync(&self) -> Option<&Arc<StateSync>> {
        self.sync.as_ref()
    }

    pub async fn register_agent(&self, id: AgentId, reputation: i64) -> Result<AgentSnapshot, LedgerError> {
        let snapshot = self.ledger.register(id, reputation).await?;
        if let Some(sync) = &self.sync {
            sync.sync(vec![PendingWrite::Snapshot(snapshot.clone())], None).await;
        }
        Ok(snapshot)
    }

    /// Certify a claim without cascade evaluation
    pub async fn submit(&self, id: &AgentId, claim: &Claim) -> SubmissionReceipt {
        self.submit_with_deadline(id, claim, None, None).await
    }

    /// Certify a claim and evaluate the cascade at the given unity
    pub async fn submit_tracked(&self, id: &AgentId, claim: &Claim, unity: f64) -> SubmissionReceipt {
        self.submit_with_deadline(id, claim, Some(unity), None).await
    }

    /// Full submission. `deadline` bounds store traffic only: the ledger
    /// update always commits.
    pub async fn submit_with_deadline(
        &self,
        id: &AgentId,
        claim: &Claim,
        unity: Option<f64>,
        deadline: Option<Instant>,
    ) -> SubmissionReceipt {
        let submission = self.ledger.submit_detailed(id, claim).await;
        let mut warnings = Vec::new();

        let cascade = match unity {
            Some(unity) if !submission.certificate.is_denied() => {
                let candidates = self.cascade_candidates(deadline, &mut warnings).await;
                self.coordinator
                    .evaluate(
                        &submission.certificate,
                        submission.initiator_tier(),
                        unity,
                        &candidates,
                    )
                    .await
            }
            _ => None,
        };

        let sync = match &self.sync {
            Some(sync) => {
                let mut writes = Vec::with_capacity(4);
                if submission.change.is_some() {
                    writes.push(PendingWrite::Snapshot(submission.snapshot.clone()));
                }
                writes.push(PendingWrite::Certificate(Box::new(submission.certificate.clone())));
                if let Some(change) = &submission.change {
                    writes.push(PendingWrite::ReputationChange(change.clone()));
                }
                if let Some(event) = &cascade {
                    writes.push(PendingWrite::Cascade(Box::new(event.clone())));
                }
                let mut report = sync.sync(writes, deadline).await;
                warnings.append(&mut report.warnings);
                report.warnings = warnings;
                Some(report)
            }
            None => None,
        };

        SubmissionReceipt {
            certificate: submission.certificate,
            change: submission.change,
            cascade,
            sync,
        }
    }

    /// Local snapshots merged with agents known only to the store. The
    /// newer record wins per agent; store failures fall back to local.
    async fn cascade_candidates(
        &self,
        deadline: Option<Instant>,
        warnings: &mut Vec<String>,
    ) -> Vec<AgentSnapshot> {
        let mut merged: BTreeMap<String, AgentSnapshot> = self
            .ledger
            .snapshots()
            .await
            .into_iter()
            .map(|s| (s.agent_id.clone(), s))
            .collect();

        if let Some(sync) = &self.sync {
            let criteria = &self.coordinator.settings().eligibility;
            match sync.cascade_ready(criteria, deadline).await {
                Ok(remote) => {
                    for snapshot in remote {
                        let newer = merged
                            .get(&snapshot.agent_id)
                            .map_or(true, |local| snapshot.updated_at > local.updated_at);
                        if newer {
                            merged.insert(snapshot.agent_id.clone(), snapshot);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "cascade-ready query failed, using local agents only");
                    warnings.push(format!("cascade_ready: {e}"));
                }
            }
        }
        merged.into_values().collect()
    }

    /// Adopt the stored snapshot for an agent if it is newer than local state
    pub async fn hydrate(&self, id: &AgentId) -> Result<bool, ServiceError> {
        let Some(sync) = &self.sync else {
            return Ok(false);
        };
        match sync.fetch_snapshot(id.as_str(), None).await? {
            Some(remote) => Ok(self.ledger.adopt_remote(&remote).await?),
            None => Ok(false),
        }
    }

    /// Hydrate every agent in the namespace; returns how many were adopted
    pub async fn hydrate_all(&self) -> Result<usize, ServiceError> {
        let Some(sync) = &self.sync else {
            return Ok(0);
        };
        let mut adopted = 0;
        for remote in sync.list_snapshots(None).await? {
            match self.ledger.adopt_remote(&remote).await {
                Ok(true) => adopted += 1,
                Ok(false) => {}
                Err(e) => warn!(agent_id = %remote.agent_id, error = %e, "skipping invalid remote snapshot"),
            }
        }
        info!(adopted, "hydrated ledger from store");
        Ok(adopted)
    }

    pub async fn health_check(&self) -> Option<HealthStatus> {
        match &self.sync {
            Some(sync) => Some(sync.health_check().await),
            None => None,
        }
    }

    /// Start the flusher at `store.flush_interval_ms`; `None` when disabled
    /// or no store is configured
    pub fn start_flush_worker(&self) -> Option<JoinHandle<()>> {
        self.spawn_flush_worker(self.flush_interval?)
    }

    /// Start the background retry-queue flusher, if a store is configured
    pub fn spawn_flush_worker(&self, interval: Duration) -> Option<JoinHandle<()>> {
        self.sync
            .as_ref()
            .map(|sync| Arc::clone(sync).spawn_flush_worker(interval))
    }
}
