//! Reputation Ledger
//!
//! Owns every agent's RepID and is the only place certificates are minted.
//!
//! ## RepID movement
//!
//! | Composite score | Delta | Side effect |
//! |-----------------|-------|-------------|
//! | >= 0.95 | +100 | breakthrough |
//! | >= 0.80 | +50 | breakthrough |
//! | >= 0.60 | +20 | |
//! | >= 0.40 | 0 | |
//! | < 0.40 | -100 | false claim |
//!
//! Suspended agents (RepID < 0) get an `AUTHORITY_DENIED` certificate and no
//! verification runs. Submissions for the same agent are serialized on that
//! agent's lock: verify, certify and apply happen as one step.

mod agent;
mod registry;

pub use agent::{Agent, AgentId};
pub use registry::{AgentHandle, AgentRegistry};

use cascade_types::{AgentSnapshot, Claim, ReputationChange, Tier};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::certificate::Certificate;
use crate::error::LedgerError;
use crate::verification::StatisticalVerifier;

/// RepID delta for a composite score
pub fn reputation_delta(composite_score: f64) -> i64 {
    if composite_score >= 0.95 {
        100
    } else if composite_score >= 0.80 {
        50
    } else if composite_score >= 0.60 {
        20
    } else if composite_score >= 0.40 {
        0
    } else {
        -100
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// RepID given to agents first seen through `submit`
    pub initial_reputation: i64,
    /// History entries carried in snapshots
    pub snapshot_history_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_reputation: 100,
            snapshot_history_limit: 10,
        }
    }
}

/// Everything captured inside the agent's serialized section
#[derive(Debug, Clone)]
pub struct Submission {
    pub certificate: Certificate,
    /// `None` when the claim was denied
    pub change: Option<ReputationChange>,
    /// Agent state right after the certificate was applied
    pub snapshot: AgentSnapshot,
}

impl Submission {
    pub fn initiator_tier(&self) -> Tier {
        self.snapshot.derived_tier()
    }
}

#[derive(Debug, Default)]
pub struct ReputationLedger {
    registry: AgentRegistry,
    verifier: StatisticalVerifier,
    config: LedgerConfig,
}

impl ReputationLedger {
    pub fn new(verifier: StatisticalVerifier, config: LedgerConfig) -> Self {
        Self {
            registry: AgentRegistry::new(),
            verifier,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn verifier(&self) -> &StatisticalVerifier {
        &self.verifier
    }

    /// Register an agent with an explicit starting RepID
    pub async fn register(&self, id: AgentId, reputation: i64) -> Result<AgentSnapshot, LedgerError> {
        let handle = self.registry.insert(Agent::new(id.clone(), reputation)).await?;
        let agent = handle.lock().await;
        info!(agent_id = %id, reputation, tier = %agent.tier(), "agent registered");
        Ok(agent.snapshot(self.config.snapshot_history_limit))
    }

    /// Verify a claim and apply its RepID impact. Always yields a certificate.
    pub async fn submit(&self, id: &AgentId, claim: &Claim) -> Certificate {
        self.submit_detailed(id, claim).await.certificate
    }

    /// `submit`, also returning the change record and post-apply snapshot
    pub async fn submit_detailed(&self, id: &AgentId, claim: &Claim) -> Submission {
        let handle = self
            .registry
            .get_or_register(id, self.config.initial_reputation)
            .await;
        let mut agent = handle.lock().await;
        let limit = self.config.snapshot_history_limit;

        if !agent.tier().can_submit() {
            warn!(
                agent_id = %id,
                reputation = agent.reputation(),
                "claim rejected: agent suspended"
            );
            let certificate =
                Certificate::denied(id.as_str(), claim, agent.reputation(), agent.next_timestamp());
            return Submission {
                certificate,
                change: None,
                snapshot: agent.snapshot(limit),
            };
        }

        let report = self
            .verifier
            .verify_with_history(claim, agent.verification_count());
        let impact = reputation_delta(report.composite_score);
        let new_reputation = agent.reputation().saturating_add(impact);
        let certificate = Certificate::issue(
            id.as_str(),
            claim,
            report,
            impact,
            new_reputation,
            agent.next_timestamp(),
        );
        let change = agent.apply(&certificate);

        info!(
            agent_id = %id,
            hash = %certificate.hash(),
            status = %certificate.status(),
            composite_score = certificate.composite_score(),
            change = change.change,
            reputation = change.new_reputation,
            tier = %change.new_tier,
            "claim certified"
        );
        if change.tier_changed() {
            info!(agent_id = %id, from = %change.old_tier, to = %change.new_tier, "tier changed");
        }

        Submission {
            certificate,
            change: Some(change),
            snapshot: agent.snapshot(limit),
        }
    }

    pub async fn snapshot(&self, id: &AgentId) -> Option<AgentSnapshot> {
        let handle = self.registry.get(id).await?;
        let agent = handle.lock().await;
        Some(agent.snapshot(self.config.snapshot_history_limit))
    }

    /// Snapshots of every known agent, sorted by id. Agents are locked one at a time.
    pub async fn snapshots(&self) -> Vec<AgentSnapshot> {
        let mut out = Vec::new();
        for (_, handle) in self.registry.handles().await {
            let agent = handle.lock().await;
            out.push(agent.snapshot(self.config.snapshot_history_limit));
        }
        out
    }

    pub async fn tier(&self, id: &AgentId) -> Option<Tier> {
        let handle = self.registry.get(id).await?;
        let tier = handle.lock().await.tier();
        Some(tier)
    }

    /// Replace local state with a remote snapshot when the remote is newer.
    /// Returns whether the snapshot was adopted.
    pub async fn adopt_remote(&self, remote: &AgentSnapshot) -> Result<bool, LedgerError> {
        let incoming = Agent::from_snapshot(remote)?;
        let id = incoming.id().clone();

        let handle = match self.registry.get(&id).await {
            Some(handle) => handle,
            None => match self.registry.insert(incoming.clone()).await {
                Ok(_) => {
                    info!(agent_id = %id, reputation = remote.reputation, "agent hydrated from store");
                    return Ok(true);
                }
                // lost a race with a local registration; compare below
                Err(LedgerError::AlreadyRegistered(_)) => self
                    .registry
                    .get(&id)
                    .await
                    .ok_or_else(|| LedgerError::UnknownAgent(id.to_string()))?,
                Err(e) => return Err(e),
            },
        };

        let mut agent = handle.lock().await;
        if remote.updated_at > agent.updated_at() {
            info!(
                agent_id = %id,
                local = agent.reputation(),
                remote = remote.reputation,
                "adopting newer remote snapshot"
            );
            *agent = incoming;
            Ok(true)
        } else {
            debug!(agent_id = %id, "remote snapshot not newer, keeping local state");
            Ok(false)
        }
    }

    pub async fn agent_count(&self) -> usize {
        self.registry.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_types::{CertificateStatus, ClaimType};

    fn id(name: &str) -> AgentId {
        AgentId::new(name).unwrap()
    }

    fn claim(text: &str, samples: Vec<f64>) -> Claim {
        Claim::new(text, ClaimType::Pattern, samples, 0.95).unwrap()
    }

    #[test]
    fn test_delta_table_boundaries() {
        assert_eq!(reputation_delta(1.0), 100);
        assert_eq!(reputation_delta(0.95), 100);
        assert_eq!(reputation_delta(0.9499), 50);
        assert_eq!(reputation_delta(0.80), 50);
        assert_eq!(reputation_delta(0.7999), 20);
        assert_eq!(reputation_delta(0.60), 20);
        assert_eq!(reputation_delta(0.5999), 0);
        assert_eq!(reputation_delta(0.40), 0);
        assert_eq!(reputation_delta(0.3999), -100);
        assert_eq!(reputation_delta(0.0), -100);
    }

    #[tokio::test]
    async fn test_unknown_agent_auto_registers() {
        let ledger = ReputationLedger::default();
        let cert = ledger.submit(&id("newcomer"), &claim("observation", vec![])).await;
        assert!(!cert.is_denied());
        assert_eq!(ledger.agent_count().await, 1);
        let snap = ledger.snapshot(&id("newcomer")).await.unwrap();
        assert_eq!(snap.verification_count, 1);
        assert_eq!(snap.reputation, 100 + cert.repid_impact());
    }

    #[tokio::test]
    async fn test_suspended_agent_is_denied() {
        let ledger = ReputationLedger::default();
        ledger.register(id("banned"), -1).await.unwrap();
        let submission = ledger
            .submit_detailed(&id("banned"), &claim("pattern", vec![1.0, 2.0, 3.0]))
            .await;
        assert_eq!(submission.certificate.status(), CertificateStatus::AuthorityDenied);
        assert!(submission.change.is_none());
        assert_eq!(submission.snapshot.reputation, -1);
        assert_eq!(submission.snapshot.verification_count, 0);
    }

    #[tokio::test]
    async fn test_register_duplicate_fails() {
        let ledger = ReputationLedger::default();
        ledger.register(id("mel"), 250).await.unwrap();
        assert!(ledger.register(id("mel"), 0).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_history_is_bounded() {
        let config = LedgerConfig {
            initial_reputation: 100,
            snapshot_history_limit: 2,
        };
        let ledger = ReputationLedger::new(StatisticalVerifier::default(), config);
        for _ in 0..4 {
            ledger.submit(&id("mel"), &claim("observation", vec![])).await;
        }
        let snap = ledger.snapshot(&id("mel")).await.unwrap();
        assert_eq!(snap.history.len(), 2);
        assert_eq!(snap.verification_count, 4);
        assert!(snap.history[0].timestamp < snap.history[1].timestamp);
    }

    #[tokio::test]
    async fn test_adopt_remote_only_when_newer() {
        let ledger = ReputationLedger::default();
        let local = ledger.register(id("mel"), 200).await.unwrap();

        let mut stale = local.clone();
        stale.reputation = 999;
        stale.updated_at = local.updated_at - chrono::Duration::seconds(5);
        assert!(!ledger.adopt_remote(&stale).await.unwrap());
        assert_eq!(ledger.snapshot(&id("mel")).await.unwrap().reputation, 200);

        let mut fresh = local.clone();
        fresh.reputation = 320;
        fresh.updated_at = local.updated_at + chrono::Duration::seconds(5);
        assert!(ledger.adopt_remote(&fresh).await.unwrap());
        let snap = ledger.snapshot(&id("mel")).await.unwrap();
        assert_eq!(snap.reputation, 320);
        assert_eq!(snap.tier, Tier::Senior);
    }

    #[tokio::test]
    async fn test_adopt_remote_registers_unknown_agent() {
        let ledger = ReputationLedger::default();
        let snap = Agent::new(id("remote-only"), 450).snapshot(10);
        assert!(ledger.adopt_remote(&snap).await.unwrap());
        assert_eq!(ledger.tier(&id("remote-only")).await, Some(Tier::Senior));
    }
}
