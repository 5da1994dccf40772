//! Cascade Coordinator
//!
//! Decides whether a fresh certificate is strong enough to propagate and,
//! if so, fans it out to every eligible agent.
//!
//! ## State machine
//!
//! ```text
//! Idle -> Evaluating -> Triggered -> Converged
//!              \
//!               -> Idle            (predicate failed)
//! ```
//!
//! `status()` reports where the most recent evaluation ended. Every
//! triggered cascade is appended to the event log, including cascades with
//! no eligible recipients. The log keeps the newest `event_history_limit`
//! events.

use cascade_types::{
    AgentSnapshot, CascadeDispatch, CascadeEvent, CascadePayload, CascadeStatus, Tier,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::certificate::Certificate;

// ============================================================================
// Configuration
// ============================================================================

/// Trigger thresholds; every comparison is inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeThresholds {
    pub unity: f64,
    pub composite_score: f64,
    pub statistical_confidence: f64,
}

impl Default for CascadeThresholds {
    fn default() -> Self {
        Self {
            unity: 0.95,
            composite_score: 0.80,
            statistical_confidence: 0.90,
        }
    }
}

/// Who receives a cascade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityCriteria {
    pub min_tier: Tier,
    /// Reputation must be strictly above this
    pub reputation_above: i64,
    pub min_breakthroughs: u32,
    /// False claims must be strictly below this
    pub false_claims_below: u32,
}

impl Default for EligibilityCriteria {
    fn default() -> Self {
        Self {
            min_tier: Tier::Qualified,
            reputation_above: 0,
            min_breakthroughs: 1,
            false_claims_below: 3,
        }
    }
}

impl EligibilityCriteria {
    pub fn is_eligible(&self, snapshot: &AgentSnapshot) -> bool {
        snapshot.derived_tier() >= self.min_tier
            && snapshot.reputation > self.reputation_above
            && snapshot.breakthrough_count >= self.min_breakthroughs
            && snapshot.false_claim_count < self.false_claims_below
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeSettings {
    pub thresholds: CascadeThresholds,
    pub eligibility: EligibilityCriteria,
    /// Events retained in memory; older ones are dropped first
    pub event_history_limit: usize,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            thresholds: CascadeThresholds::default(),
            eligibility: EligibilityCriteria::default(),
            event_history_limit: 1000,
        }
    }
}

// ============================================================================
// Trigger
// ============================================================================

/// Inputs to the trigger predicate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerInput {
    pub unity: f64,
    pub composite_score: f64,
    pub statistical_confidence: f64,
    pub initiator_tier: Tier,
}

impl TriggerInput {
    pub fn from_certificate(certificate: &Certificate, unity: f64) -> Self {
        Self {
            unity,
            composite_score: certificate.composite_score(),
            statistical_confidence: certificate.statistical_confidence(),
            initiator_tier: certificate.new_tier(),
        }
    }
}

impl CascadeThresholds {
    /// NaN inputs never trigger
    pub fn should_trigger(&self, input: &TriggerInput) -> bool {
        input.unity >= self.unity
            && input.composite_score >= self.composite_score
            && input.statistical_confidence >= self.statistical_confidence
            && input.initiator_tier != Tier::Suspended
    }
}

// ============================================================================
// Coordinator
// ============================================================================

#[derive(Debug)]
pub struct CascadeCoordinator {
    settings: CascadeSettings,
    status: Mutex<CascadeStatus>,
    events: Mutex<Vec<CascadeEvent>>,
}

impl Default for CascadeCoordinator {
    fn default() -> Self {
        Self::new(CascadeSettings::default())
    }
}

impl CascadeCoordinator {
    pub fn new(settings: CascadeSettings) -> Self {
        Self {
            settings,
            status: Mutex::new(CascadeStatus::Idle),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &CascadeSettings {
        &self.settings
    }

    pub fn should_trigger(&self, input: &TriggerInput) -> bool {
        self.settings.thresholds.should_trigger(input)
    }

    /// Ids of eligible agents, sorted
    pub fn eligible_agents(&self, snapshots: &[AgentSnapshot]) -> Vec<String> {
        let mut ids: Vec<String> = snapshots
            .iter()
            .filter(|s| self.settings.eligibility.is_eligible(s))
            .map(|s| s.agent_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Evaluate a certificate against the predicate. On trigger, builds one
    /// dispatch per eligible agent and records the event.
    pub async fn evaluate(
        &self,
        certificate: &Certificate,
        initiator_tier: Tier,
        unity: f64,
        candidates: &[AgentSnapshot],
    ) -> Option<CascadeEvent> {
        let mut status = self.status.lock().await;
        *status = CascadeStatus::Evaluating;

        let input = TriggerInput {
            initiator_tier,
            ..TriggerInput::from_certificate(certificate, unity)
        };
        if !self.should_trigger(&input) {
            debug!(
                hash = %certificate.hash(),
                unity,
                composite_score = input.composite_score,
                statistical_confidence = input.statistical_confidence,
                "cascade not triggered"
            );
            *status = CascadeStatus::Idle;
            return None;
        }
        *status = CascadeStatus::Triggered;

        let eligible = self.eligible_agents(candidates);
        let payload = CascadePayload {
            certificate_hash: certificate.hash().to_string(),
            claim_text: certificate.claim_text().to_string(),
            composite_score: certificate.composite_score(),
            statistical_confidence: certificate.statistical_confidence(),
            unity,
            initiating_tier: initiator_tier,
            certificate_timestamp: certificate.timestamp(),
        };
        let sync_id = Uuid::new_v4();
        let dispatches: Vec<CascadeDispatch> = eligible
            .iter()
            .map(|target| CascadeDispatch {
                target_agent_id: target.clone(),
                sync_id: Uuid::new_v4(),
                payload: payload.clone(),
            })
            .collect();

        let event = CascadeEvent {
            sync_id,
            initiating_agent_id: certificate.agent_id().to_string(),
            eligible_agent_ids: eligible,
            payload,
            status: CascadeStatus::Converged,
            dispatches,
            created_at: Utc::now(),
        };

        info!(
            sync_id = %event.sync_id,
            initiator = %event.initiating_agent_id,
            recipients = event.dispatches.len(),
            unity,
            "cascade triggered"
        );

        let mut events = self.events.lock().await;
        events.push(event.clone());
        let excess = events.len().saturating_sub(self.settings.event_history_limit.max(1));
        events.drain(..excess);
        drop(events);

        *status = CascadeStatus::Converged;
        Some(event)
    }

    pub async fn status(&self) -> CascadeStatus {
        *self.status.lock().await
    }

    /// Copy of the retained event log, oldest first
    pub async fn events(&self) -> Vec<CascadeEvent> {
        self.events.lock().await.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn input(unity: f64, score: f64, confidence: f64, tier: Tier) -> TriggerInput {
        TriggerInput {
            unity,
            composite_score: score,
            statistical_confidence: confidence,
            initiator_tier: tier,
        }
    }

    fn snapshot(id: &str, reputation: i64, breakthroughs: u32, false_claims: u32) -> AgentSnapshot {
        AgentSnapshot {
            agent_id: id.into(),
            reputation,
            tier: Tier::from_reputation(reputation),
            breakthrough_count: breakthroughs,
            false_claim_count: false_claims,
            verification_count: 1,
            updated_at: Utc::now(),
            history: vec![],
        }
    }

    #[test]
    fn test_trigger_boundaries_are_inclusive() {
        let t = CascadeThresholds::default();
        assert!(t.should_trigger(&input(0.95, 0.80, 0.90, Tier::Qualified)));
        assert!(!t.should_trigger(&input(0.9499, 0.80, 0.90, Tier::Qualified)));
        assert!(!t.should_trigger(&input(0.95, 0.79, 0.90, Tier::Qualified)));
        assert!(!t.should_trigger(&input(0.95, 0.80, 0.89, Tier::Qualified)));
        assert!(!t.should_trigger(&input(0.99, 0.99, 0.99, Tier::Suspended)));
        assert!(!t.should_trigger(&input(f64::NAN, 0.99, 0.99, Tier::Master)));
    }

    #[test]
    fn test_eligibility_filter() {
        let coordinator = CascadeCoordinator::default();
        let snapshots = vec![
            snapshot("senior", 320, 2, 0),
            snapshot("apprentice", 120, 5, 0),
            snapshot("no-breakthroughs", 200, 0, 0),
            snapshot("liar", 400, 3, 3),
            snapshot("qualified", 150, 1, 2),
        ];
        assert_eq!(
            coordinator.eligible_agents(&snapshots),
            vec!["qualified".to_string(), "senior".to_string()]
        );
    }

    #[test]
    fn test_eligibility_uses_derived_tier() {
        let criteria = EligibilityCriteria::default();
        let mut s = snapshot("mislabelled", 100, 1, 0);
        s.tier = Tier::Master;
        assert!(!criteria.is_eligible(&s));
    }

    fn certificate(score: f64, confidence: f64) -> Certificate {
        let claim = cascade_types::Claim::new(
            "golden ratio pattern",
            cascade_types::ClaimType::Pattern,
            vec![1.0],
            0.95,
        )
        .unwrap();
        let mut report = cascade_types::VerificationReport::not_run("fixture");
        report.composite_score = score;
        report.statistical_confidence = confidence;
        Certificate::issue("mel", &claim, report, 100, 350, Utc::now())
    }

    #[tokio::test]
    async fn test_evaluate_dispatches_to_each_eligible_agent() {
        let coordinator = CascadeCoordinator::default();
        let cert = certificate(0.96, 0.95);
        let candidates = vec![
            snapshot("mel", 350, 1, 0),
            snapshot("joel", 200, 1, 0),
            snapshot("apprentice", 50, 1, 0),
        ];
        let event = coordinator
            .evaluate(&cert, Tier::Senior, 0.97, &candidates)
            .await
            .unwrap();
        assert_eq!(event.eligible_agent_ids, vec!["joel", "mel"]);
        assert_eq!(event.dispatches.len(), 2);
        assert_ne!(event.dispatches[0].sync_id, event.dispatches[1].sync_id);
        assert_eq!(event.payload.certificate_hash, cert.hash());
        assert_eq!(event.status, CascadeStatus::Converged);
        assert_eq!(coordinator.status().await, CascadeStatus::Converged);
        assert_eq!(coordinator.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_eligible_set_still_recorded() {
        let coordinator = CascadeCoordinator::default();
        let event = coordinator
            .evaluate(&certificate(0.96, 0.95), Tier::Senior, 0.99, &[])
            .await
            .unwrap();
        assert!(event.dispatches.is_empty());
        assert_eq!(coordinator.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_event_log_keeps_newest() {
        let coordinator = CascadeCoordinator::new(CascadeSettings {
            event_history_limit: 2,
            ..CascadeSettings::default()
        });
        let mut ids = Vec::new();
        for _ in 0..3 {
            let event = coordinator
                .evaluate(&certificate(0.96, 0.95), Tier::Senior, 0.99, &[])
                .await
                .unwrap();
            ids.push(event.sync_id);
        }
        let events = coordinator.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sync_id, ids[1]);
        assert_eq!(events[1].sync_id, ids[2]);
    }

    #[tokio::test]
    async fn test_exact_threshold_certificate_triggers() {
        let coordinator = CascadeCoordinator::new(CascadeSettings {
            thresholds: CascadeThresholds {
                unity: 0.96,
                ..CascadeThresholds::default()
            },
            ..CascadeSettings::default()
        });
        let at_threshold = coordinator
            .evaluate(&certificate(0.80, 0.95), Tier::Senior, 0.96, &[])
            .await;
        assert!(at_threshold.is_some());

        let below_unity = coordinator
            .evaluate(&certificate(0.80, 0.95), Tier::Senior, 0.9599, &[])
            .await;
        assert!(below_unity.is_none());

        let below_score = coordinator
            .evaluate(&certificate(0.7999, 0.95), Tier::Senior, 0.96, &[])
            .await;
        assert!(below_score.is_none());
        assert_eq!(coordinator.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_predicate_returns_to_idle() {
        let coordinator = CascadeCoordinator::default();
        let out = coordinator
            .evaluate(&certificate(0.96, 0.95), Tier::Senior, 0.5, &[])
            .await;
        assert!(out.is_none());
        assert_eq!(coordinator.status().await, CascadeStatus::Idle);
        assert!(coordinator.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_initial_status_is_idle() {
        let coordinator = CascadeCoordinator::default();
        assert_eq!(coordinator.status().await, CascadeStatus::Idle);
        assert!(coordinator.events().await.is_empty());
    }
}
