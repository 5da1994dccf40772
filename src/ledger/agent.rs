//! Agent identity and per-agent reputation state

use std::fmt;

use cascade_types::{AgentSnapshot, HistoryEntry, ReputationChange, Tier};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::error::LedgerError;

/// Validated agent identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Trim and validate an id. Empty ids and control characters are rejected.
    pub fn new(id: impl AsRef<str>) -> Result<Self, LedgerError> {
        let trimmed = id.as_ref().trim();
        if trimmed.is_empty() {
            return Err(LedgerError::InvalidAgentId {
                id: id.as_ref().to_string(),
                reason: "must not be empty",
            });
        }
        if trimmed.chars().any(char::is_control) {
            return Err(LedgerError::InvalidAgentId {
                id: id.as_ref().to_string(),
                reason: "must not contain control characters",
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for AgentId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AgentId::new(value)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl std::str::FromStr for AgentId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentId::new(s)
    }
}

/// Mutable reputation record for one agent.
///
/// Only the ledger mutates it, and only while holding the agent's lock.
#[derive(Debug, Clone)]
pub struct Agent {
    id: AgentId,
    reputation: i64,
    breakthrough_count: u32,
    false_claim_count: u32,
    verification_count: usize,
    history: Vec<HistoryEntry>,
    updated_at: DateTime<Utc>,
}

impl Agent {
    pub(crate) fn new(id: AgentId, reputation: i64) -> Self {
        Self {
            id,
            reputation,
            breakthrough_count: 0,
            false_claim_count: 0,
            verification_count: 0,
            history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Rebuild from a persisted snapshot; only the retained history comes back
    pub(crate) fn from_snapshot(snapshot: &AgentSnapshot) -> Result<Self, LedgerError> {
        Ok(Self {
            id: AgentId::new(&snapshot.agent_id)?,
            reputation: snapshot.reputation,
            breakthrough_count: snapshot.breakthrough_count,
            false_claim_count: snapshot.false_claim_count,
            verification_count: snapshot.verification_count.max(snapshot.history.len()),
            history: snapshot.history.clone(),
            updated_at: snapshot.updated_at,
        })
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn reputation(&self) -> i64 {
        self.reputation
    }

    pub fn tier(&self) -> Tier {
        Tier::from_reputation(self.reputation)
    }

    pub fn breakthrough_count(&self) -> u32 {
        self.breakthrough_count
    }

    pub fn false_claim_count(&self) -> u32 {
        self.false_claim_count
    }

    /// Certificates issued to this agent, including ones no longer retained
    pub fn verification_count(&self) -> usize {
        self.verification_count
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Wall-clock now, bumped past the last update so per-agent timestamps
    /// strictly increase
    pub(crate) fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        }
    }

    /// Fold a freshly issued certificate into the record
    pub(crate) fn apply(&mut self, certificate: &Certificate) -> ReputationChange {
        let old_reputation = self.reputation;
        let old_tier = self.tier();
        let score = certificate.composite_score();

        self.reputation = certificate.new_reputation();
        if score >= 0.80 {
            self.breakthrough_count = self.breakthrough_count.saturating_add(1);
        }
        if score < 0.40 {
            self.false_claim_count = self.false_claim_count.saturating_add(1);
        }
        self.verification_count += 1;
        self.history.push(certificate.history_entry());
        self.updated_at = certificate.timestamp();

        ReputationChange {
            agent_id: self.id.to_string(),
            old_reputation,
            new_reputation: self.reputation,
            change: certificate.repid_impact(),
            old_tier,
            new_tier: self.tier(),
            certificate_hash: certificate.hash().to_string(),
            timestamp: certificate.timestamp(),
        }
    }

    /// Persistable view keeping the last `history_limit` entries
    pub fn snapshot(&self, history_limit: usize) -> AgentSnapshot {
        let skip = self.history.len().saturating_sub(history_limit);
        AgentSnapshot {
            agent_id: self.id.to_string(),
            reputation: self.reputation,
            tier: self.tier(),
            breakthrough_count: self.breakthrough_count,
            false_claim_count: self.false_claim_count,
            verification_count: self.verification_count,
            updated_at: self.updated_at,
            history: self.history[skip..].to_vec(),
        }
    }
}
