//! Claim certificates
//!
//! A certificate is the immutable, content-addressed audit record of one
//! submission: the claim, its verification report and the reputation
//! impact. Certificates are only minted by the reputation ledger.

use cascade_types::{
    CertificateStatus, Claim, ClaimType, HistoryEntry, Tier, VerificationReport,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Immutable verification certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    agent_id: String,
    claim_text: String,
    claim_type: ClaimType,
    report: VerificationReport,
    composite_score: f64,
    statistical_confidence: f64,
    status: CertificateStatus,
    repid_impact: i64,
    new_reputation: i64,
    new_tier: Tier,
    timestamp: DateTime<Utc>,
    hash: String,
}

/// Deterministic digest over (claim text, composite score, timestamp)
pub fn content_hash(claim_text: &str, composite_score: f64, timestamp: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(claim_text.as_bytes());
    hasher.update(b"|");
    hasher.update(composite_score.to_bits().to_be_bytes());
    hasher.update(b"|");
    hasher.update(
        timestamp
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
            .as_bytes(),
    );
    hex::encode(hasher.finalize())
}

impl Certificate {
    /// Certificate for a verified claim
    pub(crate) fn issue(
        agent_id: &str,
        claim: &Claim,
        report: VerificationReport,
        repid_impact: i64,
        new_reputation: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let composite_score = report.composite_score;
        Self {
            agent_id: agent_id.to_string(),
            claim_text: claim.text().to_string(),
            claim_type: claim.claim_type().clone(),
            statistical_confidence: report.statistical_confidence,
            status: CertificateStatus::from_score(composite_score),
            composite_score,
            report,
            repid_impact,
            new_reputation,
            new_tier: Tier::from_reputation(new_reputation),
            hash: content_hash(claim.text(), composite_score, &timestamp),
            timestamp,
        }
    }

    /// Rejection for a claim from a suspended agent; nothing was verified
    pub(crate) fn denied(
        agent_id: &str,
        claim: &Claim,
        reputation: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            claim_text: claim.text().to_string(),
            claim_type: claim.claim_type().clone(),
            report: VerificationReport::not_run("agent suspended: verification not run"),
            composite_score: 0.0,
            statistical_confidence: 0.0,
            status: CertificateStatus::AuthorityDenied,
            repid_impact: 0,
            new_reputation: reputation,
            new_tier: Tier::from_reputation(reputation),
            hash: content_hash(claim.text(), 0.0, &timestamp),
            timestamp,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn claim_text(&self) -> &str {
        &self.claim_text
    }

    pub fn claim_type(&self) -> &ClaimType {
        &self.claim_type
    }

    pub fn report(&self) -> &VerificationReport {
        &self.report
    }

    pub fn composite_score(&self) -> f64 {
        self.composite_score
    }

    pub fn statistical_confidence(&self) -> f64 {
        self.statistical_confidence
    }

    pub fn status(&self) -> CertificateStatus {
        self.status
    }

    pub fn repid_impact(&self) -> i64 {
        self.repid_impact
    }

    pub fn new_reputation(&self) -> i64 {
        self.new_reputation
    }

    pub fn new_tier(&self) -> Tier {
        self.new_tier
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_denied(&self) -> bool {
        self.status == CertificateStatus::AuthorityDenied
    }

    /// Whether the stored hash matches the certificate's content
    pub fn verify_hash(&self) -> bool {
        self.hash == content_hash(&self.claim_text, self.composite_score, &self.timestamp)
    }

    /// Compare every field except timestamp and hash
    pub fn same_outcome(&self, other: &Certificate) -> bool {
        self.agent_id == other.agent_id
            && self.claim_text == other.claim_text
            && self.claim_type == other.claim_type
            && self.report == other.report
            && self.composite_score == other.composite_score
            && self.statistical_confidence == other.statistical_confidence
            && self.status == other.status
            && self.repid_impact == other.repid_impact
            && self.new_reputation == other.new_reputation
            && self.new_tier == other.new_tier
    }

    /// Compact entry for an agent's history
    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            hash: self.hash.clone(),
            timestamp: self.timestamp,
            claim_text: self.claim_text.clone(),
            composite_score: self.composite_score,
            statistical_confidence: self.statistical_confidence,
            status: self.status,
            repid_impact: self.repid_impact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claim() -> Claim {
        Claim::new("a pattern", ClaimType::Pattern, vec![1.0, 2.0], 0.95).unwrap()
    }

    fn report(score: f64) -> VerificationReport {
        let mut r = VerificationReport::not_run("test");
        r.composite_score = score;
        r.statistical_confidence = 0.5;
        r
    }

    #[test]
    fn test_hash_depends_on_each_input() {
        let t = Utc::now();
        let base = content_hash("claim", 0.7, &t);
        assert_eq!(base, content_hash("claim", 0.7, &t));
        assert_ne!(base, content_hash("claim!", 0.7, &t));
        assert_ne!(base, content_hash("claim", 0.70001, &t));
        assert_ne!(base, content_hash("claim", 0.7, &(t + Duration::nanoseconds(1))));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn test_same_outcome_ignores_timestamp() {
        let t = Utc::now();
        let a = Certificate::issue("mel", &claim(), report(0.7), 20, 220, t);
        let b = Certificate::issue("mel", &claim(), report(0.7), 20, 220, t + Duration::seconds(1));
        assert_ne!(a, b);
        assert_ne!(a.hash(), b.hash());
        assert!(a.same_outcome(&b));
        assert!(a.verify_hash());
    }

    #[test]
    fn test_issue_derives_status_and_tier() {
        let c = Certificate::issue("mel", &claim(), report(0.96), 100, 310, Utc::now());
        assert_eq!(c.status(), CertificateStatus::VerifiedBreakthrough);
        assert_eq!(c.new_tier(), Tier::Senior);
        assert_eq!(c.statistical_confidence(), 0.5);
    }

    #[test]
    fn test_denied_certificate() {
        let c = Certificate::denied("mel", &claim(), -50, Utc::now());
        assert!(c.is_denied());
        assert_eq!(c.repid_impact(), 0);
        assert_eq!(c.new_reputation(), -50);
        assert_eq!(c.new_tier(), Tier::Suspended);
        assert!(c.report().phases.is_empty());
    }

    #[test]
    fn test_json_roundtrip_preserves_hash() {
        let c = Certificate::issue("mel", &claim(), report(0.7), 20, 220, Utc::now());
        let json = serde_json::to_string(&c).unwrap();
        let back: Certificate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
        assert!(back.verify_hash());
    }
}
