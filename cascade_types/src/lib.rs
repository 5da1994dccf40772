//! Cascade Types - Foundation Types for the Claim Ledger
//!
//! Pure data structures shared between the verifier, the reputation ledger,
//! the cascade coordinator and the KV state sync. Nothing in here performs
//! I/O or owns mutable state.
//!
//! ## Contents
//!
//! - Authority tiers derived from RepID
//! - Claims (the caller's verification request)
//! - Verification reports and per-phase results
//! - Certificate status labels
//! - Cascade events and dispatches
//! - Agent snapshots as persisted to the KV backend
//!
//! ## Rules
//!
//! 1. **NO I/O** - data structures and derivations only
//! 2. **NO WORKSPACE DEPENDENCIES**
//! 3. **SERIALIZABLE** - every type crosses the KV wire as JSON

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// AUTHORITY TIERS
// ============================================================================

/// Authority tier, a pure function of an agent's RepID.
///
/// Ordering follows authority: `Suspended < Apprentice < ... < Master`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// RepID below zero - may not submit claims
    Suspended,
    /// 0..150
    Apprentice,
    /// 150..300
    Qualified,
    /// 300..500
    Senior,
    /// 500 and above
    Master,
}

impl Tier {
    pub const APPRENTICE_MIN: i64 = 0;
    pub const QUALIFIED_MIN: i64 = 150;
    pub const SENIOR_MIN: i64 = 300;
    pub const MASTER_MIN: i64 = 500;

    /// Derive the tier for a reputation value
    pub fn from_reputation(reputation: i64) -> Self {
        if reputation >= Self::MASTER_MIN {
            Tier::Master
        } else if reputation >= Self::SENIOR_MIN {
            Tier::Senior
        } else if reputation >= Self::QUALIFIED_MIN {
            Tier::Qualified
        } else if reputation >= Self::APPRENTICE_MIN {
            Tier::Apprentice
        } else {
            Tier::Suspended
        }
    }

    /// Whether an agent at this tier may submit new claims
    pub fn can_submit(&self) -> bool {
        !matches!(self, Tier::Suspended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Suspended => "SUSPENDED",
            Tier::Apprentice => "APPRENTICE",
            Tier::Qualified => "QUALIFIED",
            Tier::Senior => "SENIOR",
            Tier::Master => "MASTER",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CLAIMS
// ============================================================================

/// Kind of statistical claim being made
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Pattern,
    Efficiency,
    StatisticalValidation,
    /// Caller-defined tag not known to the protocol
    Other(String),
}

impl ClaimType {
    pub fn as_str(&self) -> &str {
        match self {
            ClaimType::Pattern => "pattern",
            ClaimType::Efficiency => "efficiency",
            ClaimType::StatisticalValidation => "statistical_validation",
            ClaimType::Other(tag) => tag.as_str(),
        }
    }
}

impl std::fmt::Display for ClaimType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ClaimType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "pattern" => ClaimType::Pattern,
            "efficiency" => ClaimType::Efficiency,
            "statistical_validation" => ClaimType::StatisticalValidation,
            other => ClaimType::Other(other.to_string()),
        })
    }
}

/// Errors raised when constructing a claim. These are caller bugs, not
/// data-quality problems.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClaimError {
    #[error("confidence_required must be in (0, 1], got {0}")]
    ConfidenceOutOfRange(f64),
}

/// Wire shape of a verification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub claim_text: String,
    pub claim_type: ClaimType,
    pub sample: Vec<f64>,
    pub confidence_required: f64,
}

/// An immutable claim. Samples are kept exactly as supplied; non-finite
/// values are filtered by the verifier, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClaimRequest", into = "ClaimRequest")]
pub struct Claim {
    text: String,
    claim_type: ClaimType,
    samples: Vec<f64>,
    confidence_required: f64,
}

impl Claim {
    /// Create a claim, rejecting a confidence outside (0, 1]
    pub fn new(
        text: impl Into<String>,
        claim_type: ClaimType,
        samples: Vec<f64>,
        confidence_required: f64,
    ) -> Result<Self, ClaimError> {
        // NaN fails both comparisons
        if !(confidence_required > 0.0 && confidence_required <= 1.0) {
            return Err(ClaimError::ConfidenceOutOfRange(confidence_required));
        }
        Ok(Self {
            text: text.into(),
            claim_type,
            samples,
            confidence_required,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn claim_type(&self) -> &ClaimType {
        &self.claim_type
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn confidence_required(&self) -> f64 {
        self.confidence_required
    }
}

impl TryFrom<ClaimRequest> for Claim {
    type Error = ClaimError;

    fn try_from(req: ClaimRequest) -> Result<Self, Self::Error> {
        Claim::new(
            req.claim_text,
            req.claim_type,
            req.sample,
            req.confidence_required,
        )
    }
}

impl From<Claim> for ClaimRequest {
    fn from(claim: Claim) -> Self {
        Self {
            claim_text: claim.text,
            claim_type: claim.claim_type,
            sample: claim.samples,
            confidence_required: claim.confidence_required,
        }
    }
}

// ============================================================================
// VERIFICATION REPORTS
// ============================================================================

/// The verification battery, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Significance,
    GoodnessOfFit,
    Normality,
    Reproducibility,
    CrossValidation,
    RealityAnchor,
    PeerReview,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Significance => "significance",
            PhaseKind::GoodnessOfFit => "goodness_of_fit",
            PhaseKind::Normality => "normality",
            PhaseKind::Reproducibility => "reproducibility",
            PhaseKind::CrossValidation => "cross_validation",
            PhaseKind::RealityAnchor => "reality_anchor",
            PhaseKind::PeerReview => "peer_review",
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    Passed,
    Failed,
    /// Not enough data to run the phase
    Skipped,
    /// The phase ran but its statistic was undefined (e.g. zero variance)
    Errored,
}

impl PhaseOutcome {
    pub fn from_bool(passed: bool) -> Self {
        if passed {
            PhaseOutcome::Passed
        } else {
            PhaseOutcome::Failed
        }
    }

    /// Whether the outcome counts towards the composite score denominator
    pub fn is_included(&self) -> bool {
        matches!(self, PhaseOutcome::Passed | PhaseOutcome::Failed)
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, PhaseOutcome::Passed)
    }
}

/// A named sub-check inside a phase (a reality check, a reviewer vote,
/// a bootstrap stability check)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl SubCheck {
    pub fn new(name: impl Into<String>, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            detail: detail.into(),
        }
    }
}

/// Result of one verification phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub kind: PhaseKind,
    pub outcome: PhaseOutcome,
    /// Test statistic, when the phase computes one
    pub statistic: Option<f64>,
    /// p-value, when the phase is a hypothesis test
    pub p_value: Option<f64>,
    /// Skip/error reason or a short summary
    pub note: Option<String>,
    #[serde(default)]
    pub checks: Vec<SubCheck>,
}

impl PhaseReport {
    pub fn new(kind: PhaseKind, outcome: PhaseOutcome) -> Self {
        Self {
            kind,
            outcome,
            statistic: None,
            p_value: None,
            note: None,
            checks: Vec::new(),
        }
    }

    pub fn skipped(kind: PhaseKind, reason: impl Into<String>) -> Self {
        Self::new(kind, PhaseOutcome::Skipped).with_note(reason)
    }

    pub fn errored(kind: PhaseKind, reason: impl Into<String>) -> Self {
        Self::new(kind, PhaseOutcome::Errored).with_note(reason)
    }

    pub fn with_statistic(mut self, statistic: f64) -> Self {
        self.statistic = Some(statistic);
        self
    }

    pub fn with_p_value(mut self, p_value: f64) -> Self {
        self.p_value = Some(p_value);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_checks(mut self, checks: Vec<SubCheck>) -> Self {
        self.checks = checks;
        self
    }
}

/// Output of one verifier run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Per-phase results in battery order
    pub phases: Vec<PhaseReport>,
    /// Weighted, renormalized composite in [0, 1]
    pub composite_score: f64,
    /// Fraction of significance sub-tests that were significant, in [0, 1]
    pub statistical_confidence: f64,
    /// Number of finite samples analysed
    pub sample_size: usize,
    /// Notes about the input data (dropped values etc.)
    pub data_quality_notes: Vec<String>,
    /// Seed used for bootstrap resampling
    pub seed: u64,
}

impl VerificationReport {
    pub fn phase(&self, kind: PhaseKind) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.kind == kind)
    }

    pub fn outcome(&self, kind: PhaseKind) -> Option<PhaseOutcome> {
        self.phase(kind).map(|p| p.outcome)
    }

    pub fn passed(&self, kind: PhaseKind) -> bool {
        self.outcome(kind).is_some_and(|o| o.is_passed())
    }

    /// An empty report used for claims that never reached the verifier
    pub fn not_run(reason: impl Into<String>) -> Self {
        Self {
            phases: Vec::new(),
            composite_score: 0.0,
            statistical_confidence: 0.0,
            sample_size: 0,
            data_quality_notes: vec![reason.into()],
            seed: 0,
        }
    }
}

// ============================================================================
// CERTIFICATE STATUS
// ============================================================================

/// Certificate status label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    VerifiedBreakthrough,
    VerifiedSignificant,
    Promising,
    InsufficientEvidence,
    Failed,
    /// Submitted by a suspended agent; never verified
    AuthorityDenied,
}

impl CertificateStatus {
    /// Map a composite score onto a status band
    pub fn from_score(score: f64) -> Self {
        if score >= 0.95 {
            CertificateStatus::VerifiedBreakthrough
        } else if score >= 0.80 {
            CertificateStatus::VerifiedSignificant
        } else if score >= 0.60 {
            CertificateStatus::Promising
        } else if score >= 0.40 {
            CertificateStatus::InsufficientEvidence
        } else {
            CertificateStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::VerifiedBreakthrough => "VERIFIED_BREAKTHROUGH",
            CertificateStatus::VerifiedSignificant => "VERIFIED_SIGNIFICANT",
            CertificateStatus::Promising => "PROMISING",
            CertificateStatus::InsufficientEvidence => "INSUFFICIENT_EVIDENCE",
            CertificateStatus::Failed => "FAILED",
            CertificateStatus::AuthorityDenied => "AUTHORITY_DENIED",
        }
    }
}

impl std::fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CASCADE
// ============================================================================

/// Cascade coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStatus {
    Idle,
    Evaluating,
    Triggered,
    Converged,
}

/// Summary of the certificate that triggered a cascade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadePayload {
    pub certificate_hash: String,
    pub claim_text: String,
    pub composite_score: f64,
    pub statistical_confidence: f64,
    pub unity: f64,
    pub initiating_tier: Tier,
    pub certificate_timestamp: DateTime<Utc>,
}

/// One notification addressed to an eligible agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeDispatch {
    pub target_agent_id: String,
    pub sync_id: Uuid,
    pub payload: CascadePayload,
}

/// A recorded cascade. Recorded even when nobody was eligible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeEvent {
    pub sync_id: Uuid,
    pub initiating_agent_id: String,
    pub eligible_agent_ids: Vec<String>,
    pub payload: CascadePayload,
    pub status: CascadeStatus,
    pub dispatches: Vec<CascadeDispatch>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// AGENT SNAPSHOTS
// ============================================================================

/// Compact record of one certificate kept in an agent's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub claim_text: String,
    pub composite_score: f64,
    pub statistical_confidence: f64,
    pub status: CertificateStatus,
    pub repid_impact: i64,
}

/// Whole-record view of an agent, as persisted to the KV backend.
///
/// `updated_at` drives last-write-wins; `tier` is carried for readers of
/// the store but always re-derived from `reputation` on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub reputation: i64,
    pub tier: Tier,
    pub breakthrough_count: u32,
    pub false_claim_count: u32,
    pub verification_count: usize,
    pub updated_at: DateTime<Utc>,
    /// Most recent history entries, oldest first
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl AgentSnapshot {
    /// Tier recomputed from reputation, ignoring the stored label
    pub fn derived_tier(&self) -> Tier {
        Tier::from_reputation(self.reputation)
    }
}

/// Audit record of one reputation movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationChange {
    pub agent_id: String,
    pub old_reputation: i64,
    pub new_reputation: i64,
    pub change: i64,
    pub old_tier: Tier,
    pub new_tier: Tier,
    pub certificate_hash: String,
    pub timestamp: DateTime<Utc>,
}

impl ReputationChange {
    pub fn tier_changed(&self) -> bool {
        self.old_tier != self.new_tier
    }
}

// ============================================================================
// Tests
// ============================================================================
