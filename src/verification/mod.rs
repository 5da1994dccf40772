//! Statistical Verification Module
//!
//! Runs the fixed verification battery over a claim's sample and folds the
//! phase outcomes into a composite score.
//!
//! ## Phases
//!
//! | # | Phase | Weighted |
//! |---|-------|----------|
//! | 1 | Significance (t-test, fed by goodness-of-fit) | 0.30 |
//! | 2 | Goodness-of-fit (chi-square) | via 1 |
//! | 3 | Normality (Shapiro-Wilk) | informational |
//! | 4 | Reproducibility (split groups + bootstrap) | 0.20 |
//! | 5 | Cross-validation (k-fold) | 0.20 |
//! | 6 | Reality anchor | 0.15 |
//! | 7 | Peer review (three pseudo-reviewers) | 0.15 |
//!
//! Skipped and errored phases drop out of the denominator; the remaining
//! weights are renormalized. The verifier is pure: the same claim, history
//! length and seed always produce the same report.

pub mod config;
mod phases;

pub use config::{
    CrossValidationConfig, PeerReviewConfig, PhaseWeights, RealityAnchorConfig,
    ReproducibilityConfig, SignificanceConfig, VerifierConfig,
};

use cascade_types::{Claim, PhaseOutcome, PhaseReport, VerificationReport};
use tracing::debug;

/// Stateless runner of the verification battery
#[derive(Debug, Clone, Default)]
pub struct StatisticalVerifier {
    config: VerifierConfig,
}

impl StatisticalVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Same configuration with a different bootstrap seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify a claim from an agent with no prior verifications
    pub fn verify(&self, claim: &Claim) -> VerificationReport {
        self.verify_with_history(claim, 0)
    }

    /// Verify a claim; `prior_verifications` feeds the reproducibility reviewer
    pub fn verify_with_history(&self, claim: &Claim, prior_verifications: usize) -> VerificationReport {
        let cfg = &self.config;
        let (sample, notes) = sanitize(claim.samples());

        let evidence = phases::significance(
            &sample,
            claim.confidence_required(),
            cfg.null_mean,
            &cfg.significance,
        );
        let reproducibility = phases::reproducibility(&sample, cfg.seed, &cfg.reproducibility);
        let cross_validation = phases::cross_validation(&sample, &cfg.cross_validation);
        let reality = phases::reality_anchor(claim.text(), &evidence, &cfg.reality_anchor);
        let peer = phases::peer_review(
            claim.text(),
            evidence.confidence,
            reproducibility.outcome.is_passed(),
            prior_verifications,
            &cfg.peer_review,
        );

        let w = &cfg.weights;
        let composite_score = composite(&[
            (w.significance, evidence.significance.outcome),
            (w.reproducibility, reproducibility.outcome),
            (w.cross_validation, cross_validation.outcome),
            (w.reality_anchor, reality.outcome),
            (w.peer_review, peer.outcome),
        ]);

        let statistical_confidence = evidence.confidence.clamp(0.0, 1.0);
        let phases: Vec<PhaseReport> = vec![
            evidence.significance,
            evidence.goodness_of_fit,
            evidence.normality,
            reproducibility,
            cross_validation,
            reality,
            peer,
        ];

        debug!(
            claim_type = %claim.claim_type(),
            sample_size = sample.len(),
            composite_score,
            statistical_confidence,
            "verification complete"
        );

        VerificationReport {
            phases,
            composite_score,
            statistical_confidence,
            sample_size: sample.len(),
            data_quality_notes: notes,
            seed: cfg.seed,
        }
    }
}

/// Drop NaN/Inf values, recording what was removed
fn sanitize(samples: &[f64]) -> (Vec<f64>, Vec<String>) {
    let finite: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    let mut notes = Vec::new();
    let dropped = samples.len() - finite.len();
    if dropped > 0 {
        notes.push(format!("dropped {dropped} non-finite value(s) from the sample"));
    }
    if finite.is_empty() {
        notes.push("no finite samples to analyse".to_string());
    }
    (finite, notes)
}

/// Weighted pass fraction over the phases that actually ran
fn composite(weighted: &[(f64, PhaseOutcome)]) -> f64 {
    let (num, den) = weighted
        .iter()
        .filter(|(_, outcome)| outcome.is_included())
        .fold((0.0, 0.0), |(num, den), (w, outcome)| {
            let hit = if outcome.is_passed() { *w } else { 0.0 };
            (num + hit, den + w)
        });
    if den <= 0.0 {
        0.0
    } else {
        (num / den).clamp(0.0, 1.0)
    }
}
