//! Verifier configuration.
//!
//! Every heuristic threshold of the battery lives here. The defaults are
//! the protocol's reference values; hosts override them from YAML.

use serde::{Deserialize, Serialize};

/// Top-level verifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Seed for bootstrap resampling
    pub seed: u64,
    /// Null-hypothesis mean for the one-sample t-test
    pub null_mean: f64,
    pub weights: PhaseWeights,
    pub significance: SignificanceConfig,
    pub reproducibility: ReproducibilityConfig,
    pub cross_validation: CrossValidationConfig,
    pub reality_anchor: RealityAnchorConfig,
    pub peer_review: PeerReviewConfig,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            null_mean: 0.0,
            weights: PhaseWeights::default(),
            significance: SignificanceConfig::default(),
            reproducibility: ReproducibilityConfig::default(),
            cross_validation: CrossValidationConfig::default(),
            reality_anchor: RealityAnchorConfig::default(),
            peer_review: PeerReviewConfig::default(),
        }
    }
}

/// Composite score weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseWeights {
    pub significance: f64,
    pub reproducibility: f64,
    pub cross_validation: f64,
    pub reality_anchor: f64,
    pub peer_review: f64,
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self {
            significance: 0.30,
            reproducibility: 0.20,
            cross_validation: 0.20,
            reality_anchor: 0.15,
            peer_review: 0.15,
        }
    }
}

impl PhaseWeights {
    /// All weights non-negative and at least one positive
    pub fn is_valid(&self) -> bool {
        let all = [
            self.significance,
            self.reproducibility,
            self.cross_validation,
            self.reality_anchor,
            self.peer_review,
        ];
        all.iter().all(|w| w.is_finite() && *w >= 0.0) && all.iter().any(|w| *w > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceConfig {
    pub min_samples_t_test: usize,
    pub min_samples_goodness_of_fit: usize,
    /// Goodness-of-fit is significant below this p-value
    pub goodness_of_fit_alpha: f64,
    pub min_samples_normality: usize,
    /// Only the first N values go into Shapiro-Wilk
    pub max_samples_normality: usize,
    /// Sample looks normal above this p-value
    pub normality_alpha: f64,
    /// Phase passes when confidence >= confidence_required * leniency
    pub leniency: f64,
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            min_samples_t_test: 2,
            min_samples_goodness_of_fit: 5,
            goodness_of_fit_alpha: 0.05,
            min_samples_normality: 3,
            max_samples_normality: 5000,
            normality_alpha: 0.05,
            leniency: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReproducibilityConfig {
    pub min_samples: usize,
    pub groups: usize,
    /// Group means consistent when std(means) < factor * mean(group stds)
    pub consistency_factor: f64,
    pub bootstrap_samples: usize,
    /// Bootstrap stable when std(resampled means) < tolerance * |mean|
    pub bootstrap_tolerance: f64,
}

impl Default for ReproducibilityConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            groups: 3,
            consistency_factor: 2.0,
            bootstrap_samples: 100,
            bootstrap_tolerance: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationConfig {
    pub min_samples: usize,
    pub max_folds: usize,
    /// Fold passes when |test mean - train mean| <= tolerance * train std
    pub fold_tolerance_std: f64,
    pub pass_fraction: f64,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            max_folds: 5,
            fold_tolerance_std: 2.0,
            pass_fraction: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealityAnchorConfig {
    /// Phrases that mark an absolute claim (matched case-insensitively)
    pub superlatives: Vec<String>,
    /// Absolute claims need a significance p-value at or below this
    pub extraordinary_p_value: f64,
    pub high_percentage: f64,
    pub high_percentage_confidence: f64,
    pub notable_percentage: f64,
    pub notable_percentage_confidence: f64,
}

impl Default for RealityAnchorConfig {
    fn default() -> Self {
        Self {
            superlatives: vec!["100%".into(), "perfect".into(), "unity 1.000".into()],
            extraordinary_p_value: 1e-6,
            high_percentage: 90.0,
            high_percentage_confidence: 0.90,
            notable_percentage: 25.0,
            notable_percentage_confidence: 0.70,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerReviewConfig {
    /// Statistical-rigor reviewer accepts above this confidence
    pub rigor_confidence: f64,
    /// Reproducibility reviewer accepts above this confidence even without
    /// a passing reproducibility phase or prior history
    pub reproducibility_confidence: f64,
    /// Theory reviewer accepts unframed claims above this confidence
    pub framing_confidence: f64,
    pub framing_keywords: Vec<String>,
    /// Votes needed to pass
    pub quorum: usize,
}

impl Default for PeerReviewConfig {
    fn default() -> Self {
        Self {
            rigor_confidence: 0.70,
            reproducibility_confidence: 0.80,
            framing_confidence: 0.85,
            framing_keywords: vec![
                "formula".into(),
                "equation".into(),
                "theorem".into(),
                "conjecture".into(),
                "pattern".into(),
            ],
            quorum: 2,
        }
    }
}
