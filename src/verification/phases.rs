//! The individual phases of the verification battery.
//!
//! Each phase takes an already-sanitized (finite) sample and returns a
//! `PhaseReport`. Insufficient data yields a skipped phase, never an error.

use std::sync::OnceLock;

use cascade_types::{PhaseKind, PhaseOutcome, PhaseReport, SubCheck};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;

use super::config::{
    CrossValidationConfig, PeerReviewConfig, RealityAnchorConfig, ReproducibilityConfig,
    SignificanceConfig,
};
use crate::stats::{self, TestResult};

// ============================================================================
// Significance (t-test + goodness-of-fit + normality)
// ============================================================================

/// Result of one significance sub-test
#[derive(Debug, Clone)]
enum SubTest {
    Ran {
        result: TestResult,
        significant: bool,
    },
    Skipped(String),
    Errored(String),
}

impl SubTest {
    fn run(
        n: usize,
        min: usize,
        label: &str,
        test: impl FnOnce() -> Result<TestResult, String>,
        is_significant: impl FnOnce(&TestResult) -> bool,
    ) -> Self {
        if n < min {
            return SubTest::Skipped(format!("{label} needs at least {min} samples, got {n}"));
        }
        match test() {
            Ok(result) => SubTest::Ran {
                significant: is_significant(&result),
                result,
            },
            Err(reason) => SubTest::Errored(reason),
        }
    }

    fn into_report(self, kind: PhaseKind) -> PhaseReport {
        match self {
            SubTest::Ran {
                result,
                significant,
            } => PhaseReport::new(kind, PhaseOutcome::from_bool(significant))
                .with_statistic(result.statistic)
                .with_p_value(result.p_value),
            SubTest::Skipped(reason) => PhaseReport::skipped(kind, reason),
            SubTest::Errored(reason) => PhaseReport::errored(kind, reason),
        }
    }
}

/// Aggregate significance evidence consumed by later phases
#[derive(Debug, Clone)]
pub(crate) struct SignificanceEvidence {
    pub significance: PhaseReport,
    pub goodness_of_fit: PhaseReport,
    pub normality: PhaseReport,
    /// Fraction of t-test/goodness-of-fit sub-tests that were significant
    pub confidence: f64,
    /// Smallest p-value among the significance sub-tests that ran
    pub min_p_value: Option<f64>,
}

pub(crate) fn significance(
    sample: &[f64],
    confidence_required: f64,
    null_mean: f64,
    cfg: &SignificanceConfig,
) -> SignificanceEvidence {
    let n = sample.len();
    let alpha_t = 1.0 - confidence_required;

    let t_test = SubTest::run(
        n,
        cfg.min_samples_t_test,
        "t-test",
        || stats::one_sample_t_test(sample, null_mean),
        |r| r.p_value < alpha_t,
    );
    let gof = SubTest::run(
        n,
        cfg.min_samples_goodness_of_fit,
        "goodness-of-fit",
        || stats::chi_square_uniform(sample),
        |r| r.p_value < cfg.goodness_of_fit_alpha,
    );
    let head = &sample[..n.min(cfg.max_samples_normality)];
    let normality = SubTest::run(
        head.len(),
        cfg.min_samples_normality,
        "normality",
        || stats::shapiro_wilk(head),
        |r| r.p_value > cfg.normality_alpha,
    );

    let mut checks = Vec::new();
    let mut valid = 0usize;
    let mut significant = 0usize;
    let mut min_p: Option<f64> = None;
    let mut errors = Vec::new();

    for (name, sub) in [("t_test", &t_test), ("goodness_of_fit", &gof)] {
        match sub {
            SubTest::Ran {
                result,
                significant: sig,
            } => {
                valid += 1;
                if *sig {
                    significant += 1;
                }
                min_p = Some(min_p.map_or(result.p_value, |p| p.min(result.p_value)));
                checks.push(SubCheck::new(
                    name,
                    *sig,
                    format!("statistic={:.6}, p={:.3e}", result.statistic, result.p_value),
                ));
            }
            SubTest::Errored(reason) => errors.push(format!("{name}: {reason}")),
            SubTest::Skipped(_) => {}
        }
    }
    if let SubTest::Ran {
        result,
        significant: normal,
    } = &normality
    {
        checks.push(SubCheck::new(
            "normality",
            *normal,
            format!("W={:.4}, p={:.3e} (informational)", result.statistic, result.p_value),
        ));
    }

    let confidence = if valid == 0 {
        0.0
    } else {
        significant as f64 / valid as f64
    };

    let mut report = if valid == 0 {
        if errors.is_empty() {
            PhaseReport::skipped(
                PhaseKind::Significance,
                format!("no significance test could run on {n} samples"),
            )
        } else {
            PhaseReport::errored(PhaseKind::Significance, errors.join("; "))
        }
    } else {
        let threshold = confidence_required * cfg.leniency;
        PhaseReport::new(
            PhaseKind::Significance,
            PhaseOutcome::from_bool(confidence >= threshold),
        )
        .with_note(format!(
            "confidence {confidence:.3} over {valid} test(s), threshold {threshold:.3}"
        ))
    };
    if let SubTest::Ran { result, .. } = &t_test {
        report = report
            .with_statistic(result.statistic)
            .with_p_value(result.p_value);
    }

    SignificanceEvidence {
        significance: report.with_checks(checks),
        goodness_of_fit: gof.into_report(PhaseKind::GoodnessOfFit),
        normality: normality
            .into_report(PhaseKind::Normality)
            .with_note("informational: passed means the sample looks normal"),
        confidence,
        min_p_value: min_p,
    }
}

// ============================================================================
// Reproducibility
// ============================================================================

pub(crate) fn reproducibility(sample: &[f64], seed: u64, cfg: &ReproducibilityConfig) -> PhaseReport {
    let n = sample.len();
    if n < cfg.min_samples {
        return PhaseReport::skipped(
            PhaseKind::Reproducibility,
            format!("needs at least {} samples, got {n}", cfg.min_samples),
        );
    }

    let groups: Vec<&[f64]> = stats::split_contiguous(sample, cfg.groups)
        .into_iter()
        .filter(|g| !g.is_empty())
        .collect();
    let means: Vec<f64> = groups.iter().filter_map(|g| stats::mean(g)).collect();
    let stds: Vec<f64> = groups
        .iter()
        .filter_map(|g| stats::population_std(g))
        .collect();

    let spread_of_means = if means.len() > 1 {
        stats::population_std(&means).unwrap_or(0.0)
    } else {
        0.0
    };
    let mean_of_stds = stats::mean(&stds).unwrap_or(1.0);
    let consistent = spread_of_means < cfg.consistency_factor * mean_of_stds;

    let mut rng = StdRng::seed_from_u64(seed);
    let resampled: Vec<f64> = (0..cfg.bootstrap_samples)
        .map(|_| {
            let total: f64 = (0..n).map(|_| sample[rng.gen_range(0..n)]).sum();
            total / n as f64
        })
        .collect();
    let original_mean = stats::mean(sample).unwrap_or(0.0);
    let bootstrap_std = stats::population_std(&resampled);
    let (stable, stable_detail) = match bootstrap_std {
        None => (false, "no bootstrap resamples configured".to_string()),
        Some(std) if original_mean != 0.0 => {
            let bound = original_mean.abs() * cfg.bootstrap_tolerance;
            (std < bound, format!("bootstrap std {std:.6} vs bound {bound:.6}"))
        }
        Some(std) => (true, format!("bootstrap std {std:.6}, zero mean")),
    };

    let mut report = PhaseReport::new(
        PhaseKind::Reproducibility,
        PhaseOutcome::from_bool(consistent && stable),
    )
    .with_checks(vec![
        SubCheck::new(
            "mean_consistency",
            consistent,
            format!(
                "std of {} group means {spread_of_means:.6} vs {:.1} x mean group std {mean_of_stds:.6}",
                means.len(),
                cfg.consistency_factor
            ),
        ),
        SubCheck::new("bootstrap_stable", stable, stable_detail),
    ]);
    if let Some(std) = bootstrap_std {
        report = report.with_statistic(std);
    }
    report
}

// ============================================================================
// Cross-validation
// ============================================================================

pub(crate) fn cross_validation(sample: &[f64], cfg: &CrossValidationConfig) -> PhaseReport {
    let n = sample.len();
    let k = cfg.max_folds.min(n / 2);
    if n < cfg.min_samples || k == 0 {
        return PhaseReport::skipped(
            PhaseKind::CrossValidation,
            format!("needs at least {} samples, got {n}", cfg.min_samples),
        );
    }

    let fold_size = n / k;
    let mut folds = Vec::with_capacity(k);
    for i in 0..k {
        let start = i * fold_size;
        let end = start + fold_size;
        let test = &sample[start..end];
        let train: Vec<f64> = sample[..start]
            .iter()
            .chain(&sample[end..])
            .copied()
            .collect();
        let (Some(train_mean), Some(train_std), Some(test_mean)) = (
            stats::mean(&train),
            stats::population_std(&train),
            stats::mean(test),
        ) else {
            continue;
        };
        let within = (test_mean - train_mean).abs() <= cfg.fold_tolerance_std * (train_std + 1e-10);
        folds.push(within);
    }

    let score = if folds.is_empty() {
        0.0
    } else {
        folds.iter().filter(|f| **f).count() as f64 / folds.len() as f64
    };

    PhaseReport::new(
        PhaseKind::CrossValidation,
        PhaseOutcome::from_bool(score >= cfg.pass_fraction),
    )
    .with_statistic(score)
    .with_note(format!("{k} folds of {fold_size}, {:.0}% consistent", score * 100.0))
}

// ============================================================================
// Reality anchor
// ============================================================================

fn percentage_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").ok())
        .as_ref()
}

/// Largest percentage quoted in the claim text, if any
pub(crate) fn max_percentage(text: &str) -> Option<f64> {
    percentage_pattern()?
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
}

pub(crate) fn reality_anchor(
    text: &str,
    evidence: &SignificanceEvidence,
    cfg: &RealityAnchorConfig,
) -> PhaseReport {
    let lower = text.to_lowercase();
    let mut checks = Vec::new();

    if let Some(phrase) = cfg
        .superlatives
        .iter()
        .find(|s| lower.contains(&s.to_lowercase()))
    {
        let passed = evidence
            .min_p_value
            .is_some_and(|p| p <= cfg.extraordinary_p_value);
        checks.push(SubCheck::new(
            "extraordinary_evidence",
            passed,
            format!(
                "'{phrase}' needs p <= {:e}, best p {}",
                cfg.extraordinary_p_value,
                evidence
                    .min_p_value
                    .map_or_else(|| "n/a".to_string(), |p| format!("{p:.3e}"))
            ),
        ));
    }

    if let Some(pct) = max_percentage(text) {
        if pct > cfg.high_percentage {
            checks.push(SubCheck::new(
                "percentage_reality",
                evidence.confidence > cfg.high_percentage_confidence,
                format!(
                    "{pct}% claim needs confidence > {}",
                    cfg.high_percentage_confidence
                ),
            ));
        }
        if pct > cfg.notable_percentage {
            checks.push(SubCheck::new(
                "above_random",
                evidence.confidence > cfg.notable_percentage_confidence,
                format!(
                    "{pct}% claim needs confidence > {}",
                    cfg.notable_percentage_confidence
                ),
            ));
        }
    }

    let passed = checks.iter().all(|c| c.passed);
    let note = if checks.is_empty() {
        "no quantitative assertions to anchor".to_string()
    } else {
        format!(
            "{}/{} reality checks passed",
            checks.iter().filter(|c| c.passed).count(),
            checks.len()
        )
    };
    PhaseReport::new(PhaseKind::RealityAnchor, PhaseOutcome::from_bool(passed))
        .with_note(note)
        .with_checks(checks)
}

// ============================================================================
// Peer review
// ============================================================================

pub(crate) fn peer_review(
    text: &str,
    confidence: f64,
    reproducibility_passed: bool,
    prior_verifications: usize,
    cfg: &PeerReviewConfig,
) -> PhaseReport {
    let lower = text.to_lowercase();

    let rigor = confidence > cfg.rigor_confidence;
    let repro = reproducibility_passed
        || prior_verifications > 0
        || confidence > cfg.reproducibility_confidence;
    let framed = cfg
        .framing_keywords
        .iter()
        .any(|k| lower.contains(&k.to_lowercase()));
    let theory = framed || confidence > cfg.framing_confidence;

    let checks = vec![
        SubCheck::new(
            "statistical_rigor",
            rigor,
            format!("confidence {confidence:.3} vs {}", cfg.rigor_confidence),
        ),
        SubCheck::new(
            "reproducibility_strength",
            repro,
            format!(
                "reproducibility passed: {reproducibility_passed}, prior verifications: {prior_verifications}"
            ),
        ),
        SubCheck::new(
            "theoretical_framing",
            theory,
            if framed {
                "claim states a framework".to_string()
            } else {
                format!("unframed claim, confidence {confidence:.3}")
            },
        ),
    ];
    let votes = checks.iter().filter(|c| c.passed).count();

    PhaseReport::new(
        PhaseKind::PeerReview,
        PhaseOutcome::from_bool(votes >= cfg.quorum),
    )
    .with_statistic(votes as f64)
    .with_note(format!("{votes}/{} reviewers accept", checks.len()))
    .with_checks(checks)
}
