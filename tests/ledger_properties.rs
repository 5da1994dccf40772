//! Ledger invariants: bounds, purity, monotonicity, lockout, serialization

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use repid_cascade::{
    reputation_delta, CertificateStatus, Claim, ClaimType, ReputationLedger, StatisticalVerifier,
    Tier,
};

#[path = "helpers/fixtures.rs"]
mod fixtures;

use fixtures::*;

// ============================================================================
// Properties
// ============================================================================

fn arb_sample() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(
        prop_oneof![
            8 => -1.0e4..1.0e4f64,
            1 => Just(f64::NAN),
            1 => Just(0.0f64),
        ],
        0..60,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn scores_stay_in_unit_interval(
        sample in arb_sample(),
        confidence in 0.5..0.999f64,
        text in "[a-z %0-9]{0,40}",
    ) {
        let claim = Claim::new(text, ClaimType::Pattern, sample, confidence).unwrap();
        let report = StatisticalVerifier::default().verify(&claim);
        prop_assert!((0.0..=1.0).contains(&report.composite_score));
        prop_assert!((0.0..=1.0).contains(&report.statistical_confidence));
        prop_assert_eq!(report.phases.len(), 7);
    }

    #[test]
    fn verification_is_deterministic(sample in arb_sample(), seed in any::<u64>()) {
        let claim = Claim::new("pattern", ClaimType::Pattern, sample, 0.95).unwrap();
        let verifier = StatisticalVerifier::default().with_seed(seed);
        // JSON so that NaN statistics compare equal
        let first = serde_json::to_string(&verifier.verify(&claim)).unwrap();
        let second = serde_json::to_string(&verifier.verify(&claim)).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn tier_is_monotone_in_reputation(a in any::<i64>(), b in any::<i64>()) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(Tier::from_reputation(lo) <= Tier::from_reputation(hi));
    }

    #[test]
    fn delta_is_pure_and_monotone(a in 0.0..=1.0f64, b in 0.0..=1.0f64) {
        prop_assert_eq!(reputation_delta(a), reputation_delta(a));
        prop_assert!([100, 50, 20, 0, -100].contains(&reputation_delta(a)));
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(reputation_delta(lo) <= reputation_delta(hi));
    }

    #[test]
    fn status_band_matches_delta(score in 0.0..=1.0f64) {
        let expected = match reputation_delta(score) {
            100 => CertificateStatus::VerifiedBreakthrough,
            50 => CertificateStatus::VerifiedSignificant,
            20 => CertificateStatus::Promising,
            0 => CertificateStatus::InsufficientEvidence,
            _ => CertificateStatus::Failed,
        };
        prop_assert_eq!(CertificateStatus::from_score(score), expected);
    }
}

// ============================================================================
// Ledger behaviour
// ============================================================================

#[test]
fn test_tier_boundaries() {
    assert_eq!(Tier::from_reputation(-1), Tier::Suspended);
    assert_eq!(Tier::from_reputation(0), Tier::Apprentice);
    assert_eq!(Tier::from_reputation(149), Tier::Apprentice);
    assert_eq!(Tier::from_reputation(150), Tier::Qualified);
    assert_eq!(Tier::from_reputation(299), Tier::Qualified);
    assert_eq!(Tier::from_reputation(300), Tier::Senior);
    assert_eq!(Tier::from_reputation(499), Tier::Senior);
    assert_eq!(Tier::from_reputation(500), Tier::Master);
    assert_eq!(Tier::from_reputation(i64::MAX), Tier::Master);
}

#[tokio::test]
async fn test_suspended_agent_never_moves() {
    let ledger = ReputationLedger::default();
    ledger.register(agent("banned"), -50).await.unwrap();

    for claim in [breakthrough_claim(), steady_claim(), overclaim()] {
        let cert = ledger.submit(&agent("banned"), &claim).await;
        assert_eq!(cert.status(), CertificateStatus::AuthorityDenied);
        assert_eq!(cert.composite_score(), 0.0);
        assert_eq!(cert.repid_impact(), 0);
        assert!(cert.report().phases.is_empty());
    }

    let snap = ledger.snapshot(&agent("banned")).await.unwrap();
    assert_eq!(snap.reputation, -50);
    assert_eq!(snap.false_claim_count, 0);
    assert_eq!(snap.verification_count, 0);
    assert!(snap.history.is_empty());
}

#[tokio::test]
async fn test_reverification_yields_same_outcome() {
    let first = ReputationLedger::default();
    let second = ReputationLedger::default();
    first.register(agent("mel"), 200).await.unwrap();
    second.register(agent("mel"), 200).await.unwrap();

    let a = first.submit(&agent("mel"), &steady_claim()).await;
    let b = second.submit(&agent("mel"), &steady_claim()).await;
    assert!(a.same_outcome(&b));
    assert_ne!(a.hash(), b.hash());
    assert!(a.verify_hash() && b.verify_hash());
}

#[tokio::test]
async fn test_breakthrough_claim_counts() {
    let ledger = ReputationLedger::default();
    ledger.register(agent("mel"), 450).await.unwrap();
    let submission = ledger
        .submit_detailed(&agent("mel"), &breakthrough_claim())
        .await;
    let cert = &submission.certificate;
    assert_eq!(cert.status(), CertificateStatus::VerifiedBreakthrough);
    assert_eq!(cert.statistical_confidence(), 1.0);
    assert_eq!(cert.new_reputation(), 550);
    assert_eq!(submission.snapshot.breakthrough_count, 1);
    assert_eq!(submission.initiator_tier(), Tier::Master);
    assert!(submission.change.unwrap().tier_changed());
}

#[tokio::test]
async fn test_reputation_saturates() {
    let ledger = ReputationLedger::default();
    ledger.register(agent("max"), i64::MAX - 10).await.unwrap();
    let cert = ledger.submit(&agent("max"), &breakthrough_claim()).await;
    assert_eq!(cert.new_reputation(), i64::MAX);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_are_serialized() {
    let ledger = Arc::new(ReputationLedger::default());
    ledger.register(agent("mel"), 200).await.unwrap();

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.submit(&agent("mel"), &steady_claim()).await })
        })
        .collect();

    let mut reputations = HashSet::new();
    let mut hashes = HashSet::new();
    for handle in handles {
        let cert = handle.await.unwrap();
        assert_eq!(cert.repid_impact(), 20);
        reputations.insert(cert.new_reputation());
        hashes.insert(cert.hash().to_string());
    }

    // every update observed a distinct predecessor: none lost
    let expected: HashSet<i64> = (1..=40).map(|i| 200 + 20 * i).collect();
    assert_eq!(reputations, expected);
    assert_eq!(hashes.len(), 40);

    let snap = ledger.snapshot(&agent("mel")).await.unwrap();
    assert_eq!(snap.reputation, 1000);
    assert_eq!(snap.verification_count, 40);
    assert_eq!(snap.history.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_agents_progress_independently() {
    let ledger = Arc::new(ReputationLedger::default());
    let names = ["a", "b", "c", "d"];
    for name in names {
        ledger.register(agent(name), 200).await.unwrap();
    }

    let mut handles = Vec::new();
    for name in names {
        for _ in 0..5 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.submit(&agent(name), &steady_claim()).await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for snap in ledger.snapshots().await {
        assert_eq!(snap.reputation, 300);
        assert_eq!(snap.tier, Tier::Senior);
    }
    assert_eq!(ledger.agent_count().await, 4);
}

#[test]
fn test_claim_rejects_bad_confidence() {
    assert!(Claim::new("x", ClaimType::Pattern, vec![], 1.5).is_err());
    assert!(Claim::new("x", ClaimType::Pattern, vec![], f64::NAN).is_err());
}
