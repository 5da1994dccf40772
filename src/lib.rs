//! RepID Cascade - claim verification and reputation-gated propagation
//!
//! Agents submit statistical claims with supporting samples. Each claim is
//! run through a fixed verification battery, certified, and scored into the
//! agent's reputation (RepID). Strong certificates from trusted agents
//! cascade to every eligible peer. State is mirrored into an external KV
//! store so multiple instances converge.
//!
//! ## Layers
//!
//! | Module | Role |
//! |--------|------|
//! | `stats` | distributions and hypothesis tests |
//! | `verification` | the seven-phase battery and composite score |
//! | `certificate` | immutable, hashed audit records |
//! | `ledger` | agents, tiers, RepID movement |
//! | `cascade` | trigger predicate, eligibility, dispatch |
//! | `store` | KV contract, HTTP/memory backends, state sync |
//! | `service` | the facade hosts call |
//!
//! ## Example
//!
//! ```no_run
//! use repid_cascade::{AgentId, CascadeConfig, CascadeService, Claim, ClaimType};
//!
//! # async fn run() -> anyhow::Result<()> {
//! repid_cascade::telemetry::init_tracing();
//! let service = CascadeService::from_config(&CascadeConfig::default())?;
//! let claim = Claim::new("golden ratio pattern", ClaimType::Pattern, vec![1.61, 1.62, 1.618], 0.95)?;
//! let receipt = service.submit_tracked(&AgentId::new("mel")?, &claim, 0.97).await;
//! println!("{} -> {}", receipt.certificate.hash(), receipt.certificate.status());
//! # Ok(())
//! # }
//! ```

pub mod cascade;
pub mod certificate;
pub mod config;
pub mod error;
pub mod ledger;
pub mod service;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod verification;

pub use cascade_types::{
    AgentSnapshot, CascadeDispatch, CascadeEvent, CascadePayload, CascadeStatus,
    CertificateStatus, Claim, ClaimError, ClaimType, HistoryEntry, PhaseKind, PhaseOutcome,
    PhaseReport, ReputationChange, SubCheck, Tier, VerificationReport,
};

pub use cascade::{CascadeCoordinator, CascadeSettings, CascadeThresholds, EligibilityCriteria, TriggerInput};
pub use certificate::Certificate;
pub use config::{CascadeConfig, StoreConfig};
pub use error::{ConfigError, LedgerError, ServiceError, StoreError};
pub use ledger::{reputation_delta, AgentId, LedgerConfig, ReputationLedger, Submission};
pub use service::{CascadeService, SubmissionReceipt};
pub use store::{HttpKvStore, KeySpace, KvStore, MemoryKvStore, StateSync, SyncReport};
pub use verification::{StatisticalVerifier, VerifierConfig};
