//! Service configuration
//!
//! Loaded from YAML, then overridden from the environment (`.env` honoured):
//!
//! | Variable | Field |
//! |----------|-------|
//! | `REPID_CONFIG` | path of the YAML file to start from |
//! | `REPID_KV_URL` | `store.base_url` |
//! | `REPID_KV_TOKEN` | `store.api_token` |
//! | `REPID_KV_NAMESPACE` | `store.namespace` |
//! | `REPID_KV_TIMEOUT_MS` | `store.request_timeout_ms` |
//! | `REPID_SEED` | `verifier.seed` |
//! | `REPID_UNITY_THRESHOLD` | `cascade.thresholds.unity` |

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::cascade::CascadeSettings;
use crate::error::ConfigError;
use crate::ledger::LedgerConfig;
use crate::store::{KeySpace, RetryPolicy};
use crate::verification::VerifierConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub verifier: VerifierConfig,
    pub ledger: LedgerConfig,
    pub cascade: CascadeSettings,
    pub store: StoreConfig,
}

/// KV backend settings. Sync is disabled when `base_url` is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub namespace: String,
    pub request_timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub retry_queue_capacity: usize,
    /// Background flush of the retry queue; 0 disables the worker
    pub flush_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            namespace: "repid".to_string(),
            request_timeout_ms: 5_000,
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            retry_queue_capacity: 1024,
            flush_interval_ms: 30_000,
        }
    }
}

impl StoreConfig {
    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            request_timeout: self.request_timeout(),
            queue_capacity: self.retry_queue_capacity,
        }
    }

    /// `None` when the background flush is disabled
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_ms > 0).then(|| Duration::from_millis(self.flush_interval_ms))
    }

    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(self.namespace.clone())
    }
}

impl CascadeConfig {
    /// Load from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::load_from_str(&content)
    }

    /// Load from a YAML string and validate
    pub fn load_from_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `REPID_CONFIG` file (or defaults) with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var("REPID_CONFIG") {
            Ok(path) => Self::load_from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `REPID_*` overrides from any lookup source
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REPID_KV_URL") {
            self.store.base_url = Some(url);
        }
        if let Some(token) = lookup("REPID_KV_TOKEN") {
            self.store.api_token = Some(token);
        }
        if let Some(namespace) = lookup("REPID_KV_NAMESPACE") {
            self.store.namespace = namespace;
        }
        if let Some(ms) = lookup("REPID_KV_TIMEOUT_MS") {
            self.store.request_timeout_ms = parse_var("REPID_KV_TIMEOUT_MS", &ms)?;
        }
        if let Some(seed) = lookup("REPID_SEED") {
            self.verifier.seed = parse_var("REPID_SEED", &seed)?;
        }
        if let Some(unity) = lookup("REPID_UNITY_THRESHOLD") {
            self.cascade.thresholds.unity = parse_var("REPID_UNITY_THRESHOLD", &unity)?;
        }
        debug!(kv_enabled = self.store.is_enabled(), "applied environment overrides");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.verifier.weights.is_valid() {
            return Err(ConfigError::Invalid(
                "verifier.weights must be non-negative with at least one positive weight".into(),
            ));
        }
        let sig = &self.verifier.significance;
        if !(sig.leniency > 0.0 && sig.leniency <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "verifier.significance.leniency must be in (0, 1], got {}",
                sig.leniency
            )));
        }
        if self.verifier.reproducibility.groups < 2 {
            return Err(ConfigError::Invalid(
                "verifier.reproducibility.groups must be at least 2".into(),
            ));
        }
        if self.verifier.cross_validation.max_folds < 2 {
            return Err(ConfigError::Invalid(
                "verifier.cross_validation.max_folds must be at least 2".into(),
            ));
        }
        let quorum = self.verifier.peer_review.quorum;
        if !(1..=3).contains(&quorum) {
            return Err(ConfigError::Invalid(format!(
                "verifier.peer_review.quorum must be between 1 and 3, got {quorum}"
            )));
        }

        let t = &self.cascade.thresholds;
        for (name, value) in [
            ("unity", t.unity),
            ("composite_score", t.composite_score),
            ("statistical_confidence", t.statistical_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "cascade.thresholds.{name} must be in [0, 1], got {value}"
                )));
            }
        }

        if self.cascade.event_history_limit == 0 {
            return Err(ConfigError::Invalid(
                "cascade.event_history_limit must be at least 1".into(),
            ));
        }

        if let Some(base_url) = &self.store.base_url {
            Url::parse(base_url).map_err(|e| {
                ConfigError::Invalid(format!("store.base_url '{base_url}' is not a URL: {e}"))
            })?;
        }
        if self.store.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("store.namespace must not be empty".into()));
        }
        if self.store.max_attempts == 0 {
            return Err(ConfigError::Invalid("store.max_attempts must be at least 1".into()));
        }
        if self.store.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store.request_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{name}='{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = CascadeConfig::default();
        config.validate().unwrap();
        assert!(!config.store.is_enabled());
        assert_eq!(config.ledger.snapshot_history_limit, 10);
        assert_eq!(config.cascade.thresholds.unity, 0.95);
        assert_eq!(config.cascade.event_history_limit, 1000);
    }

    #[test]
    fn test_zero_event_history_rejected() {
        let err = CascadeConfig::load_from_str("cascade:\n  event_history_limit: 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("event_history_limit"));
    }

    #[test]
    fn test_load_partial_yaml() {
        let yaml = r#"
verifier:
  seed: 7
cascade:
  thresholds:
    unity: 0.9
  eligibility:
    min_tier: SENIOR
store:
  base_url: "http://127.0.0.1:8787"
  namespace: trinity
"#;
        let config = CascadeConfig::load_from_str(yaml).unwrap();
        assert_eq!(config.verifier.seed, 7);
        assert_eq!(config.cascade.thresholds.unity, 0.9);
        assert_eq!(config.cascade.thresholds.composite_score, 0.80);
        assert_eq!(
            config.cascade.eligibility.min_tier,
            cascade_types::Tier::Senior
        );
        assert!(config.store.is_enabled());
        assert_eq!(config.store.key_space().agent("mel"), "trinity:agent:mel");
        assert_eq!(config.store.retry_policy().max_attempts, 3);
        assert_eq!(config.store.flush_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = CascadeConfig::load_from_str("cascade:\n  thresholds:\n    unity: 1.5\n")
            .unwrap_err();
        assert!(err.to_string().contains("cascade.thresholds.unity"));
    }

    #[test]
    fn test_bad_yaml_is_parse_error() {
        assert!(matches!(
            CascadeConfig::load_from_str("verifier: [unclosed"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("REPID_KV_URL", "https://kv.example.com/ns"),
            ("REPID_KV_TOKEN", "secret"),
            ("REPID_SEED", "1234"),
        ]);
        let mut config = CascadeConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.store.base_url.as_deref(), Some("https://kv.example.com/ns"));
        assert_eq!(config.store.api_token.as_deref(), Some("secret"));
        assert_eq!(config.verifier.seed, 1234);
    }

    #[test]
    fn test_bad_override_value() {
        let mut config = CascadeConfig::default();
        let err = config
            .apply_overrides(|name| (name == "REPID_SEED").then(|| "abc".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("REPID_SEED"));
    }

    #[test]
    fn test_token_not_serialized() {
        let mut config = CascadeConfig::default();
        config.store.api_token = Some("secret".into());
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("secret"));
    }
}
