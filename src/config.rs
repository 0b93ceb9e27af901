//! Configuration management for windowguard.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GuardError, Result};
use crate::gate::{GatePolicy, MissingKeyPolicy, DEFAULT_SHARED_KEY};
use crate::ratelimit::{
    LimitPolicy, RateLimitKey, DEFAULT_KEY_PREFIX, DEFAULT_MAX_REQUESTS, DEFAULT_STORE_TIMEOUT,
    DEFAULT_WINDOW,
};

/// Prefix for environment overrides, e.g. `WINDOWGUARD__LIMIT__MAX_REQUESTS`.
pub const ENV_PREFIX: &str = "WINDOWGUARD";

/// Main configuration for windowguard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Limit applied to every key
    #[serde(default)]
    pub limit: LimitConfig,

    /// Admission gate policies
    #[serde(default)]
    pub gate: GateConfig,

    /// Backing store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Maximum requests per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_max_requests() -> u32 {
    DEFAULT_MAX_REQUESTS
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW.as_secs()
}

/// Handling of requests without a caller identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyMode {
    Reject,
    SharedDefaultKey,
}

/// Admission gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Admit requests when the store cannot answer
    #[serde(default)]
    pub fail_open_on_store_unavailable: bool,

    /// What to do when no caller identity is present; must be set
    #[serde(default)]
    pub missing_key_policy: Option<MissingKeyMode>,

    /// Key shared by anonymous callers under `shared_default_key`
    #[serde(default = "default_shared_key")]
    pub shared_key: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            fail_open_on_store_unavailable: false,
            missing_key_policy: None,
            shared_key: default_shared_key(),
        }
    }
}

fn default_shared_key() -> String {
    DEFAULT_SHARED_KEY.to_string()
}

/// Which limiter backs the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    /// Distributed limiter over an in-process [`MemoryStore`](crate::ratelimit::MemoryStore)
    Memory,
    Redis,
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Limiter backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Namespace prefix for store keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Bound on each store round trip in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Idle key sweep interval for the local limiter; disabled when unset
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            store_timeout_ms: default_store_timeout_ms(),
            sweep_interval_secs: None,
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT.as_millis() as u64
}

impl StoreConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }
}

impl GuardConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional file, then apply environment
    /// overrides such as `WINDOWGUARD__GATE__FAIL_OPEN_ON_STORE_UNAVAILABLE=true`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(config::File::from(path));
        }

        let config: GuardConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// The validated limit.
    pub fn limit_policy(&self) -> Result<LimitPolicy> {
        LimitPolicy::new(
            self.limit.max_requests,
            Duration::from_secs(self.limit.window_secs),
        )
    }

    /// The validated gate policy.
    pub fn gate_policy(&self) -> Result<GatePolicy> {
        let limit = self.limit_policy()?;
        let missing_key = match self.gate.missing_key_policy {
            None => {
                return Err(GuardError::InvalidConfiguration(
                    "gate.missing_key_policy must be set to reject or shared_default_key"
                        .to_string(),
                ))
            }
            Some(MissingKeyMode::Reject) => MissingKeyPolicy::Reject,
            Some(MissingKeyMode::SharedDefaultKey) => {
                let key = RateLimitKey::new(self.gate.shared_key.as_str()).map_err(|_| {
                    GuardError::InvalidConfiguration(
                        "shared_key must be non-empty with shared_default_key".to_string(),
                    )
                })?;
                MissingKeyPolicy::SharedDefaultKey(key)
            }
        };

        Ok(GatePolicy::new(limit, missing_key).fail_open(self.gate.fail_open_on_store_unavailable))
    }

    /// Check every setting, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        self.gate_policy()?;
        if self.store.store_timeout_ms == 0 {
            return Err(GuardError::InvalidConfiguration(
                "store_timeout_ms must be positive".to_string(),
            ));
        }
        if self.store.sweep_interval_secs == Some(0) {
            return Err(GuardError::InvalidConfiguration(
                "sweep_interval_secs must be positive when set".to_string(),
            ));
        }
        if self.store.key_prefix.is_empty() {
            return Err(GuardError::InvalidConfiguration(
                "key_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GuardConfig::default();
        assert_eq!(config.limit.max_requests, 100);
        assert_eq!(config.limit.window_secs, 60);
        assert!(!config.gate.fail_open_on_store_unavailable);
        assert_eq!(config.gate.missing_key_policy, None);
        assert_eq!(config.store.backend, BackendKind::Local);
        assert_eq!(config.store.key_prefix, "rate");
        assert_eq!(config.store.store_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_key_policy_must_be_explicit() {
        let config = GuardConfig::default();
        assert!(matches!(
            config.validate(),
            Err(GuardError::InvalidConfiguration(msg)) if msg.contains("missing_key_policy")
        ));

        let config = GuardConfig::from_yaml("gate:\n  missing_key_policy: reject\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.gate_policy().unwrap().missing_key, MissingKeyPolicy::Reject);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
limit:
  max_requests: 20
  window_secs: 10
gate:
  fail_open_on_store_unavailable: true
  missing_key_policy: shared_default_key
  shared_key: guests
store:
  backend: redis
  redis_url: redis://cache:6379/2
  store_timeout_ms: 100
  sweep_interval_secs: 30
"#;
        let config = GuardConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.backend, BackendKind::Redis);
        assert_eq!(config.store.redis_url, "redis://cache:6379/2");
        assert_eq!(config.store.sweep_interval(), Some(Duration::from_secs(30)));

        let policy = config.gate_policy().unwrap();
        assert_eq!(policy.limit.max_requests(), 20);
        assert_eq!(policy.limit.window(), Duration::from_secs(10));
        assert!(policy.fail_open_on_store_unavailable);
        assert_eq!(
            policy.missing_key,
            MissingKeyPolicy::SharedDefaultKey(RateLimitKey::new("guests").unwrap())
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = GuardConfig::from_yaml("limit:\n  max_requests: 5\n").unwrap();
        assert_eq!(config.limit.max_requests, 5);
        assert_eq!(config.limit.window_secs, 60);
        assert_eq!(config.gate.shared_key, "anonymous");
    }

    #[test]
    fn test_zero_limit_is_invalid() {
        let yaml = "limit:\n  max_requests: 0\ngate:\n  missing_key_policy: reject\n";
        let config = GuardConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(GuardError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_window_is_invalid() {
        let config = GuardConfig::from_yaml("limit:\n  window_secs: 0\n").unwrap();
        assert!(matches!(
            config.limit_policy(),
            Err(GuardError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_empty_shared_key_is_invalid() {
        let yaml = "gate:\n  missing_key_policy: shared_default_key\n  shared_key: \"\"\n";
        let config = GuardConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.gate_policy(),
            Err(GuardError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_unknown_missing_key_policy_rejected() {
        let result = GuardConfig::from_yaml("gate:\n  missing_key_policy: allow\n");
        assert!(matches!(result, Err(GuardError::Config(_))));
    }

    // Env overrides and the file are checked in one test since the
    // process environment is shared between test threads.
    #[test]
    fn test_load_file_then_env_overrides() {
        let path = std::env::temp_dir().join(format!("windowguard-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "limit:\n  max_requests: 7\n  window_secs: 3\ngate:\n  missing_key_policy: reject\n",
        )
        .unwrap();

        let config = GuardConfig::load(Some(&path)).unwrap();
        assert_eq!(config.limit.max_requests, 7);
        assert_eq!(config.limit.window_secs, 3);
        assert_eq!(config.store.backend, BackendKind::Local);

        std::env::set_var("WINDOWGUARD__LIMIT__MAX_REQUESTS", "11");
        std::env::set_var("WINDOWGUARD__GATE__FAIL_OPEN_ON_STORE_UNAVAILABLE", "true");
        let loaded = GuardConfig::load(Some(&path));
        std::env::remove_var("WINDOWGUARD__LIMIT__MAX_REQUESTS");
        std::env::remove_var("WINDOWGUARD__GATE__FAIL_OPEN_ON_STORE_UNAVAILABLE");
        std::fs::remove_file(&path).unwrap();

        let config = loaded.unwrap();
        assert_eq!(config.limit.max_requests, 11);
        assert_eq!(config.limit.window_secs, 3);
        assert!(config.gate.fail_open_on_store_unavailable);
        assert_eq!(config.gate.missing_key_policy, Some(MissingKeyMode::Reject));
    }
}
