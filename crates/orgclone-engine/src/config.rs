//! Engine configuration
//!
//! Loaded from TOML or YAML (chosen by file extension) and validated before
//! any run starts.

use crate::error::ConfigError;
use orgclone_catalog::PhaseSelection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Retry policy for transient API failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// First backoff delay
    pub base_delay_ms: u64,
    /// Backoff cap
    pub max_delay_ms: u64,
    /// Randomize delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

/// Settings for one migration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Organization copied from
    pub source_org_id: String,
    /// Organization copied into
    pub destination_org_id: String,
    /// API base of the source backend
    pub source_base_url: Option<String>,
    /// API base of the destination backend
    pub destination_base_url: Option<String>,
    /// Steps in flight at once
    pub concurrency: usize,
    /// Per-call timeout
    pub call_timeout_ms: u64,
    /// Backoff for retryable failures
    pub retry: RetryPolicy,
    /// Migrate access assurance objects
    pub include_nac: bool,
    /// Migrate endpoint identities (requires `include_nac`)
    pub include_user_macs: bool,
    /// Use the backend's native clone when both orgs share it
    pub prefer_native_clone: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_org_id: String::new(),
            destination_org_id: String::new(),
            source_base_url: None,
            destination_base_url: None,
            concurrency: 8,
            call_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            include_nac: false,
            include_user_macs: false,
            prefer_native_clone: false,
        }
    }
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With source and destination organizations
    #[must_use]
    pub fn with_orgs(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.source_org_id = source.into();
        self.destination_org_id = destination.into();
        self
    }

    /// With concurrency limit
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// With per-call timeout
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With NAC phase (and optionally user MACs)
    #[inline]
    #[must_use]
    pub fn with_nac(mut self, include_nac: bool, include_user_macs: bool) -> Self {
        self.include_nac = include_nac;
        self.include_user_macs = include_user_macs;
        self
    }

    /// With native clone preference
    #[inline]
    #[must_use]
    pub fn with_native_clone(mut self, prefer: bool) -> Self {
        self.prefer_native_clone = prefer;
        self
    }

    /// With backend base urls
    #[must_use]
    pub fn with_base_urls(mut self, source: Option<String>, destination: Option<String>) -> Self {
        self.source_base_url = source;
        self.destination_base_url = destination;
        self
    }

    /// Per-call timeout as a duration
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Optional phases selected by this configuration
    #[must_use]
    pub fn phases(&self) -> PhaseSelection {
        PhaseSelection {
            nac: self.include_nac,
            user_macs: self.include_user_macs,
        }
    }

    /// Both organizations live on the same backend instance
    #[must_use]
    pub fn shares_backend(&self) -> bool {
        self.source_base_url == self.destination_base_url
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("call_timeout_ms must be greater than 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if self.include_user_macs && !self.include_nac {
            tracing::warn!("include_user_macs has no effect without include_nac");
        }
        Ok(())
    }
}

/// Deserialize a TOML, YAML or JSON file, chosen by extension
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    match extension.as_str() {
        "toml" => toml::from_str(&text).map_err(|e| parse_error(e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str(&text).map_err(|e| parse_error(e.to_string())),
        "json" => serde_json::from_str(&text).map_err(|e| parse_error(e.to_string())),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}
