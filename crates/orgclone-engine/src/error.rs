//! Error types for the migration engine
//!
//! Per-resource failures never surface as `Err` from a run; they are
//! recorded as step results. Only [`EngineError`] aborts a run:
//! - configuration problems, raised before any mutating call
//! - duplicate id mappings (an invariant violation)
//! - source inventory collection failures, malformed payloads included

use orgclone_catalog::{CatalogError, DestId, ResourceKind, SourceId};
use std::path::PathBuf;
use std::time::Duration;

/// Failure reported by a source or destination API call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The call did not complete within the per-call timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The backend asked us to slow down
    #[error("rate limited")]
    RateLimited,

    /// The backend is temporarily unavailable
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The payload was rejected
    #[error("validation failed: {0}")]
    Validation(String),

    /// The credentials lack the required privilege
    #[error("permission denied: {0}")]
    Permission(String),

    /// The write conflicts with existing state
    #[error("conflict: {message}")]
    Conflict {
        /// Backend message
        message: String,
        /// The conflict is a name collision with an existing resource
        already_exists: bool,
    },

    /// The addressed resource does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl ApiError {
    /// Transient failures (timeout, rate limit, unavailable) are retried
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited | Self::Unavailable(_))
    }

    /// Conflict caused by a resource with the same name
    #[inline]
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Conflict { already_exists: true, .. })
    }

    /// Create an "already exists" conflict
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            already_exists: true,
        }
    }
}

/// Failure rewriting one payload for the destination
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    /// A required reference has no destination mapping
    #[error("unresolved reference to {target} '{source_id}' at '{path}'")]
    UnresolvedReference {
        /// Referenced kind
        target: ResourceKind,
        /// Referenced source id
        source_id: SourceId,
        /// Field path holding the reference
        path: String,
    },
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid for its format
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// The extension is not toml, yaml or json
    #[error("unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Run-fatal errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid selection or run setup
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Catalog cycle or inconsistency
    #[error("configuration error: {0}")]
    Catalog(#[from] CatalogError),

    /// Invalid engine configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A (kind, source id) pair was mapped to two destination ids
    #[error("duplicate mapping for {kind} '{source_id}': already '{existing}', refused '{attempted}'")]
    DuplicateMapping {
        /// Mapped kind
        kind: ResourceKind,
        /// Source id
        source_id: SourceId,
        /// Destination id already recorded
        existing: DestId,
        /// Destination id that was refused
        attempted: DestId,
    },

    /// A source payload cannot be keyed
    #[error("source inventory rejected: {0}")]
    MalformedPayload(#[source] CatalogError),

    /// Source inventory could not be collected
    #[error("source inventory failed for {kind}: {error}")]
    Inventory {
        /// Kind being listed
        kind: ResourceKind,
        /// Underlying API error
        error: ApiError,
    },
}

impl EngineError {
    /// Raised before any mutating call
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Catalog(_) | Self::Config(_))
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(ApiError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ApiError::RateLimited.is_retryable());
        assert!(ApiError::Unavailable("503".into()).is_retryable());
        assert!(!ApiError::Validation("bad".into()).is_retryable());
        assert!(!ApiError::Permission("no".into()).is_retryable());
        assert!(!ApiError::already_exists("dup").is_retryable());
        assert!(!ApiError::NotFound("gone".into()).is_retryable());
    }

    #[test]
    fn only_name_conflicts_count_as_existing() {
        assert!(ApiError::already_exists("name taken").is_already_exists());
        let other = ApiError::Conflict {
            message: "version mismatch".into(),
            already_exists: false,
        };
        assert!(!other.is_already_exists());
    }

    #[test]
    fn catalog_errors_are_configuration_errors() {
        let err = EngineError::from(CatalogError::Cycle("sso -> sso_role -> sso".into()));
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "configuration error: dependency cycle: sso -> sso_role -> sso");
    }
}
