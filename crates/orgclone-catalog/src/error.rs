//! Catalog errors
//!
//! Every variant is detected before any resource is touched: catalog
//! inconsistencies while ordering kinds, malformed payloads while building
//! instances.

use crate::kind::ResourceKind;

/// Errors raised while validating a catalog or ordering its kinds
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// The kind-level dependency graph is not acyclic
    #[error("dependency cycle: {0}")]
    Cycle(String),

    /// A reference field targets a kind missing from `depends_on`
    #[error("inconsistent catalog: {kind} references {target} at '{path}' without depending on it")]
    InconsistentReference {
        /// Kind declaring the reference
        kind: ResourceKind,
        /// Kind the field points at
        target: ResourceKind,
        /// Field path of the reference
        path: String,
    },

    /// A kind lists itself as a dependency
    #[error("inconsistent catalog: {0} depends on itself")]
    SelfDependency(ResourceKind),

    /// A descriptor declares a path that addresses nothing
    #[error("inconsistent catalog: {0} declares an empty field path")]
    EmptyFieldPath(ResourceKind),

    /// A fetched collection member carries neither an `id` nor a name
    #[error("malformed {kind} payload: no 'id' or '{field}' field")]
    MalformedPayload {
        /// Kind of the payload
        kind: ResourceKind,
        /// Name field the kind is keyed by when `id` is absent
        field: String,
    },

    /// A participating kind has no descriptor
    #[error("kind {0} is not described by the catalog")]
    Undescribed(ResourceKind),
}
