//! orgclone catalog
//!
//! Static knowledge about every migratable resource kind:
//! - [`ResourceKind`] and its scope, cardinality and phase
//! - [`KindDescriptor`] dependency and field rules, gathered in a [`Catalog`]
//! - [`DependencyGraph`] tiers computed from the catalog
//! - [`ResourceInstance`] payloads fetched from a source organization
//!
//! # Example
//!
//! ```rust
//! use orgclone_catalog::{tiers, Catalog, PhaseSelection, ResourceKind};
//!
//! let catalog = Catalog::standard();
//! let kinds = catalog.participating(PhaseSelection::core());
//! let tiers = tiers(catalog, &kinds).unwrap();
//! assert!(tiers[0].contains(&ResourceKind::ServicePolicy));
//! ```

#![warn(unreachable_pub)]

pub mod descriptor;
pub mod error;
pub mod field_path;
pub mod graph;
pub mod instance;
pub mod kind;

pub use descriptor::{
    Catalog, DenyFirst, KindDescriptor, NonTransferable, PhaseSelection, ReferenceField, ReferencePolicy,
    BOOKKEEPING_FIELDS,
};
pub use error::CatalogError;
pub use field_path::{Edit, FieldPath};
pub use graph::{tiers, DependencyGraph};
pub use instance::{DestId, InstanceReference, ResourceInstance, SourceId, ORG_SINGLETON_ID};
pub use kind::{Cardinality, Phase, ResourceKind, Scope, UnknownKind};
