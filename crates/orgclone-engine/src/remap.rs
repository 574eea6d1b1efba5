//! Identifier remap table
//!
//! Run-scoped map from (kind, source id) to destination id, plus a
//! (kind, name) index of destination resources used by auto-match.
//! Both are sharded concurrent maps: writers to different keys never
//! contend, writers to the same key are serialized by the shard lock.

use crate::error::EngineError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use orgclone_catalog::{DestId, ResourceKind, SourceId};
use serde::Serialize;

/// One recorded mapping
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RemapEntry {
    /// Kind of the mapped resource
    pub kind: ResourceKind,
    /// Id in the source organization
    pub source_id: SourceId,
    /// Id in the destination organization
    pub dest_id: DestId,
}

/// Source-to-destination id mappings of one run
#[derive(Debug, Default)]
pub struct RemapTable {
    ids: DashMap<(ResourceKind, SourceId), DestId>,
    names: DashMap<(ResourceKind, String), DestId>,
}

impl RemapTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mapping.
    ///
    /// Recording the same destination id again is a no-op; a different one
    /// is [`EngineError::DuplicateMapping`] and the first mapping is kept.
    pub fn record_mapping(&self, kind: ResourceKind, source_id: SourceId, dest_id: DestId) -> Result<(), EngineError> {
        match self.ids.entry((kind, source_id)) {
            Entry::Occupied(existing) => {
                if *existing.get() == dest_id {
                    Ok(())
                } else {
                    Err(EngineError::DuplicateMapping {
                        kind,
                        source_id: existing.key().1.clone(),
                        existing: existing.get().clone(),
                        attempted: dest_id,
                    })
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(dest_id);
                Ok(())
            }
        }
    }

    /// Destination id for a source id
    #[must_use]
    pub fn lookup(&self, kind: ResourceKind, source_id: &SourceId) -> Option<DestId> {
        self.ids
            .get(&(kind, source_id.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Index a destination resource by name. The first id seen for a name wins.
    pub fn record_name(&self, kind: ResourceKind, name: &str, dest_id: DestId) {
        self.names.entry((kind, name.to_string())).or_insert(dest_id);
    }

    /// Destination id of the resource named `name`
    #[must_use]
    pub fn lookup_name(&self, kind: ResourceKind, name: &str) -> Option<DestId> {
        self.names
            .get(&(kind, name.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Number of id mappings
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// No mapping recorded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Every mapping, sorted by kind then source id
    #[must_use]
    pub fn entries(&self) -> Vec<RemapEntry> {
        let mut entries: Vec<RemapEntry> = self
            .ids
            .iter()
            .map(|entry| RemapEntry {
                kind: entry.key().0,
                source_id: entry.key().1.clone(),
                dest_id: entry.value().clone(),
            })
            .collect();
        entries.sort();
        entries
    }
}
