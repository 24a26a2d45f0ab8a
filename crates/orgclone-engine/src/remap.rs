//! ID remapper.
//!
//! Accumulates, per entity type, the mapping from source primary key to the
//! primary key minted in the target organization. One remapper is created
//! per clone job and dropped with it; mappings are never shared across jobs.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use orgclone_core::{Error, RecordId, Result};

/// Source-to-target id mapping for one entity type.
#[derive(Debug, Default, Clone)]
pub struct IdMap {
    entries: HashMap<RecordId, RecordId>,
}

impl IdMap {
    pub fn get(&self, old_id: &RecordId) -> Option<&RecordId> {
        self.entries.get(old_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordId, &RecordId)> {
        self.entries.iter()
    }
}

/// Job-scoped registry of [`IdMap`]s.
#[derive(Debug, Default)]
pub struct IdRemapper {
    maps: HashMap<String, IdMap>,
    completed: HashSet<String>,
}

impl IdRemapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that source row `old_id` of `type_name` became `new_id`.
    ///
    /// Maps are append-only: re-recording the same pair is a no-op, mapping
    /// an id to a different target is an error.
    pub fn record_mapping(
        &mut self,
        type_name: &str,
        old_id: RecordId,
        new_id: RecordId,
    ) -> Result<()> {
        let map = self.maps.entry(type_name.to_string()).or_default();
        match map.entries.get(&old_id) {
            Some(existing) if *existing == new_id => Ok(()),
            Some(_) => Err(Error::DuplicateMapping {
                entity_type: type_name.to_string(),
                source_id: old_id,
            }),
            None => {
                trace!(
                    subsystem = "engine",
                    component = "remapper",
                    entity_type = type_name,
                    source_id = %old_id,
                    new_id = %new_id,
                    "Recorded id mapping"
                );
                map.entries.insert(old_id, new_id);
                Ok(())
            }
        }
    }

    /// Mark every row of `type_name` as processed. Lookups into a completed
    /// type that miss are data problems, not ordering problems.
    pub fn mark_complete(&mut self, type_name: &str) {
        self.maps.entry(type_name.to_string()).or_default();
        self.completed.insert(type_name.to_string());
    }

    pub fn is_complete(&self, type_name: &str) -> bool {
        self.completed.contains(type_name)
    }

    pub fn lookup(&self, type_name: &str, old_id: &RecordId) -> Option<&RecordId> {
        self.maps.get(type_name).and_then(|m| m.get(old_id))
    }

    /// Mapped id if any, otherwise `old_id` unchanged.
    ///
    /// Only for references into shared lookup tables that are never part of
    /// a clone; tenant-scoped references must use [`lookup`](Self::lookup).
    pub fn lookup_or_original(&self, type_name: &str, old_id: &RecordId) -> RecordId {
        self.lookup(type_name, old_id)
            .cloned()
            .unwrap_or_else(|| old_id.clone())
    }

    pub fn map(&self, type_name: &str) -> Option<&IdMap> {
        self.maps.get(type_name)
    }

    /// Total mappings across all types.
    pub fn len(&self) -> usize {
        self.maps.values().map(IdMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
