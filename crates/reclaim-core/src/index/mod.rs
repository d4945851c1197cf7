use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};
use tracing::debug;

use reclaim_types::{BlobHandle, PackId, Result};

use crate::gc::{check_interrupted, PrunePhase, PruneProgressEvent, ProgressSink};

/// Version tag of the persisted index object.
const INDEX_FORMAT_VERSION: u32 = 1;

/// One stored instance of a blob inside a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackEntry {
    pub handle: BlobHandle,
    /// Offset of the blob data inside the pack (past its length prefix).
    pub offset: u64,
    pub length: u32,
}

/// Inventory of a single pack file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRecord {
    pub id: PackId,
    /// Size of the pack object in bytes.
    pub size: u64,
    pub entries: Vec<PackEntry>,
}

/// Where a copy of a blob can be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLocation {
    pub pack_id: PackId,
    pub offset: u64,
    pub length: u32,
}

/// Totals over every pack in an index.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub packs: usize,
    pub blobs: u64,
    pub bytes: u64,
}

/// Enumerates pack objects and reads their inventories.
pub trait PackSource: Sync {
    /// All pack ids currently present in the backend.
    fn list_packs(&self) -> Result<Vec<PackId>>;

    /// Read the inventory of one pack.
    fn read_pack(&self, id: &PackId) -> Result<PackRecord>;
}

/// Read-only mapping of pack id to pack inventory, built once per run.
///
/// Blob lookups resolve to the first copy seen; which copy that is does not
/// matter because every copy of a handle has identical content.
#[derive(Debug, Clone, Default)]
pub struct Index {
    packs: BTreeMap<PackId, PackRecord>,
    locations: HashMap<BlobHandle, BlobLocation>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    packs: Vec<PackRecord>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index by reading the inventory of every listed pack.
    pub fn build(
        source: &dyn PackSource,
        progress: &dyn ProgressSink,
        shutdown: Option<&AtomicBool>,
    ) -> Result<Self> {
        let ids = source.list_packs()?;
        progress.on_event(PruneProgressEvent::PhaseStarted {
            phase: PrunePhase::BuildIndex,
            total: ids.len() as u64,
        });

        let mut index = Index::new();
        for id in &ids {
            check_interrupted(shutdown)?;
            let record = source.read_pack(id)?;
            debug!(pack = %id, blobs = record.entries.len(), "indexed pack");
            index.insert(record);
            progress.on_event(PruneProgressEvent::Advanced {
                phase: PrunePhase::BuildIndex,
                units: 1,
            });
        }

        progress.on_event(PruneProgressEvent::PhaseFinished {
            phase: PrunePhase::BuildIndex,
        });
        Ok(index)
    }

    /// Add (or replace) a pack record.
    pub fn insert(&mut self, record: PackRecord) {
        for entry in &record.entries {
            self.locations
                .entry(entry.handle)
                .or_insert(BlobLocation {
                    pack_id: record.id,
                    offset: entry.offset,
                    length: entry.length,
                });
        }
        if let Some(previous) = self.packs.insert(record.id, record) {
            // Replaced records may have owned locations; recompute them all.
            debug!(pack = %previous.id, "replaced pack record");
            self.reindex_locations();
        }
    }

    fn reindex_locations(&mut self) {
        self.locations.clear();
        for record in self.packs.values() {
            for entry in &record.entries {
                self.locations
                    .entry(entry.handle)
                    .or_insert(BlobLocation {
                        pack_id: record.id,
                        offset: entry.offset,
                        length: entry.length,
                    });
            }
        }
    }

    pub fn get(&self, id: &PackId) -> Option<&PackRecord> {
        self.packs.get(id)
    }

    #[cfg(test)]
    pub fn contains_pack(&self, id: &PackId) -> bool {
        self.packs.contains_key(id)
    }

    /// Packs in ascending id order.
    pub fn packs(&self) -> impl Iterator<Item = &PackRecord> {
        self.packs.values()
    }

    pub fn locate(&self, handle: &BlobHandle) -> Option<&BlobLocation> {
        self.locations.get(handle)
    }

    pub fn len(&self) -> usize {
        self.packs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    #[cfg(test)]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            packs: self.packs.len(),
            blobs: self.packs.values().map(|p| p.entries.len() as u64).sum(),
            bytes: self.packs.values().map(|p| p.size).sum(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let persisted = PersistedIndex {
            version: INDEX_FORMAT_VERSION,
            packs: self.packs.values().cloned().collect(),
        };
        Ok(rmp_serde::to_vec(&persisted)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let persisted: PersistedIndex = rmp_serde::from_slice(data)?;
        if persisted.version != INDEX_FORMAT_VERSION {
            return Err(reclaim_types::ReclaimError::UnsupportedVersion(
                persisted.version,
            ));
        }
        let mut index = Index::new();
        for record in persisted.packs {
            index.insert(record);
        }
        Ok(index)
    }
}
