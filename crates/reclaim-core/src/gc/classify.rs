use reclaim_types::{ReclaimError, Result};
use tracing::debug;

use super::usage::IndexUsage;
use crate::index::Index;
use crate::set::{BlobSet, PackIdSet};

/// Outcome of sorting every pack of an index.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Packs holding live blobs next to dead or duplicate ones.
    pub rewrite: PackIdSet,
    /// Packs holding no live blob at all.
    pub remove: PackIdSet,
    /// Bytes of unreferenced entries plus bytes of duplicate copies.
    pub removed_bytes: u64,
}

/// Every pack with at least one entry that is unused or stored more than once.
pub fn find_rewrite_candidates(index: &Index, used: &BlobSet, usage: &IndexUsage) -> PackIdSet {
    let mut rewrite = PackIdSet::new();
    for pack in index.packs() {
        let needs_rewrite = pack
            .entries
            .iter()
            .any(|e| !used.has(&e.handle) || usage.count(&e.handle) > 1);
        if needs_rewrite {
            rewrite.insert(pack.id);
        }
    }
    rewrite
}

/// Move every pack without a live blob from `rewrite` to `remove`.
///
/// Returns the bytes of all unused entries. A dead pack missing from
/// `rewrite` means the bookkeeping disagrees with the index and is fatal.
pub fn sweep_dead_packs(
    index: &Index,
    used: &BlobSet,
    rewrite: &mut PackIdSet,
    remove: &mut PackIdSet,
) -> Result<u64> {
    let mut unused_bytes = 0u64;
    for pack in index.packs() {
        let mut has_active_blob = false;
        for entry in &pack.entries {
            if used.has(&entry.handle) {
                has_active_blob = true;
            } else {
                unused_bytes += u64::from(entry.length);
            }
        }

        if has_active_blob {
            continue;
        }
        if !rewrite.delete(&pack.id) {
            return Err(ReclaimError::InvariantViolation(pack.id));
        }
        debug!(pack = %pack.id, "pack has no live blobs");
        remove.insert(pack.id);
    }
    Ok(unused_bytes)
}

/// Partition the packs of `index` into rewrite and remove sets.
pub fn classify(index: &Index, used: &BlobSet, usage: &IndexUsage) -> Result<Classification> {
    let mut rewrite = find_rewrite_candidates(index, used, usage);
    let mut remove = PackIdSet::new();
    let unused_bytes = sweep_dead_packs(index, used, &mut rewrite, &mut remove)?;
    Ok(Classification {
        rewrite,
        remove,
        removed_bytes: usage.duplicate_bytes + unused_bytes,
    })
}

impl Classification {
    /// Rewrite and remove ids together, sorted.
    #[cfg(test)]
    pub fn all_packs(&self) -> Vec<reclaim_types::PackId> {
        let mut ids = self.rewrite.sorted();
        ids.extend(self.remove.sorted());
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.rewrite.is_empty() && self.remove.is_empty()
    }
}
