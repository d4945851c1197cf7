use std::collections::HashMap;
use std::sync::atomic::AtomicBool;

use rayon::prelude::*;
use reclaim_types::{BlobHandle, Result};
use tracing::debug;

use super::walk::{find_used_blobs, MarkState};
use super::{check_interrupted, PrunePhase, PruneProgressEvent, ProgressSink, TreeLoader};
use crate::index::Index;
use crate::set::BlobSet;
use crate::snapshot::Snapshot;

/// Occurrence count of every handle across all packs of an index, plus the
/// blob statistics gathered in the same scan.
#[derive(Debug, Clone, Default)]
pub struct IndexUsage {
    counts: HashMap<BlobHandle, u32>,
    pub packs: u64,
    pub blobs: u64,
    pub bytes: u64,
    /// Copies beyond the first of each handle.
    pub duplicate_blobs: u64,
    pub duplicate_bytes: u64,
}

impl IndexUsage {
    /// Number of stored copies of `handle` (0 if the index has none).
    pub fn count(&self, handle: &BlobHandle) -> u32 {
        self.counts.get(handle).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub fn distinct_blobs(&self) -> usize {
        self.counts.len()
    }
}

/// Scan every entry of every pack once.
pub fn count_blobs(index: &Index) -> IndexUsage {
    let mut usage = IndexUsage::default();
    for pack in index.packs() {
        usage.packs += 1;
        for entry in &pack.entries {
            usage.blobs += 1;
            usage.bytes += u64::from(entry.length);

            let count = usage.counts.entry(entry.handle).or_insert(0);
            *count += 1;
            if *count > 1 {
                usage.duplicate_blobs += 1;
                usage.duplicate_bytes += u64::from(entry.length);
            }
        }
    }
    usage
}

/// Walk the root tree of every snapshot on the current rayon pool.
///
/// Returns the used and seen sets. Emits one progress unit per snapshot.
pub fn find_used(
    snapshots: &[Snapshot],
    loader: &dyn TreeLoader,
    progress: &dyn ProgressSink,
    shutdown: Option<&AtomicBool>,
) -> Result<(BlobSet, BlobSet)> {
    progress.on_event(PruneProgressEvent::PhaseStarted {
        phase: PrunePhase::FindUsed,
        total: snapshots.len() as u64,
    });

    let state = MarkState::new();
    snapshots.par_iter().try_for_each(|snapshot| {
        check_interrupted(shutdown)?;
        find_used_blobs(loader, snapshot.root(), &state, shutdown)?;
        debug!(snapshot = %snapshot.id, name = %snapshot.meta.name, "marked snapshot");
        progress.on_event(PruneProgressEvent::Advanced {
            phase: PrunePhase::FindUsed,
            units: 1,
        });
        Ok::<(), reclaim_types::ReclaimError>(())
    })?;

    progress.on_event(PruneProgressEvent::PhaseFinished {
        phase: PrunePhase::FindUsed,
    });
    Ok(state.into_sets())
}
