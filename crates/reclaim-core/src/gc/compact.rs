use std::sync::atomic::AtomicBool;

use rayon::prelude::*;
use reclaim_types::{PackId, ReclaimError, Result};
use tracing::{debug, info, warn};

use super::classify::Classification;
use super::{
    check_interrupted, IndexRebuilder, PackRemover, PrunePhase, PruneProgressEvent, ProgressSink,
    Repacker,
};
use crate::index::{Index, PackRecord};
use crate::set::BlobSet;

/// A pack whose deletion failed. The run continues without it.
#[derive(Debug, Clone)]
pub struct DeleteFailure {
    pub pack_id: PackId,
    pub error: String,
}

#[derive(Debug)]
pub struct CompactOutcome {
    pub packs_rewritten: usize,
    pub new_packs: Vec<PackRecord>,
    /// Packs without live blobs that were deleted.
    pub packs_deleted: usize,
    /// Rewritten source packs deleted after their replacements were written.
    pub superseded_deleted: usize,
    pub delete_failures: Vec<DeleteFailure>,
    /// Index rebuilt after all deletions.
    pub index: Index,
}

/// Applies a classification to the repository: repack, delete, rebuild.
pub struct Compactor<'a> {
    pub repacker: &'a dyn Repacker,
    pub remover: &'a dyn PackRemover,
    pub rebuilder: &'a dyn IndexRebuilder,
    pub progress: &'a dyn ProgressSink,
    pub shutdown: Option<&'a AtomicBool>,
}

impl Compactor<'_> {
    /// Runs on the current rayon pool. A repack failure returns before any
    /// pack is deleted; deletion failures are collected, not returned.
    /// Shutdown is honoured up to the first delete only.
    pub fn run(&self, plan: &Classification, used: &BlobSet) -> Result<CompactOutcome> {
        let rewrite = plan.rewrite.sorted();
        let remove = plan.remove.sorted();

        let new_packs = if rewrite.is_empty() {
            Vec::new()
        } else {
            info!("repacking {} packs", rewrite.len());
            self.repacker
                .repack(&rewrite, used, self.progress, self.shutdown)
                .map_err(|e| match e {
                    ReclaimError::Interrupted => ReclaimError::Interrupted,
                    ReclaimError::Repack(msg) => ReclaimError::Repack(msg),
                    other => ReclaimError::Repack(other.to_string()),
                })?
        };

        check_interrupted(self.shutdown)?;

        // A replacement pack holding exactly the blobs of a source pack hashes
        // to the same id and overwrote it in place. That object is live.
        let (reproduced, superseded): (Vec<PackId>, Vec<PackId>) = rewrite
            .iter()
            .partition(|id| new_packs.iter().any(|p| p.id == **id));
        for id in &reproduced {
            debug!(pack = %id, "repack reproduced pack, keeping it");
        }

        // Past this point the run finishes: deletes and the rebuild ignore
        // shutdown so the persisted index never names a deleted pack.
        let mut targets = remove.clone();
        targets.extend(superseded.iter().copied());
        let delete_failures = self.delete_packs(&targets);

        let failed = |id: &PackId| delete_failures.iter().any(|f| f.pack_id == *id);
        let packs_deleted = remove.iter().filter(|id| !failed(id)).count();
        let superseded_deleted = superseded.iter().filter(|id| !failed(id)).count();

        info!("rebuilding index");
        let index = self
            .rebuilder
            .rebuild_index(self.progress, None)
            .map_err(|e| match e {
                ReclaimError::IndexRebuild(msg) => ReclaimError::IndexRebuild(msg),
                other => ReclaimError::IndexRebuild(other.to_string()),
            })?;

        Ok(CompactOutcome {
            packs_rewritten: rewrite.len(),
            new_packs,
            packs_deleted,
            superseded_deleted,
            delete_failures,
            index,
        })
    }

    fn delete_packs(&self, ids: &[PackId]) -> Vec<DeleteFailure> {
        if ids.is_empty() {
            return Vec::new();
        }
        self.progress.on_event(PruneProgressEvent::PhaseStarted {
            phase: PrunePhase::Delete,
            total: ids.len() as u64,
        });

        let failures: Vec<DeleteFailure> = ids
            .par_iter()
            .filter_map(|id| match self.remover.remove_pack(id) {
                Ok(()) => {
                    debug!(pack = %id, "deleted pack");
                    self.progress.on_event(PruneProgressEvent::Advanced {
                        phase: PrunePhase::Delete,
                        units: 1,
                    });
                    None
                }
                Err(e) => {
                    warn!("failed to delete pack {id}: {e}");
                    Some(DeleteFailure {
                        pack_id: *id,
                        error: e.to_string(),
                    })
                }
            })
            .collect();

        self.progress.on_event(PruneProgressEvent::PhaseFinished {
            phase: PrunePhase::Delete,
        });
        failures
    }
}
