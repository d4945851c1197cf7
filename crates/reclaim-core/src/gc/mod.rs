//! Mark-sweep-compact over content-addressed packs.
//!
//! The pieces run in order: [`usage`] marks every blob reachable from the
//! retained snapshots and counts physical copies, [`classify`] partitions packs
//! into rewrite and remove sets, and [`compact`] rewrites, deletes and rebuilds
//! the index. Everything that touches storage sits behind the traits below.

pub mod classify;
pub mod compact;
pub mod usage;
pub mod walk;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use reclaim_types::{BlobHandle, BlobId, PackId, ReclaimError, Result};

pub use crate::index::PackSource;
use crate::index::{Index, PackRecord};
use crate::set::BlobSet;
use crate::snapshot::Snapshot;

/// A direct child of a tree blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeChild {
    Subtree(BlobId),
    Data(BlobId),
}

impl TreeChild {
    pub fn handle(&self) -> BlobHandle {
        match *self {
            TreeChild::Subtree(id) => BlobHandle::tree(id),
            TreeChild::Data(id) => BlobHandle::data(id),
        }
    }
}

/// Resolves a tree handle to its ordered children.
pub trait TreeLoader: Sync {
    /// Fails if the tree cannot be located, read or decoded.
    fn load_tree(&self, handle: &BlobHandle) -> Result<Vec<TreeChild>>;
}

/// Loads every retained snapshot.
pub trait SnapshotSource {
    fn load_snapshots(&self) -> Result<Vec<Snapshot>>;
}

/// Removes one pack object from the backend.
pub trait PackRemover: Sync {
    fn remove_pack(&self, id: &PackId) -> Result<()>;
}

/// Writes replacement packs holding the kept blobs of the given packs.
///
/// Implementations write one surviving copy per handle and never delete the
/// source packs.
pub trait Repacker: Sync {
    fn repack(
        &self,
        packs: &[PackId],
        keep: &BlobSet,
        progress: &dyn ProgressSink,
        shutdown: Option<&AtomicBool>,
    ) -> Result<Vec<PackRecord>>;
}

/// Rebuilds (and persists) the index from the packs currently stored.
pub trait IndexRebuilder: Sync {
    fn rebuild_index(
        &self,
        progress: &dyn ProgressSink,
        shutdown: Option<&AtomicBool>,
    ) -> Result<Index>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrunePhase {
    BuildIndex,
    FindUsed,
    Repack,
    Delete,
}

impl PrunePhase {
    /// Unit label shown next to progress counters.
    pub fn label(&self) -> &'static str {
        match self {
            PrunePhase::BuildIndex => "packs",
            PrunePhase::FindUsed => "snapshots",
            PrunePhase::Repack => "packs rewritten",
            PrunePhase::Delete => "packs deleted",
        }
    }
}

impl fmt::Display for PrunePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrunePhase::BuildIndex => "building index",
            PrunePhase::FindUsed => "finding data still in use",
            PrunePhase::Repack => "repacking",
            PrunePhase::Delete => "deleting packs",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneProgressEvent {
    PhaseStarted { phase: PrunePhase, total: u64 },
    Advanced { phase: PrunePhase, units: u64 },
    PhaseFinished { phase: PrunePhase },
}

/// Receives progress events. Must tolerate calls from several worker threads.
pub trait ProgressSink: Sync {
    fn on_event(&self, event: PruneProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_event(&self, _event: PruneProgressEvent) {}
}

impl<F> ProgressSink for F
where
    F: Fn(PruneProgressEvent) + Sync,
{
    fn on_event(&self, event: PruneProgressEvent) {
        self(event)
    }
}

/// Return `Err(ReclaimError::Interrupted)` if the shutdown flag is set.
pub fn check_interrupted(shutdown: Option<&AtomicBool>) -> Result<()> {
    if shutdown.is_some_and(|f| f.load(Ordering::Relaxed)) {
        return Err(ReclaimError::Interrupted);
    }
    Ok(())
}
