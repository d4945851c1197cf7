use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, MutexGuard};

use reclaim_types::{BlobHandle, BlobKind, Result};
use tracing::trace;

use super::{check_interrupted, TreeChild, TreeLoader};
use crate::set::BlobSet;

/// Used and seen sets shared by every walk of one mark phase.
#[derive(Debug, Default)]
pub struct MarkState {
    used: Mutex<BlobSet>,
    seen: Mutex<BlobSet>,
}

fn lock(set: &Mutex<BlobSet>) -> MutexGuard<'_, BlobSet> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

impl MarkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn used_len(&self) -> usize {
        lock(&self.used).len()
    }

    pub fn into_sets(self) -> (BlobSet, BlobSet) {
        let used = self.used.into_inner().unwrap_or_else(|e| e.into_inner());
        let seen = self.seen.into_inner().unwrap_or_else(|e| e.into_inner());
        (used, seen)
    }

    /// Mark `handle` used and claim it for expansion. Returns `false` when
    /// another walk already claimed it.
    fn claim_tree(&self, handle: BlobHandle) -> bool {
        lock(&self.used).insert(handle);
        lock(&self.seen).insert(handle)
    }

    fn mark_data(&self, children: &[TreeChild]) {
        let mut used = lock(&self.used);
        for child in children {
            if let TreeChild::Data(_) = child {
                used.insert(child.handle());
            }
        }
    }
}

/// Record every blob reachable from the tree `root` in `state`.
///
/// Each distinct tree is fetched at most once across all walks sharing
/// `state`. A tree is claimed before it is fetched, so when the walk fails or
/// is interrupted the used set holds only reachable handles but may be
/// missing the subtrees of claimed trees.
pub fn find_used_blobs(
    loader: &dyn TreeLoader,
    root: BlobHandle,
    state: &MarkState,
    shutdown: Option<&AtomicBool>,
) -> Result<()> {
    debug_assert_eq!(root.kind, BlobKind::Tree);

    let mut stack = vec![root];
    while let Some(handle) = stack.pop() {
        if !state.claim_tree(handle) {
            continue;
        }
        check_interrupted(shutdown)?;

        let children = loader.load_tree(&handle)?;
        trace!(tree = %handle, children = children.len(), "expanded tree");
        state.mark_data(&children);
        // Reverse so subtrees are visited in listing order.
        stack.extend(children.iter().rev().filter_map(|child| match child {
            TreeChild::Subtree(_) => Some(child.handle()),
            TreeChild::Data(_) => None,
        }));
    }
    Ok(())
}
