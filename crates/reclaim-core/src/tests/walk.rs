use std::sync::atomic::AtomicBool;

use reclaim_types::ReclaimError;

use crate::gc::walk::{find_used_blobs, MarkState};
use crate::set::BlobSet;
use crate::testutil::{data, tree, MemoryTrees};

/// root -> [d1, sub], sub -> [d2, d3]
fn nested() -> MemoryTrees {
    let mut trees = MemoryTrees::new();
    trees.add(tree(1), &[data(1), tree(2)]);
    trees.add(tree(2), &[data(2), data(3)]);
    trees
}

#[test]
fn marks_every_reachable_blob() {
    let trees = nested();
    let state = MarkState::new();
    find_used_blobs(&trees, tree(1), &state, None).unwrap();

    let (used, seen) = state.into_sets();
    let expected: BlobSet = [tree(1), tree(2), data(1), data(2), data(3)]
        .into_iter()
        .collect();
    assert_eq!(used, expected);
    assert_eq!(seen.sorted(), vec![tree(1), tree(2)]);
}

#[test]
fn shared_subtree_is_expanded_once() {
    let mut trees = nested();
    trees.add(tree(3), &[data(4), tree(2)]);
    let state = MarkState::new();
    find_used_blobs(&trees, tree(1), &state, None).unwrap();
    find_used_blobs(&trees, tree(3), &state, None).unwrap();

    assert_eq!(trees.load_count(&tree(2)), 1);
    assert_eq!(trees.load_count(&tree(3)), 1);
    let (used, _) = state.into_sets();
    assert_eq!(used.len(), 7);
}

#[test]
fn walking_a_seen_root_again_is_free() {
    let trees = nested();
    let state = MarkState::new();
    find_used_blobs(&trees, tree(1), &state, None).unwrap();
    find_used_blobs(&trees, tree(1), &state, None).unwrap();
    assert_eq!(trees.load_count(&tree(1)), 1);
    assert_eq!(state.used_len(), 5);
}

#[test]
fn missing_subtree_fails_the_walk() {
    let mut trees = MemoryTrees::new();
    trees.add(tree(1), &[data(1), tree(9)]);
    let state = MarkState::new();
    let err = find_used_blobs(&trees, tree(1), &state, None).unwrap_err();
    assert!(matches!(err, ReclaimError::BlobNotInIndex(h) if h == tree(9)));
}

#[test]
fn interrupted_walk_stops_before_fetching() {
    let trees = nested();
    let state = MarkState::new();
    let shutdown = AtomicBool::new(true);
    let err = find_used_blobs(&trees, tree(1), &state, Some(&shutdown)).unwrap_err();
    assert!(matches!(err, ReclaimError::Interrupted));
    assert_eq!(trees.load_count(&tree(1)), 0);

    // Whatever was recorded is reachable.
    let (used, _) = state.into_sets();
    assert!(used.iter().all(|h| *h == tree(1)));
}

#[test]
fn deep_chain_does_not_recurse() {
    let mut trees = MemoryTrees::new();
    let depth = 20_000u32;
    let handle = |i: u32| {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&i.to_le_bytes());
        reclaim_types::BlobHandle::tree(reclaim_types::BlobId(bytes))
    };
    for i in 0..depth {
        trees.add(handle(i), &[handle(i + 1)]);
    }
    trees.add(handle(depth), &[data(1)]);

    let state = MarkState::new();
    find_used_blobs(&trees, handle(0), &state, None).unwrap();
    assert_eq!(state.used_len(), depth as usize + 2);
}
