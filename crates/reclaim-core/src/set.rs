//! Hash-keyed sets of blob handles and pack identifiers.
//!
//! Iteration order is never meaningful; callers that need stable output use
//! [`BlobSet::sorted`] / [`PackIdSet::sorted`].

use std::collections::HashSet;

use reclaim_types::{BlobHandle, PackId};

/// A set of blob handles (used, seen, or kept blobs).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobSet {
    inner: HashSet<BlobHandle>,
}

impl BlobSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle. Returns `true` if it was not present before.
    pub fn insert(&mut self, handle: BlobHandle) -> bool {
        self.inner.insert(handle)
    }

    pub fn has(&self, handle: &BlobHandle) -> bool {
        self.inner.contains(handle)
    }

    pub fn delete(&mut self, handle: &BlobHandle) -> bool {
        self.inner.remove(handle)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlobHandle> {
        self.inner.iter()
    }

    pub fn sorted(&self) -> Vec<BlobHandle> {
        let mut v: Vec<BlobHandle> = self.inner.iter().copied().collect();
        v.sort();
        v
    }
}

impl FromIterator<BlobHandle> for BlobSet {
    fn from_iter<I: IntoIterator<Item = BlobHandle>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl Extend<BlobHandle> for BlobSet {
    fn extend<I: IntoIterator<Item = BlobHandle>>(&mut self, iter: I) {
        self.inner.extend(iter);
    }
}

/// A set of pack identifiers (rewrite or remove candidates).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackIdSet {
    inner: HashSet<PackId>,
}

impl PackIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an id. Returns `true` if it was not present before.
    pub fn insert(&mut self, id: PackId) -> bool {
        self.inner.insert(id)
    }

    pub fn has(&self, id: &PackId) -> bool {
        self.inner.contains(id)
    }

    /// Remove an id. Returns `true` if it was present.
    pub fn delete(&mut self, id: &PackId) -> bool {
        self.inner.remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackId> {
        self.inner.iter()
    }

    pub fn is_disjoint(&self, other: &PackIdSet) -> bool {
        self.inner.is_disjoint(&other.inner)
    }

    pub fn sorted(&self) -> Vec<PackId> {
        let mut v: Vec<PackId> = self.inner.iter().copied().collect();
        v.sort();
        v
    }
}

impl FromIterator<PackId> for PackIdSet {
    fn from_iter<I: IntoIterator<Item = PackId>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reclaim_types::BlobId;

    fn handle(b: u8) -> BlobHandle {
        BlobHandle::data(BlobId([b; 32]))
    }

    #[test]
    fn insert_reports_novelty() {
        let mut set = BlobSet::new();
        assert!(set.insert(handle(1)));
        assert!(!set.insert(handle(1)));
        assert_eq!(set.len(), 1);
        assert!(set.has(&handle(1)));
        assert!(!set.has(&handle(2)));
    }

    #[test]
    fn collect_dedups_and_sorts() {
        let set: BlobSet = [handle(3), handle(1), handle(3)].into_iter().collect();
        assert_eq!(set.sorted(), vec![handle(1), handle(3)]);
    }

    #[test]
    fn pack_set_delete() {
        let mut set: PackIdSet = [PackId([1; 32]), PackId([2; 32])].into_iter().collect();
        assert!(set.delete(&PackId([1; 32])));
        assert!(!set.delete(&PackId([1; 32])));
        assert_eq!(set.sorted(), vec![PackId([2; 32])]);
    }
}
