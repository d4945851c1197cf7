use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use reclaim_types::{BlobHandle, BlobId, BlobKind, PackId, ReclaimError, Result, SnapshotId};

use crate::gc::{TreeChild, TreeLoader};
use crate::index::{Index, PackEntry, PackRecord};
use crate::repo::Repository;
use crate::snapshot::tree::{Node, Tree};
use crate::snapshot::SnapshotMeta;
use crate::storage::StorageBackend;

/// In-memory storage backend for testing. Thread-safe via Mutex.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let map = self.data.lock().unwrap();
        Ok(map.contains_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let map = self.data.lock().unwrap();
        Ok(map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        match map.get(key) {
            Some(data) => {
                let start = offset as usize;
                let end = start + length as usize;
                if end > data.len() {
                    return Err(ReclaimError::Other(format!(
                        "short read on {key} at offset {offset}: expected {length} bytes, got {}",
                        data.len().saturating_sub(start)
                    )));
                }
                Ok(Some(data[start..end].to_vec()))
            }
            None => Ok(None),
        }
    }

    fn size(&self, key: &str) -> Result<Option<u64>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(key).map(|d| d.len() as u64))
    }
}

/// Memory backend that fails selected operations. Clones share state, so a
/// test can keep one handle after boxing another into a repository.
#[derive(Clone, Default)]
pub struct FaultyBackend {
    inner: Arc<MemoryBackend>,
    failing_deletes: Arc<Mutex<HashSet<String>>>,
    fail_pack_puts: Arc<AtomicBool>,
}

impl FaultyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `delete` of `key` fail.
    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    /// Make every later `put` under `packs/` fail.
    pub fn fail_pack_puts(&self) {
        self.fail_pack_puts.store(true, Ordering::SeqCst);
    }
}

impl StorageBackend for FaultyBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        if key.starts_with("packs/") && self.fail_pack_puts.load(Ordering::SeqCst) {
            return Err(ReclaimError::Other(format!("simulated put failure: {key}")));
        }
        self.inner.put(key, data)
    }

    fn delete(&self, key: &str) -> Result<()> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(ReclaimError::Other(format!("simulated delete failure: {key}")));
        }
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        self.inner.get_range(key, offset, length)
    }

    fn size(&self, key: &str) -> Result<Option<u64>> {
        self.inner.size(key)
    }
}

/// Create an empty repository backed by `MemoryBackend`.
pub fn test_repo() -> Repository {
    Repository::init(Box::new(MemoryBackend::new())).expect("failed to init test repo")
}

/// Create an empty repository whose backend can be told to fail.
pub fn faulty_repo() -> (Repository, FaultyBackend) {
    let backend = FaultyBackend::new();
    let repo = Repository::init(Box::new(backend.clone())).expect("failed to init test repo");
    (repo, backend)
}

/// Store one file per entry, flush, and return the root tree listing them.
pub fn store_files(repo: &mut Repository, files: &[(&str, &[u8])]) -> BlobId {
    let mut nodes = Vec::new();
    for (name, content) in files {
        let handle = repo.store_blob(BlobKind::Data, content).unwrap();
        nodes.push(Node::file(*name, vec![handle.id], content.len() as u64));
    }
    let root = repo.store_tree(&Tree::new(nodes)).unwrap();
    repo.flush().unwrap();
    root
}

/// Save a snapshot pointing at `tree`.
pub fn save_snapshot(repo: &Repository, name: &str, tree: BlobId) -> SnapshotId {
    repo.save_snapshot(&SnapshotMeta {
        name: name.to_string(),
        hostname: "test-host".into(),
        time: Utc::now(),
        tree,
        paths: vec!["/data".into()],
    })
    .unwrap()
}

/// Pack ids currently stored in the backend, sorted.
pub fn stored_packs(repo: &Repository) -> Vec<PackId> {
    let mut ids: Vec<PackId> = repo
        .storage
        .list("packs/")
        .unwrap()
        .iter()
        .map(|k| PackId::from_storage_key(k).unwrap())
        .collect();
    ids.sort();
    ids
}

pub fn data(b: u8) -> BlobHandle {
    BlobHandle::data(BlobId([b; 32]))
}

pub fn tree(b: u8) -> BlobHandle {
    BlobHandle::tree(BlobId([b; 32]))
}

/// A pack record with entries of the given handles and lengths.
pub fn pack(id: u8, entries: &[(BlobHandle, u32)]) -> PackRecord {
    let mut offset = 13u64;
    let entries = entries
        .iter()
        .map(|(handle, length)| {
            let entry = PackEntry {
                handle: *handle,
                offset,
                length: *length,
            };
            offset += 4 + u64::from(*length);
            entry
        })
        .collect();
    PackRecord {
        id: PackId([id; 32]),
        size: offset,
        entries,
    }
}

pub fn index_of(packs: Vec<PackRecord>) -> Index {
    let mut index = Index::new();
    for record in packs {
        index.insert(record);
    }
    index
}

/// Tree graph held in memory, counting how often each tree is fetched.
#[derive(Default)]
pub struct MemoryTrees {
    trees: HashMap<BlobHandle, Vec<TreeChild>>,
    loads: Mutex<HashMap<BlobHandle, usize>>,
}

impl MemoryTrees {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register tree `handle` with the given children (tree handles become subtrees).
    pub fn add(&mut self, handle: BlobHandle, children: &[BlobHandle]) {
        let children = children
            .iter()
            .map(|c| match c.kind {
                BlobKind::Tree => TreeChild::Subtree(c.id),
                BlobKind::Data => TreeChild::Data(c.id),
            })
            .collect();
        self.trees.insert(handle, children);
    }

    pub fn load_count(&self, handle: &BlobHandle) -> usize {
        self.loads.lock().unwrap().get(handle).copied().unwrap_or(0)
    }
}

impl TreeLoader for MemoryTrees {
    fn load_tree(&self, handle: &BlobHandle) -> Result<Vec<TreeChild>> {
        *self.loads.lock().unwrap().entry(*handle).or_insert(0) += 1;
        self.trees
            .get(handle)
            .cloned()
            .ok_or(ReclaimError::BlobNotInIndex(*handle))
    }
}
