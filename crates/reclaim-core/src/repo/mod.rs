pub mod lock;
pub mod pack;

use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rand::RngCore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use reclaim_types::pack_id::PACKS_PREFIX;
use reclaim_types::snapshot_id::SNAPSHOTS_PREFIX;
use reclaim_types::{BlobHandle, BlobId, BlobKind, PackId, ReclaimError, Result, SnapshotId};

use crate::gc::{
    check_interrupted, IndexRebuilder, PackRemover, PrunePhase, PruneProgressEvent, ProgressSink,
    Repacker, SnapshotSource, TreeChild, TreeLoader,
};
use crate::index::{Index, PackRecord, PackSource};
use crate::set::BlobSet;
use crate::snapshot::tree::Tree;
use crate::snapshot::{Snapshot, SnapshotMeta};
use crate::storage::StorageBackend;

use self::pack::{read_blob_from_pack, read_pack_header, PackWriter};

/// Current on-disk repository version.
pub const REPO_VERSION: u32 = 1;
/// Pack size used when the caller does not pick one.
pub const DEFAULT_PACK_TARGET_SIZE: usize = 16 * 1024 * 1024;

const CONFIG_KEY: &str = "config";
const INDEX_KEY: &str = "index";

/// Persisted at the `config` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub version: u32,
    pub id: Vec<u8>, // 32 bytes
    pub created: DateTime<Utc>,
}

/// A handle to an opened repository.
pub struct Repository {
    pub storage: Box<dyn StorageBackend>,
    pub config: RepoConfig,
    index: Index,
    pack_target_size: usize,
    data_pack_writer: PackWriter,
    tree_pack_writer: PackWriter,
}

impl Repository {
    /// Initialize a new, empty repository.
    pub fn init(storage: Box<dyn StorageBackend>) -> Result<Self> {
        if storage.exists(CONFIG_KEY)? {
            return Err(ReclaimError::RepoAlreadyExists("repository".into()));
        }

        let mut repo_id = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut repo_id);
        let config = RepoConfig {
            version: REPO_VERSION,
            id: repo_id,
            created: Utc::now(),
        };
        storage.put(CONFIG_KEY, &rmp_serde::to_vec(&config)?)?;

        let repo = Self::from_parts(storage, config, Index::new());
        repo.save_index()?;
        Ok(repo)
    }

    /// Open an existing repository and load its persisted index.
    pub fn open(storage: Box<dyn StorageBackend>) -> Result<Self> {
        let config_data = storage
            .get(CONFIG_KEY)?
            .ok_or_else(|| ReclaimError::RepoNotFound("config not found".into()))?;
        let config: RepoConfig = rmp_serde::from_slice(&config_data)?;
        if config.version != REPO_VERSION {
            return Err(ReclaimError::UnsupportedVersion(config.version));
        }

        let index = match storage.get(INDEX_KEY)? {
            Some(data) => Index::from_bytes(&data)?,
            None => Index::new(),
        };
        Ok(Self::from_parts(storage, config, index))
    }

    fn from_parts(storage: Box<dyn StorageBackend>, config: RepoConfig, index: Index) -> Self {
        Self {
            storage,
            config,
            index,
            pack_target_size: DEFAULT_PACK_TARGET_SIZE,
            data_pack_writer: PackWriter::new(BlobKind::Data, DEFAULT_PACK_TARGET_SIZE),
            tree_pack_writer: PackWriter::new(BlobKind::Tree, DEFAULT_PACK_TARGET_SIZE),
        }
    }

    /// Size at which new packs are sealed. Applies to packs started after the call.
    pub fn set_pack_target_size(&mut self, size: usize) {
        self.pack_target_size = size;
        if !self.data_pack_writer.has_pending() {
            self.data_pack_writer = PackWriter::new(BlobKind::Data, size);
        }
        if !self.tree_pack_writer.has_pending() {
            self.tree_pack_writer = PackWriter::new(BlobKind::Tree, size);
        }
    }

    pub fn pack_target_size(&self) -> usize {
        self.pack_target_size
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Replace the in-memory index, e.g. with one freshly built from pack headers.
    pub fn install_index(&mut self, index: Index) {
        self.index = index;
    }

    pub fn save_index(&self) -> Result<()> {
        self.storage.put(INDEX_KEY, &self.index.to_bytes()?)
    }

    /// Buffer a blob for the next pack of its kind, flushing the pack when full.
    ///
    /// Does not deduplicate; callers that want that check [`Index::locate`] first.
    pub fn store_blob(&mut self, kind: BlobKind, data: &[u8]) -> Result<BlobHandle> {
        let id = BlobId::compute(data);
        let writer = match kind {
            BlobKind::Data => &mut self.data_pack_writer,
            BlobKind::Tree => &mut self.tree_pack_writer,
        };
        writer.add_blob(id, data);
        if writer.should_flush() {
            let record = writer.flush(self.storage.as_ref())?;
            debug!(pack = %record.id, blobs = record.entries.len(), "flushed {kind} pack");
            self.index.insert(record);
        }
        Ok(BlobHandle::new(id, kind))
    }

    pub fn store_tree(&mut self, tree: &Tree) -> Result<BlobId> {
        let bytes = tree.to_bytes()?;
        Ok(self.store_blob(BlobKind::Tree, &bytes)?.id)
    }

    /// Write out any partially filled packs. Returns their records.
    pub fn flush(&mut self) -> Result<Vec<PackRecord>> {
        let mut written = Vec::new();
        for writer in [&mut self.data_pack_writer, &mut self.tree_pack_writer] {
            if writer.has_pending() {
                written.push(writer.flush(self.storage.as_ref())?);
            }
        }
        for record in &written {
            self.index.insert(record.clone());
        }
        Ok(written)
    }

    pub fn save_snapshot(&self, meta: &SnapshotMeta) -> Result<SnapshotId> {
        let id = SnapshotId::generate();
        self.storage.put(&id.storage_key(), &meta.to_bytes()?)?;
        Ok(id)
    }

    pub fn delete_snapshot(&self, id: &SnapshotId) -> Result<()> {
        self.storage.delete(&id.storage_key())
    }

    /// Read a blob through the index and verify its content hash.
    pub fn read_blob(&self, handle: &BlobHandle) -> Result<Vec<u8>> {
        let loc = self
            .index
            .locate(handle)
            .ok_or(ReclaimError::BlobNotInIndex(*handle))?;
        let data = read_blob_from_pack(self.storage.as_ref(), &loc.pack_id, loc.offset, loc.length)?;
        verify_blob(handle, &loc.pack_id, &data)?;
        Ok(data)
    }
}

fn verify_blob(handle: &BlobHandle, pack: &PackId, data: &[u8]) -> Result<()> {
    if BlobId::compute(data) != handle.id {
        return Err(ReclaimError::CorruptBlob {
            handle: *handle,
            pack: *pack,
            reason: "content hash mismatch".into(),
        });
    }
    Ok(())
}

impl PackSource for Repository {
    fn list_packs(&self) -> Result<Vec<PackId>> {
        let mut ids = Vec::new();
        for key in self.storage.list(PACKS_PREFIX)? {
            match PackId::from_storage_key(&key) {
                Ok(id) => ids.push(id),
                Err(e) => warn!("skipping invalid pack key '{key}': {e}"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn read_pack(&self, id: &PackId) -> Result<PackRecord> {
        read_pack_header(self.storage.as_ref(), id)
    }
}

impl SnapshotSource for Repository {
    fn load_snapshots(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for key in self.storage.list(SNAPSHOTS_PREFIX)? {
            let id = SnapshotId::from_storage_key(&key).map_err(ReclaimError::InvalidFormat)?;
            let data = self.storage.get(&key)?.ok_or_else(|| {
                ReclaimError::InvalidFormat(format!("snapshot {id} disappeared while loading"))
            })?;
            let meta = SnapshotMeta::from_bytes(&data)?;
            snapshots.push(Snapshot { id, meta });
        }
        snapshots.sort_by_key(|s| s.meta.time);
        Ok(snapshots)
    }
}

impl TreeLoader for Repository {
    fn load_tree(&self, handle: &BlobHandle) -> Result<Vec<TreeChild>> {
        let tree = Tree::from_bytes(&self.read_blob(handle)?)?;
        Ok(tree
            .children()?
            .into_iter()
            .map(|child| match child.kind {
                BlobKind::Tree => TreeChild::Subtree(child.id),
                BlobKind::Data => TreeChild::Data(child.id),
            })
            .collect())
    }
}

impl PackRemover for Repository {
    fn remove_pack(&self, id: &PackId) -> Result<()> {
        self.storage.delete(&id.storage_key())
    }
}

impl IndexRebuilder for Repository {
    fn rebuild_index(
        &self,
        progress: &dyn ProgressSink,
        shutdown: Option<&AtomicBool>,
    ) -> Result<Index> {
        let index = Index::build(self, progress, shutdown)?;
        self.storage.put(INDEX_KEY, &index.to_bytes()?)?;
        Ok(index)
    }
}

/// Writers and bookkeeping shared by the repack workers.
struct RepackState {
    written: BlobSet,
    data: PackWriter,
    tree: PackWriter,
    new_packs: Vec<PackRecord>,
}

impl RepackState {
    fn new(target: usize) -> Self {
        Self {
            written: BlobSet::new(),
            data: PackWriter::new(BlobKind::Data, target),
            tree: PackWriter::new(BlobKind::Tree, target),
            new_packs: Vec::new(),
        }
    }

    fn add(&mut self, storage: &dyn StorageBackend, handle: BlobHandle, data: &[u8]) -> Result<()> {
        let writer = match handle.kind {
            BlobKind::Data => &mut self.data,
            BlobKind::Tree => &mut self.tree,
        };
        writer.add_blob(handle.id, data);
        if writer.should_flush() {
            self.new_packs.push(writer.flush(storage)?);
        }
        Ok(())
    }

    fn finish(mut self, storage: &dyn StorageBackend) -> Result<Vec<PackRecord>> {
        for writer in [&mut self.data, &mut self.tree] {
            if writer.has_pending() {
                self.new_packs.push(writer.flush(storage)?);
            }
        }
        Ok(self.new_packs)
    }
}

fn lock_state(state: &Mutex<RepackState>) -> MutexGuard<'_, RepackState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl Repacker for Repository {
    fn repack(
        &self,
        packs: &[PackId],
        keep: &BlobSet,
        progress: &dyn ProgressSink,
        shutdown: Option<&AtomicBool>,
    ) -> Result<Vec<PackRecord>> {
        progress.on_event(PruneProgressEvent::PhaseStarted {
            phase: PrunePhase::Repack,
            total: packs.len() as u64,
        });

        let storage = self.storage.as_ref();
        let state = Mutex::new(RepackState::new(self.pack_target_size));

        packs.par_iter().try_for_each(|pack_id| {
            check_interrupted(shutdown)?;
            let record = match self.index.get(pack_id) {
                Some(record) => record.clone(),
                None => read_pack_header(storage, pack_id)?,
            };

            let mut kept = 0usize;
            for entry in &record.entries {
                if !keep.has(&entry.handle) || !lock_state(&state).written.insert(entry.handle) {
                    continue;
                }
                let data = read_blob_from_pack(storage, pack_id, entry.offset, entry.length)?;
                verify_blob(&entry.handle, pack_id, &data)?;
                lock_state(&state).add(storage, entry.handle, &data)?;
                kept += 1;
            }

            debug!(pack = %pack_id, kept, total = record.entries.len(), "repacked pack");
            progress.on_event(PruneProgressEvent::Advanced {
                phase: PrunePhase::Repack,
                units: 1,
            });
            Ok::<(), ReclaimError>(())
        })?;

        let state = state.into_inner().unwrap_or_else(|e| e.into_inner());
        let new_packs = state.finish(storage)?;

        progress.on_event(PruneProgressEvent::PhaseFinished {
            phase: PrunePhase::Repack,
        });
        Ok(new_packs)
    }
}
