pub mod tree;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reclaim_types::{BlobHandle, BlobId, Result, SnapshotId};

/// Metadata for a single snapshot, stored at `snapshots/<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub name: String,
    pub hostname: String,
    pub time: DateTime<Utc>,
    /// Root tree of the backed-up content.
    pub tree: BlobId,
    /// Source directories that were backed up.
    #[serde(default)]
    pub paths: Vec<String>,
}

impl SnapshotMeta {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// A retained snapshot as loaded from the repository.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub meta: SnapshotMeta,
}

impl Snapshot {
    /// Handle of the root tree; the only part the reachability walk needs.
    pub fn root(&self) -> BlobHandle {
        BlobHandle::tree(self.meta.tree)
    }
}
