use serde::{Deserialize, Serialize};
use std::fmt;

use crate::blob_id::BlobId;

/// What a stored blob contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BlobKind {
    /// File content.
    Data,
    /// A serialized directory listing referencing other blobs.
    Tree,
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobKind::Data => f.write_str("data"),
            BlobKind::Tree => f.write_str("tree"),
        }
    }
}

/// Identity of a blob: the same bytes stored as data and as tree are distinct handles.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlobHandle {
    pub id: BlobId,
    pub kind: BlobKind,
}

impl BlobHandle {
    pub fn new(id: BlobId, kind: BlobKind) -> Self {
        Self { id, kind }
    }

    pub fn data(id: BlobId) -> Self {
        Self::new(id, BlobKind::Data)
    }

    pub fn tree(id: BlobId) -> Self {
        Self::new(id, BlobKind::Tree)
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}/{}>", self.kind, self.id)
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}/{}>", self.kind, self.id)
    }
}
