use thiserror::Error;

use crate::handle::BlobHandle;
use crate::pack_id::PackId;

pub type Result<T> = std::result::Result<T, ReclaimError>;

#[derive(Debug, Error)]
pub enum ReclaimError {
    #[error("repository not found at '{0}'")]
    RepoNotFound(String),

    #[error("repository already exists at '{0}'")]
    RepoAlreadyExists(String),

    #[error("unsupported repository version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid repository format: {0}")]
    InvalidFormat(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("repository is locked by another process (lock: {0})")]
    Locked(String),

    #[error("blob {0} not found in index")]
    BlobNotInIndex(BlobHandle),

    #[error("pack not found: {0}")]
    PackNotFound(PackId),

    #[error("blob {handle} in pack {pack} is corrupt: {reason}")]
    CorruptBlob {
        handle: BlobHandle,
        pack: PackId,
        reason: String,
    },

    #[error("pack {0} is unneeded, but not contained in the rewrite set")]
    InvariantViolation(PackId),

    #[error("repack failed: {0}")]
    Repack(String),

    #[error("index rebuild failed: {0}")]
    IndexRebuild(String),

    #[error("operation interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}
