pub mod blob_id;
pub mod error;
pub mod handle;
pub mod pack_id;
pub mod snapshot_id;

pub use blob_id::BlobId;
pub use error::{ReclaimError, Result};
pub use handle::{BlobHandle, BlobKind};
pub use pack_id::PackId;
pub use snapshot_id::SnapshotId;
