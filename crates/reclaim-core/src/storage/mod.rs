pub mod local_backend;

use reclaim_types::Result;

/// Object storage abstraction. Keys are `/`-separated relative paths.
///
/// Implementations must be safe to share across the rayon pools used by the
/// repack and delete phases.
pub trait StorageBackend: Send + Sync {
    /// Read an object. Returns `None` if it does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write an object, replacing any previous content.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Remove an object. Removing a missing object is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// List all object keys starting with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Read `length` bytes at `offset`. Returns `None` if the object does not exist.
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>>;

    /// Size of an object in bytes, or `None` if it does not exist.
    fn size(&self, key: &str) -> Result<Option<u64>>;
}
