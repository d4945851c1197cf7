use tracing::warn;

use reclaim_types::Result;

use crate::config::ReclaimConfig;
use crate::repo::lock;
use crate::repo::Repository;
use crate::storage::local_backend::LocalBackend;

/// Open the repository a config points at.
pub fn open_repo(config: &ReclaimConfig) -> Result<Repository> {
    let backend = LocalBackend::new(&config.repository.path)?;
    let mut repo = Repository::open(Box::new(backend))?;
    repo.set_pack_target_size(config.repository.pack_target_size as usize);
    Ok(repo)
}

/// Execute a repository mutation while holding the exclusive lock.
/// The release is always attempted, even when the action fails.
pub fn with_repo_lock<T>(
    repo: &mut Repository,
    action: impl FnOnce(&mut Repository) -> Result<T>,
) -> Result<T> {
    let guard = lock::acquire_lock(repo.storage.as_ref())?;
    let result = action(repo);

    match lock::release_lock(repo.storage.as_ref(), guard) {
        Ok(()) => result,
        Err(release_err) => {
            if result.is_err() {
                warn!("failed to release repository lock: {release_err}");
                result
            } else {
                Err(release_err)
            }
        }
    }
}
