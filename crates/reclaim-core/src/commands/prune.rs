use std::sync::atomic::AtomicBool;

use tracing::info;

use reclaim_types::{ReclaimError, Result};

use super::util::{open_repo, with_repo_lock};
use crate::config::{PruneConfig, ReclaimConfig};
use crate::gc::classify::classify;
use crate::gc::compact::{Compactor, DeleteFailure};
use crate::gc::usage::{count_blobs, find_used};
use crate::gc::{check_interrupted, ProgressSink, SnapshotSource};
use crate::index::Index;
use crate::repo::Repository;

#[derive(Debug, Clone, Default)]
pub struct PruneOptions {
    /// Stop after classification without touching the repository.
    pub dry_run: bool,
    /// Worker threads for mark, repack and delete. `0` means one per CPU.
    pub threads: usize,
}

impl From<&PruneConfig> for PruneOptions {
    fn from(config: &PruneConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            threads: config.effective_threads(),
        }
    }
}

/// Statistics returned by the prune command.
#[derive(Debug, Clone, Default)]
pub struct PruneStats {
    pub packs: u64,
    pub blobs: u64,
    pub bytes: u64,
    pub duplicate_blobs: u64,
    pub duplicate_bytes: u64,
    pub snapshots: usize,
    pub used_blobs: usize,
    pub packs_to_rewrite: usize,
    pub packs_to_delete: usize,
    /// Bytes of unreferenced and duplicate blobs reclaimed by the run.
    pub bytes_reclaimed: u64,
    pub new_packs: usize,
    pub packs_deleted: usize,
    pub superseded_deleted: usize,
    pub delete_failures: Vec<DeleteFailure>,
    pub dry_run: bool,
}

/// Run `reclaim prune` against the repository in `config`.
pub fn run(
    config: &ReclaimConfig,
    options: &PruneOptions,
    progress: &dyn ProgressSink,
    shutdown: Option<&AtomicBool>,
) -> Result<PruneStats> {
    let mut repo = open_repo(config)?;
    with_repo_lock(&mut repo, |repo| prune_repo(repo, options, progress, shutdown))
}

/// Core prune logic operating on an already-opened, locked repository.
pub fn prune_repo(
    repo: &mut Repository,
    options: &PruneOptions,
    progress: &dyn ProgressSink,
    shutdown: Option<&AtomicBool>,
) -> Result<PruneStats> {
    let threads = if options.threads == 0 {
        PruneConfig::default().effective_threads()
    } else {
        options.threads
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| ReclaimError::Other(format!("failed to build worker pool: {e}")))?;

    info!("building new index for repository");
    let index = Index::build(repo, progress, shutdown)?;
    repo.install_index(index);

    let (stats, rebuilt) = collect_and_compact(repo, options, &pool, progress, shutdown)?;
    if let Some(index) = rebuilt {
        repo.install_index(index);
    }
    Ok(stats)
}

/// Everything after the index build. Returns the rebuilt index when the
/// repository was modified.
fn collect_and_compact(
    repo: &Repository,
    options: &PruneOptions,
    pool: &rayon::ThreadPool,
    progress: &dyn ProgressSink,
    shutdown: Option<&AtomicBool>,
) -> Result<(PruneStats, Option<Index>)> {
    let usage = count_blobs(repo.index());
    info!(
        "repository contains {} packs ({} blobs) with {} bytes",
        usage.packs, usage.blobs, usage.bytes
    );
    info!(
        "processed {} blobs: {} duplicate blobs, {} bytes duplicate",
        usage.blobs, usage.duplicate_blobs, usage.duplicate_bytes
    );

    let snapshots = repo.load_snapshots()?;
    info!(
        "find data that is still in use for {} snapshots",
        snapshots.len()
    );
    let (used, _seen) = pool.install(|| find_used(&snapshots, repo, progress, shutdown))?;
    info!(
        "found {} of {} data blobs still in use, removing {} blobs",
        used.len(),
        usage.blobs,
        usage.blobs.saturating_sub(used.len() as u64)
    );
    check_interrupted(shutdown)?;

    let plan = classify(repo.index(), &used, &usage)?;
    info!(
        "will delete {} packs and rewrite {} packs, this frees {} bytes",
        plan.remove.len(),
        plan.rewrite.len(),
        plan.removed_bytes
    );

    let mut stats = PruneStats {
        packs: usage.packs,
        blobs: usage.blobs,
        bytes: usage.bytes,
        duplicate_blobs: usage.duplicate_blobs,
        duplicate_bytes: usage.duplicate_bytes,
        snapshots: snapshots.len(),
        used_blobs: used.len(),
        packs_to_rewrite: plan.rewrite.len(),
        packs_to_delete: plan.remove.len(),
        bytes_reclaimed: plan.removed_bytes,
        dry_run: options.dry_run,
        ..PruneStats::default()
    };

    if plan.is_empty() {
        info!("nothing to do, repository is already compact");
        return Ok((stats, None));
    }
    if options.dry_run {
        return Ok((stats, None));
    }

    let compactor = Compactor {
        repacker: repo,
        remover: repo,
        rebuilder: repo,
        progress,
        shutdown,
    };
    let outcome = pool.install(|| compactor.run(&plan, &used))?;

    info!(
        "wrote {} new packs, deleted {} packs ({} superseded by rewrite)",
        outcome.new_packs.len(),
        outcome.packs_deleted + outcome.superseded_deleted,
        outcome.superseded_deleted
    );
    if !outcome.delete_failures.is_empty() {
        info!(
            "{} packs could not be deleted and will be retried by the next run",
            outcome.delete_failures.len()
        );
    }

    stats.new_packs = outcome.new_packs.len();
    stats.packs_deleted = outcome.packs_deleted;
    stats.superseded_deleted = outcome.superseded_deleted;
    stats.delete_failures = outcome.delete_failures;
    Ok((stats, Some(outcome.index)))
}
