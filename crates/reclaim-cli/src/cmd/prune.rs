use reclaim_core::commands::prune::{self, PruneOptions, PruneStats};
use reclaim_core::config::ReclaimConfig;
use reclaim_core::gc::{NoProgress, ProgressSink};

use crate::format::format_bytes;
use crate::progress::PruneProgressRenderer;
use crate::signal::SHUTDOWN;

pub(crate) fn run_prune(
    config: &ReclaimConfig,
    dry_run: bool,
    threads: Option<usize>,
    show_progress: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = PruneOptions::from(&config.prune);
    options.dry_run |= dry_run;
    if let Some(threads) = threads {
        options.threads = threads;
    }

    let renderer = show_progress.then(PruneProgressRenderer::new);
    let progress: &dyn ProgressSink = match &renderer {
        Some(renderer) => renderer,
        None => &NoProgress,
    };
    let result = prune::run(config, &options, progress, Some(&SHUTDOWN));
    if let Some(renderer) = &renderer {
        renderer.finish();
    }

    print_summary(&result?);
    Ok(())
}

fn print_summary(stats: &PruneStats) {
    println!(
        "Repository: {} packs, {} blobs, {}",
        stats.packs,
        stats.blobs,
        format_bytes(stats.bytes)
    );
    if stats.duplicate_blobs > 0 {
        println!(
            "Duplicates: {} blobs, {}",
            stats.duplicate_blobs,
            format_bytes(stats.duplicate_bytes)
        );
    }
    println!(
        "In use:     {} blobs referenced by {} snapshots",
        stats.used_blobs, stats.snapshots
    );

    if stats.packs_to_rewrite == 0 && stats.packs_to_delete == 0 {
        println!("Nothing to do, repository is already compact");
        return;
    }

    if stats.dry_run {
        println!(
            "Dry run: would rewrite {} packs and delete {} packs, freeing {}",
            stats.packs_to_rewrite,
            stats.packs_to_delete,
            format_bytes(stats.bytes_reclaimed),
        );
        return;
    }

    println!(
        "Rewrote {} packs into {} new packs, deleted {} packs, freed {}",
        stats.packs_to_rewrite,
        stats.new_packs,
        stats.packs_deleted + stats.superseded_deleted,
        format_bytes(stats.bytes_reclaimed),
    );
    if !stats.delete_failures.is_empty() {
        eprintln!(
            "Warning: {} packs could not be deleted and will be retried on the next run:",
            stats.delete_failures.len()
        );
        for failure in &stats.delete_failures {
            eprintln!("  {}: {}", failure.pack_id, failure.error);
        }
    }
}
