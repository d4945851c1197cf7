use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "reclaim",
    version,
    about = "Reclaim space held by unreferenced blobs in a pack repository",
    after_help = "\
Configuration file lookup order:
  1. --config <path>             (explicit flag)
  2. $RECLAIM_CONFIG             (environment variable)
  3. ./reclaim.yaml              (project)
  4. Platform user config dir + /reclaim/config.yaml (e.g. ~/.config)

A repository path given with --repo skips the config file entirely."
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides RECLAIM_CONFIG and default search)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Delete unreferenced blobs and compact partially used packs
    Prune {
        /// Repository directory (overrides the configured path)
        #[arg(short = 'R', long = "repo")]
        repo: Option<String>,

        /// Report what would be reclaimed without changing anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Worker threads (0 = one per CPU, overrides config)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Do not draw a progress line
        #[arg(long)]
        no_progress: bool,
    },
}

impl Commands {
    pub(crate) fn repo(&self) -> Option<&str> {
        match self {
            Self::Prune { repo, .. } => repo.as_deref(),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Prune { .. } => "prune",
        }
    }
}

pub(crate) fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prune_defaults() {
        let cli = Cli::try_parse_from(["reclaim", "prune"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
        let Commands::Prune {
            repo,
            dry_run,
            threads,
            no_progress,
        } = cli.command;
        assert!(repo.is_none());
        assert!(!dry_run);
        assert!(threads.is_none());
        assert!(!no_progress);
    }

    #[test]
    fn parse_prune_flags() {
        let cli = Cli::try_parse_from([
            "reclaim", "-vv", "prune", "--repo", "/srv/repo", "--dry-run", "-j", "4",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.command.repo(), Some("/srv/repo"));
        assert_eq!(cli.command.name(), "prune");
        let Commands::Prune {
            dry_run, threads, ..
        } = cli.command;
        assert!(dry_run);
        assert_eq!(threads, Some(4));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["reclaim", "prune", "-v", "--config", "r.yaml"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.config.as_deref(), Some("r.yaml"));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["reclaim"]).is_err());
    }

    #[test]
    fn rejects_non_numeric_threads() {
        assert!(Cli::try_parse_from(["reclaim", "prune", "--threads", "many"]).is_err());
    }

    #[test]
    fn verbosity_maps_to_filter() {
        assert_eq!(log_filter(0), "warn");
        assert_eq!(log_filter(1), "info");
        assert_eq!(log_filter(2), "debug");
        assert_eq!(log_filter(7), "trace");
    }
}
