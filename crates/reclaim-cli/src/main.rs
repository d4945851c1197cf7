mod cli;
mod cmd;
mod format;
mod progress;
mod signal;

use std::io::IsTerminal;

use clap::Parser;

use reclaim_core::config::{self, ReclaimConfig};

use cli::{log_filter, Cli, Commands};
use progress::ProgressAwareStderr;

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(false)
        .with_writer(ProgressAwareStderr)
        .init();

    signal::install_signal_handlers();

    let config = match resolve_config(cli.config.as_deref(), cli.command.repo()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    tracing::debug!("running {} on {}", cli.command.name(), config.repository.path);

    let result = match cli.command {
        Commands::Prune {
            dry_run,
            threads,
            no_progress,
            ..
        } => {
            let show_progress = !no_progress && std::io::stderr().is_terminal();
            cmd::prune::run_prune(&config, dry_run, threads, show_progress)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Load the config file, or build one from `--repo` alone when no file is given.
fn resolve_config(
    cli_config: Option<&str>,
    repo: Option<&str>,
) -> Result<ReclaimConfig, Box<dyn std::error::Error>> {
    let source = config::resolve_config_path(cli_config);

    let mut cfg = match (&source, repo) {
        (Some(source), _) => {
            tracing::info!("Using config: {source}");
            config::load_config(source.path())?
        }
        (None, Some(path)) => return Ok(ReclaimConfig::for_path(path)),
        (None, None) => {
            let mut msg = String::from("no configuration file found and no --repo given.\nSearched:");
            for (path, level) in config::default_config_search_paths() {
                msg.push_str(&format!("\n  {} ({})", path.display(), level));
            }
            return Err(msg.into());
        }
    };

    if let Some(path) = repo {
        cfg.repository.path = path.to_string();
    }
    Ok(cfg)
}
