use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use reclaim_types::{ReclaimError, Result};

/// Environment variable that points at a config file.
pub const CONFIG_ENV_VAR: &str = "RECLAIM_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReclaimConfig {
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub prune: PruneConfig,
}

impl ReclaimConfig {
    /// Config for a repository path with every other setting defaulted.
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            repository: RepositoryConfig {
                path: path.into(),
                pack_target_size: default_pack_target_size(),
            },
            prune: PruneConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Local directory holding the repository.
    pub path: String,
    /// Size at which replacement packs written during repack are sealed.
    #[serde(default = "default_pack_target_size")]
    pub pack_target_size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PruneConfig {
    /// Worker threads for marking, repacking and deleting. `0` means one per CPU.
    #[serde(default)]
    pub threads: usize,
    /// Report what would be reclaimed without touching the repository.
    #[serde(default)]
    pub dry_run: bool,
}

impl PruneConfig {
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.threads
        }
    }
}

fn default_pack_target_size() -> u32 {
    16 * 1024 * 1024 // 16 MiB
}

/// Parse a YAML config document.
pub fn parse_config(yaml: &str) -> Result<ReclaimConfig> {
    let config: ReclaimConfig = serde_yaml::from_str(yaml)
        .map_err(|e| ReclaimError::Config(format!("invalid config: {e}")))?;
    if config.repository.path.trim().is_empty() {
        return Err(ReclaimError::Config("repository.path must not be empty".into()));
    }
    if config.repository.pack_target_size == 0 {
        return Err(ReclaimError::Config(
            "repository.pack_target_size must be positive".into(),
        ));
    }
    Ok(config)
}

/// Read and parse a config file.
pub fn load_config(path: &Path) -> Result<ReclaimConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ReclaimError::Config(format!("cannot read config '{}': {e}", path.display()))
    })?;
    parse_config(&text)
}

/// Tracks where the config file was found.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Explicitly passed via `--config`.
    CliArg(PathBuf),
    /// Set via the `RECLAIM_CONFIG` env var.
    EnvVar(PathBuf),
    /// Found by searching standard locations.
    SearchOrder { path: PathBuf, level: &'static str },
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::CliArg(p) => p,
            ConfigSource::EnvVar(p) => p,
            ConfigSource::SearchOrder { path, .. } => path,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::CliArg(p) => write!(f, "{} (--config)", p.display()),
            ConfigSource::EnvVar(p) => write!(f, "{} ({CONFIG_ENV_VAR})", p.display()),
            ConfigSource::SearchOrder { path, level } => {
                write!(f, "{} ({})", path.display(), level)
            }
        }
    }
}

/// Returns search locations in priority order: project, then user.
pub fn default_config_search_paths() -> Vec<(PathBuf, &'static str)> {
    let mut paths = vec![(PathBuf::from("reclaim.yaml"), "project")];
    if let Some(base) = dirs::config_dir() {
        paths.push((base.join("reclaim").join("config.yaml"), "user"));
    }
    paths
}

/// Resolve which config file to use.
///
/// Priority: CLI arg > `RECLAIM_CONFIG` env var > first existing file from search paths.
pub fn resolve_config_path(cli_config: Option<&str>) -> Option<ConfigSource> {
    if let Some(path) = cli_config {
        return Some(ConfigSource::CliArg(PathBuf::from(path)));
    }

    if let Ok(val) = std::env::var(CONFIG_ENV_VAR) {
        if !val.is_empty() {
            return Some(ConfigSource::EnvVar(PathBuf::from(val)));
        }
    }

    default_config_search_paths()
        .into_iter()
        .find(|(path, _)| path.exists())
        .map(|(path, level)| ConfigSource::SearchOrder { path, level })
}
