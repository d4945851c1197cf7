use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use chrono::Utc;
use reclaim_core::gc::PackSource;
use reclaim_core::repo::Repository;
use reclaim_core::snapshot::tree::{Node, Tree};
use reclaim_core::snapshot::SnapshotMeta;
use reclaim_core::storage::local_backend::LocalBackend;
use reclaim_types::BlobKind;
use tempfile::TempDir;

struct CliFixture {
    _tmp: TempDir,
    home_dir: PathBuf,
    repo_dir: PathBuf,
    config_path: PathBuf,
}

impl CliFixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let home_dir = tmp.path().join("home");
        let repo_dir = tmp.path().join("repo");
        let config_path = tmp.path().join("reclaim.yaml");

        std::fs::create_dir_all(&home_dir).unwrap();
        std::fs::create_dir_all(&repo_dir).unwrap();

        Self {
            _tmp: tmp,
            home_dir,
            repo_dir,
            config_path,
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        let mut cmd = Command::new(reclaim_binary_path());
        cmd.args(args);
        cmd.env("HOME", &self.home_dir);
        cmd.env("XDG_CONFIG_HOME", self.home_dir.join(".config"));
        cmd.env_remove("RECLAIM_CONFIG");
        cmd.current_dir(&self.home_dir);
        cmd.output().unwrap()
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        if !output.status.success() {
            panic!(
                "command failed: {:?}\nstdout:\n{}\nstderr:\n{}",
                args,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn repo_arg(&self) -> String {
        self.repo_dir.to_string_lossy().into_owned()
    }

    fn write_config(&self) {
        let yaml = format!(
            "repository:\n  path: {}\nprune:\n  threads: 2\n",
            yaml_quote_path(&self.repo_dir)
        );
        std::fs::write(&self.config_path, yaml).unwrap();
    }

    fn open_repo(&self) -> Repository {
        let backend = LocalBackend::new(self.repo_dir.to_str().unwrap()).unwrap();
        Repository::open(Box::new(backend)).unwrap()
    }

    /// One retained snapshot plus one pack pair nothing references.
    fn seed_repo(&self) {
        let backend = LocalBackend::new(self.repo_dir.to_str().unwrap()).unwrap();
        let mut repo = Repository::init(Box::new(backend)).unwrap();

        let kept = repo.store_blob(BlobKind::Data, b"kept contents").unwrap();
        let tree = repo
            .store_tree(&Tree::new(vec![Node::file("kept.txt", vec![kept.id], 13)]))
            .unwrap();
        repo.flush().unwrap();
        repo.save_snapshot(&SnapshotMeta {
            name: "daily".into(),
            hostname: "cli-test".into(),
            time: Utc::now(),
            tree,
            paths: vec!["/home".into()],
        })
        .unwrap();

        let orphan = repo.store_blob(BlobKind::Data, b"orphaned contents").unwrap();
        repo.store_tree(&Tree::new(vec![Node::file("orphan.txt", vec![orphan.id], 17)]))
            .unwrap();
        repo.flush().unwrap();
    }
}

fn reclaim_binary_path() -> PathBuf {
    if let Some(path) = std::env::var_os("CARGO_BIN_EXE_reclaim") {
        return PathBuf::from(path);
    }

    let current_exe = std::env::current_exe().expect("failed to resolve current test binary path");
    let debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .expect("unexpected test binary path layout");

    #[cfg(windows)]
    let candidate = debug_dir.join("reclaim.exe");
    #[cfg(not(windows))]
    let candidate = debug_dir.join("reclaim");

    assert!(
        candidate.exists(),
        "unable to locate reclaim binary at {:?}",
        candidate
    );
    candidate
}

fn yaml_quote_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

#[test]
fn prune_with_repo_flag_deletes_orphans() {
    let fx = CliFixture::new();
    fx.seed_repo();
    assert_eq!(fx.open_repo().list_packs().unwrap().len(), 4);

    let stdout = fx.run_ok(&["prune", "--repo", &fx.repo_arg(), "--no-progress"]);
    assert!(stdout.contains("1 snapshots"), "stdout: {stdout}");
    assert!(stdout.contains("deleted 2 packs"), "stdout: {stdout}");
    assert_eq!(fx.open_repo().list_packs().unwrap().len(), 2);

    let again = fx.run_ok(&["prune", "--repo", &fx.repo_arg(), "--no-progress"]);
    assert!(again.contains("Nothing to do"), "stdout: {again}");
}

#[test]
fn prune_dry_run_reports_without_deleting() {
    let fx = CliFixture::new();
    fx.seed_repo();

    let stdout = fx.run_ok(&["prune", "--repo", &fx.repo_arg(), "--dry-run"]);
    assert!(stdout.contains("Dry run: would rewrite 0 packs and delete 2 packs"), "stdout: {stdout}");
    assert_eq!(fx.open_repo().list_packs().unwrap().len(), 4);
}

#[test]
fn prune_reads_config_file() {
    let fx = CliFixture::new();
    fx.seed_repo();
    fx.write_config();

    let config = fx.config_path.to_string_lossy().into_owned();
    fx.run_ok(&["--config", &config, "prune", "--no-progress"]);
    assert_eq!(fx.open_repo().list_packs().unwrap().len(), 2);
}

#[test]
fn missing_config_and_repo_fails() {
    let fx = CliFixture::new();
    let output = fx.run(&["prune"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error: no configuration file found"), "stderr: {stderr}");
}

#[test]
fn uninitialized_repository_fails() {
    let fx = CliFixture::new();
    let output = fx.run(&["prune", "--repo", &fx.repo_arg()]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("Error:") || stderr.contains("\nError:"), "stderr: {stderr}");
}
