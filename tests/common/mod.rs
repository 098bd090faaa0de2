use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// A scratch directory for end-to-end tests. Not itself a git repository;
/// `gitfs::RepositorySession::builder(..).open()` does the `git init`.
pub struct Scratch {
    pub dir: TempDir,
    pub root: PathBuf,
}

impl Scratch {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        Self { dir, root }
    }

    pub fn read_working_file(&self, path: &str) -> String {
        std::fs::read_to_string(self.root.join(path)).unwrap()
    }

    pub fn working_file_exists(&self, path: &str) -> bool {
        self.root.join(path).exists()
    }

    pub fn git_log(&self) -> String {
        run_git(&self.root, &["log", "--format=Author: %an <%ae>%n%B"])
    }
}

pub fn run_git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .unwrap();
    if !output.status.success() {
        panic!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    String::from_utf8_lossy(&output.stdout).to_string()
}
