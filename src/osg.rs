//! Object Store Gateway: the only module that spawns `git`.
//!
//! Every public method here is one discrete subprocess interaction. Callers
//! (the overlay, the transaction coordinator, the session) never shell out
//! themselves. The git binary can be overridden with `GITFS_GIT_BINARY` for
//! environments where `git` is not on `PATH` under that name.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::debug;

use crate::error::{Error, Result};

/// The git object type an entry round-trips as. Submodule gitlinks ("commit")
/// must not be re-typed as blobs when they pass through unmutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Tree,
    Blob,
    Commit,
}

impl EntryKind {
    fn as_git_str(self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Commit => "commit",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "tree" => Some(Self::Tree),
            "blob" => Some(Self::Blob),
            "commit" => Some(Self::Commit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: EntryKind,
    pub hash: String,
    pub name: String,
}

/// Commit authorship, already resolved from transaction metadata per the
/// derivation order in the external-interfaces section.
pub struct CommitMeta<'a> {
    pub author_name: &'a str,
    pub author_email: &'a str,
    pub committer_name: &'a str,
    pub committer_email: &'a str,
    pub message: &'a str,
}

fn stdout_line(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).trim().to_string()
}

pub struct ObjectStoreGateway {
    root: PathBuf,
    git_binary: String,
}

impl ObjectStoreGateway {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let git_binary = std::env::var("GITFS_GIT_BINARY").unwrap_or_else(|_| "git".to_string());
        Self {
            root: root.into(),
            git_binary,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.git_binary);
        cmd.args(args).current_dir(&self.root);
        cmd
    }

    /// Run a git subcommand, capturing stdout/stderr, mapping any non-zero
    /// exit (or spawn failure) to `Error::ObjectStoreError`.
    fn run(&self, operation: &str, args: &[&str]) -> Result<Vec<u8>> {
        let _span = tracing::debug_span!("osg_op", operation, repo = %self.root.display()).entered();
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ObjectStoreError {
                operation: operation.to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::ObjectStoreError {
                operation: operation.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        debug!(operation, "git subprocess succeeded");
        Ok(output.stdout)
    }

    fn run_with_stdin(&self, operation: &str, args: &[&str], input: &[u8]) -> Result<Vec<u8>> {
        let _span = tracing::debug_span!("osg_op", operation, repo = %self.root.display()).entered();
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ObjectStoreError {
                operation: operation.to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        child
            .stdin
            .take()
            .expect("piped stdin")
            .write_all(input)
            .map_err(|e| Error::ObjectStoreError {
                operation: operation.to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        let output = child
            .wait_with_output()
            .map_err(|e| Error::ObjectStoreError {
                operation: operation.to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::ObjectStoreError {
                operation: operation.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        debug!(operation, "git subprocess succeeded");
        Ok(output.stdout)
    }

    // --- repository lifecycle ------------------------------------------

    pub fn init(&self, bare: bool) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        if bare {
            self.run("init", &["init", "--bare", "-q"])?;
        } else {
            self.run("init", &["init", "-q"])?;
        }
        Ok(())
    }

    pub fn database_exists(&self) -> bool {
        self.command(&["rev-parse", "--git-dir"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub fn is_bare(&self) -> Result<bool> {
        let out = self.run("rev-parse-is-bare", &["rev-parse", "--is-bare-repository"])?;
        Ok(stdout_line(out) == "true")
    }

    /// `Some(branch)` if HEAD is a symbolic ref pointing at
    /// `refs/heads/<branch>`; `None` if HEAD is detached.
    pub fn symbolic_ref_head(&self) -> Result<Option<String>> {
        let _span = tracing::debug_span!("osg_op", operation = "symbolic_ref_head").entered();
        let output = self
            .command(&["symbolic-ref", "-q", "HEAD"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ObjectStoreError {
                operation: "symbolic_ref_head".to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            // exit code 1 with no stderr means HEAD is detached, not a failure.
            return Ok(None);
        }
        let refname = stdout_line(output.stdout);
        Ok(refname
            .strip_prefix("refs/heads/")
            .map(str::to_string)
            .or(Some(refname)))
    }

    /// Resolves `refs/heads/<branch>` to a commit hash, or `None` if the ref
    /// does not exist.
    pub fn rev_parse_branch(&self, branch: &str) -> Result<Option<String>> {
        let refname = format!("refs/heads/{branch}");
        let _span = tracing::debug_span!("osg_op", operation = "rev_parse", refname = %refname).entered();
        let output = self
            .command(&["rev-parse", "-q", "--verify", &refname])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ObjectStoreError {
                operation: "rev_parse".to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(stdout_line(output.stdout)))
    }

    /// The tree hash a commit points at.
    pub fn tree_of_commit(&self, commit_hash: &str) -> Result<String> {
        let spec = format!("{commit_hash}^{{tree}}");
        let out = self.run("tree_of_commit", &["rev-parse", &spec])?;
        Ok(stdout_line(out))
    }

    // --- object access ---------------------------------------------------

    pub fn hash_object(&self, content: &[u8]) -> Result<String> {
        let out = self.run_with_stdin("hash_object", &["hash-object", "-w", "--stdin"], content)?;
        Ok(stdout_line(out))
    }

    /// Spawns `git hash-object -w --stdin` and returns a handle that streams
    /// written bytes directly into the subprocess's stdin, so a writer never
    /// needs to buffer the whole file in memory.
    pub fn spawn_hash_object(&self) -> Result<BlobWriter> {
        let _span = tracing::debug_span!("osg_op", operation = "hash_object").entered();
        let mut child = self
            .command(&["hash-object", "-w", "--stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ObjectStoreError {
                operation: "hash_object".to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        let stdin = child.stdin.take().expect("piped stdin");
        Ok(BlobWriter {
            child: Some(child),
            stdin: Some(stdin),
        })
    }

    /// Spawns `git cat-file blob <hash>` and returns a handle whose stdout
    /// can be streamed without buffering the whole blob up front.
    pub fn cat_blob(&self, hash: &str) -> Result<BlobReader> {
        let _span = tracing::debug_span!("osg_op", operation = "cat_blob", hash).entered();
        let mut child = self
            .command(&["cat-file", "blob", hash])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ObjectStoreError {
                operation: "cat_blob".to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        let stdout = child.stdout.take().expect("piped stdout");
        Ok(BlobReader {
            child,
            stdout,
            operation: "cat_blob",
        })
    }

    pub fn ls_tree(&self, hash: &str) -> Result<Vec<TreeEntry>> {
        let out = self.run("ls_tree", &["ls-tree", "-z", hash])?;
        let text = String::from_utf8_lossy(&out);
        let mut result = Vec::new();
        for record in text.split('\0') {
            if record.is_empty() {
                continue;
            }
            // "<mode> <type> <hash>\t<name>"
            let (meta, name) = record.split_once('\t').ok_or_else(|| Error::ObjectStoreError {
                operation: "ls_tree".to_string(),
                status: None,
                stderr: format!("malformed ls-tree record: {record:?}"),
            })?;
            let mut parts = meta.splitn(3, ' ');
            let mode = parts.next().unwrap_or_default().to_string();
            let kind = parts.next().and_then(EntryKind::parse).ok_or_else(|| {
                Error::ObjectStoreError {
                    operation: "ls_tree".to_string(),
                    status: None,
                    stderr: format!("unrecognized object type in record: {record:?}"),
                }
            })?;
            let hash = parts.next().unwrap_or_default().to_string();
            result.push(TreeEntry {
                mode,
                kind,
                hash,
                name: name.to_string(),
            });
        }
        Ok(result)
    }

    pub fn mktree(&self, entries: &[TreeEntry]) -> Result<String> {
        let mut input = String::new();
        for e in entries {
            input.push_str(&format!(
                "{} {} {}\t{}\n",
                e.mode,
                e.kind.as_git_str(),
                e.hash,
                e.name
            ));
        }
        let out = self.run_with_stdin("mktree", &["mktree"], input.as_bytes())?;
        Ok(stdout_line(out))
    }

    pub fn commit_tree(
        &self,
        tree: &str,
        parents: &[String],
        meta: &CommitMeta<'_>,
    ) -> Result<String> {
        let mut args: Vec<&str> = vec!["commit-tree", tree];
        for parent in parents {
            args.push("-p");
            args.push(parent);
        }
        let _span = tracing::debug_span!("osg_op", operation = "commit_tree", tree).entered();
        let mut cmd = self.command(&args);
        cmd.env("GIT_AUTHOR_NAME", meta.author_name)
            .env("GIT_AUTHOR_EMAIL", meta.author_email)
            .env("GIT_COMMITTER_NAME", meta.committer_name)
            .env("GIT_COMMITTER_EMAIL", meta.committer_email);
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ObjectStoreError {
                operation: "commit_tree".to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        child
            .stdin
            .take()
            .expect("piped stdin")
            .write_all(meta.message.as_bytes())
            .map_err(|e| Error::ObjectStoreError {
                operation: "commit_tree".to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        let output = child
            .wait_with_output()
            .map_err(|e| Error::ObjectStoreError {
                operation: "commit_tree".to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::ObjectStoreError {
                operation: "commit_tree".to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        debug!(operation = "commit_tree", "git subprocess succeeded");
        Ok(stdout_line(output.stdout))
    }

    /// Compare-and-swap update of `refs/heads/<branch>`. `old == None` means
    /// the ref must not currently exist.
    pub fn update_ref(&self, branch: &str, new: &str, old: Option<&str>) -> Result<()> {
        let refname = format!("refs/heads/{branch}");
        let _span =
            tracing::debug_span!("osg_op", operation = "update_ref", refname = %refname, new).entered();
        let mut args: Vec<&str> = vec!["update-ref", &refname, new];
        if let Some(old) = old {
            args.push(old);
        } else {
            args.push(""); // empty old-value asserts the ref does not exist
        }
        let output = self
            .command(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ObjectStoreError {
                operation: "update_ref".to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // git reports a failed compare-and-swap as "cannot lock ref
            // '<refname>': ...", whether the old value didn't match or (with
            // old="") the ref unexpectedly already exists. Any other failure
            // (disk full, permissions, ...) is a genuine subprocess error.
            if stderr.contains("cannot lock ref") {
                return Err(Error::Conflict);
            }
            return Err(Error::ObjectStoreError {
                operation: "update_ref".to_string(),
                status: output.status.code(),
                stderr: stderr.into_owned(),
            });
        }
        Ok(())
    }

    /// Syncs the working tree to `tree` via `read-tree` + `checkout-index -af`.
    /// Only meaningful for non-bare repositories; callers must not invoke
    /// this for bare repos.
    pub fn read_tree_and_checkout(&self, tree: &str) -> Result<()> {
        self.run("read_tree", &["read-tree", tree])?;
        self.run("checkout_index", &["checkout-index", "-af"])?;
        Ok(())
    }
}

/// Streams a blob's content without buffering it fully in memory.
pub struct BlobReader {
    child: Child,
    stdout: std::process::ChildStdout,
    operation: &'static str,
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Drop for BlobReader {
    fn drop(&mut self) {
        let _ = self.child.wait();
    }
}

impl BlobReader {
    /// Waits for the subprocess to finish and maps a non-zero exit to
    /// `Error::ObjectStoreError`. Call after fully consuming the reader.
    pub fn finish(mut self) -> Result<()> {
        let status = self.child.wait().map_err(|e| Error::ObjectStoreError {
            operation: self.operation.to_string(),
            status: None,
            stderr: e.to_string(),
        })?;
        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut s) = self.child.stderr.take() {
                let _ = s.read_to_string(&mut stderr);
            }
            return Err(Error::ObjectStoreError {
                operation: self.operation.to_string(),
                status: status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

/// Streams content into `git hash-object -w --stdin` without buffering the
/// whole blob in memory.
pub struct BlobWriter {
    child: Option<Child>,
    stdin: Option<std::process::ChildStdin>,
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stdin
            .as_mut()
            .expect("write after finish")
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stdin.as_mut().expect("write after finish").flush()
    }
}

impl BlobWriter {
    /// Closes stdin, waits for the subprocess, and returns the resulting
    /// blob hash.
    pub fn finish(mut self) -> Result<String> {
        drop(self.stdin.take());
        let output = self
            .child
            .take()
            .expect("finish called once")
            .wait_with_output()
            .map_err(|e| Error::ObjectStoreError {
                operation: "hash_object".to_string(),
                status: None,
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::ObjectStoreError {
                operation: "hash_object".to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(stdout_line(output.stdout))
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo() -> (tempfile::TempDir, ObjectStoreGateway) {
        let dir = tempfile::tempdir().unwrap();
        let osg = ObjectStoreGateway::new(dir.path());
        osg.init(false).unwrap();
        (dir, osg)
    }

    #[test]
    fn init_creates_database() {
        let (_dir, osg) = init_repo();
        assert!(osg.database_exists());
    }

    #[test]
    fn hash_and_cat_round_trip() {
        let (_dir, osg) = init_repo();
        let hash = osg.hash_object(b"hello world").unwrap();
        let mut reader = osg.cat_blob(&hash).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        reader.finish().unwrap();
        assert_eq!(buf, b"hello world");
    }

    #[test]
    fn mktree_and_ls_tree_round_trip() {
        let (_dir, osg) = init_repo();
        let hash = osg.hash_object(b"content").unwrap();
        let entries = vec![TreeEntry {
            mode: "100644".to_string(),
            kind: EntryKind::Blob,
            hash: hash.clone(),
            name: "file.txt".to_string(),
        }];
        let tree = osg.mktree(&entries).unwrap();
        let listed = osg.ls_tree(&tree).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "file.txt");
        assert_eq!(listed[0].hash, hash);
        assert_eq!(listed[0].kind, EntryKind::Blob);
    }

    #[test]
    fn commit_tree_and_rev_parse() {
        let (_dir, osg) = init_repo();
        let tree = osg.mktree(&[]).unwrap();
        let meta = CommitMeta {
            author_name: "tester",
            author_email: "tester@example.com",
            committer_name: "tester",
            committer_email: "tester@example.com",
            message: "initial",
        };
        let commit = osg.commit_tree(&tree, &[], &meta).unwrap();
        assert!(osg.update_ref("master", &commit, None).is_ok());
        assert_eq!(osg.rev_parse_branch("master").unwrap(), Some(commit.clone()));
        assert_eq!(osg.tree_of_commit(&commit).unwrap(), tree);
    }

    #[test]
    fn update_ref_rejects_stale_old_value() {
        let (_dir, osg) = init_repo();
        let tree = osg.mktree(&[]).unwrap();
        let meta = CommitMeta {
            author_name: "a",
            author_email: "a@example.com",
            committer_name: "a",
            committer_email: "a@example.com",
            message: "m",
        };
        let c1 = osg.commit_tree(&tree, &[], &meta).unwrap();
        osg.update_ref("master", &c1, None).unwrap();
        let c2 = osg.commit_tree(&tree, &[c1.clone()], &meta).unwrap();
        let bogus_old = "0".repeat(40);
        let result = osg.update_ref("master", &c2, Some(&bogus_old));
        assert!(matches!(result, Err(Error::Conflict)));
    }

    #[test]
    fn rev_parse_missing_branch_is_none() {
        let (_dir, osg) = init_repo();
        assert_eq!(osg.rev_parse_branch("nope").unwrap(), None);
    }
}
