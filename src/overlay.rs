//! In-memory staged tree layered on top of a base git tree.
//!
//! Base-tree subtrees are represented lazily as [`TreeNode::Unexpanded`]
//! until first traversed, at which point [`Overlay::expand`] mutates the
//! node in place into a [`TreeNode::Directory`]. Mutations mark every
//! ancestor directory on the mutated path `dirty`; only dirty directories
//! are re-emitted via `mktree` at commit time, unmutated subtrees reuse
//! their base hash untouched.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::osg::{EntryKind, ObjectStoreGateway, TreeEntry};

/// Where a file's content currently lives.
#[derive(Debug, Clone)]
pub enum BlobSource {
    /// Hash inherited unchanged from the base tree.
    Base(String),
    /// Hash produced by a writer closed during this transaction.
    Staged(String),
}

impl BlobSource {
    pub fn hash(&self) -> &str {
        match self {
            Self::Base(h) | Self::Staged(h) => h,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileNode {
    /// `None` means a brand-new file whose writer has not yet closed
    /// successfully; reads of such a file fail with
    /// `NoSuchFileOrDirectory` per the in-transaction visibility rule.
    pub blob: Option<BlobSource>,
    pub mode: String,
    /// The git object type this entry round-trips as ("blob" for regular
    /// files and symlinks, "commit" for submodule gitlinks). Submodules
    /// are out of scope (see Non-goals); this only exists so an untouched
    /// gitlink entry survives a commit unchanged instead of being
    /// miswritten as a blob.
    pub git_type: &'static str,
}

impl FileNode {
    fn new_pending() -> Self {
        Self {
            blob: None,
            mode: "100644".to_string(),
            git_type: "blob",
        }
    }
}

#[derive(Debug)]
pub struct DirNode {
    pub entries: BTreeMap<String, TreeNode>,
    /// Set once this directory (or a descendant) was mutated this
    /// transaction; gates re-emission at commit.
    pub dirty: bool,
    /// The tree hash this directory was expanded from, if any. `None` for
    /// directories created fresh via `mkdir`.
    pub base_hash: Option<String>,
}

#[derive(Debug)]
pub enum TreeNode {
    Unexpanded(String),
    Directory(DirNode),
    File(FileNode),
    Tombstone,
}

impl TreeNode {
    fn new_dir(base_hash: Option<String>, dirty: bool) -> Self {
        Self::Directory(DirNode {
            entries: BTreeMap::new(),
            dirty,
            base_hash,
        })
    }
}

pub struct Overlay {
    root: TreeNode,
    /// Set once any mutation has happened in this transaction; gates the
    /// idempotent "nothing to commit" shortcut.
    mutated: bool,
    open_handles: usize,
}

impl Overlay {
    /// `base_tree` is the hash of the branch tip's tree, or `None` for a
    /// branch with no commits yet (empty root).
    pub fn new(base_tree: Option<String>) -> Self {
        let root = match base_tree {
            Some(hash) => TreeNode::Unexpanded(hash),
            None => TreeNode::new_dir(None, false),
        };
        Self {
            root,
            mutated: false,
            open_handles: 0,
        }
    }

    pub fn is_mutated(&self) -> bool {
        self.mutated
    }

    pub fn open_handle_count(&self) -> usize {
        self.open_handles
    }

    pub fn register_handle(&mut self) {
        self.open_handles += 1;
    }

    pub fn deregister_handle(&mut self) {
        self.open_handles = self.open_handles.saturating_sub(1);
    }

    fn expand(node: &mut TreeNode, osg: &ObjectStoreGateway) -> Result<()> {
        if let TreeNode::Unexpanded(hash) = node {
            let hash = hash.clone();
            let listing = osg.ls_tree(&hash)?;
            let mut entries = BTreeMap::new();
            for e in listing {
                let child = match e.kind {
                    EntryKind::Tree => TreeNode::Unexpanded(e.hash),
                    EntryKind::Blob => TreeNode::File(FileNode {
                        blob: Some(BlobSource::Base(e.hash)),
                        mode: e.mode,
                        git_type: "blob",
                    }),
                    EntryKind::Commit => TreeNode::File(FileNode {
                        blob: Some(BlobSource::Base(e.hash)),
                        mode: e.mode,
                        git_type: "commit",
                    }),
                };
                entries.insert(e.name, child);
            }
            *node = TreeNode::Directory(DirNode {
                entries,
                dirty: false,
                base_hash: Some(hash),
            });
        }
        Ok(())
    }

    /// Descend to the node named by `components`, lazily expanding
    /// directories along the way. `full_path` is used verbatim in any
    /// error raised, per the boundary behaviors in the spec.
    fn descend<'a>(
        &'a mut self,
        osg: &ObjectStoreGateway,
        components: &[String],
        full_path: &str,
    ) -> Result<&'a mut TreeNode> {
        Self::expand(&mut self.root, osg)?;
        let mut current = &mut self.root;
        for name in components {
            match current {
                TreeNode::Directory(dir) => {
                    let child = match dir.entries.get_mut(name) {
                        Some(child) => child,
                        None => {
                            return Err(Error::NoSuchFileOrDirectory {
                                filename: full_path.to_string(),
                            })
                        }
                    };
                    Self::expand(child, osg)?;
                    current = child;
                }
                TreeNode::File(_) => {
                    return Err(Error::NotADirectory {
                        filename: full_path.to_string(),
                    })
                }
                TreeNode::Tombstone => {
                    return Err(Error::NoSuchFileOrDirectory {
                        filename: full_path.to_string(),
                    })
                }
                TreeNode::Unexpanded(_) => unreachable!("expanded just above"),
            }
        }
        Ok(current)
    }

    fn descend_dir<'a>(
        &'a mut self,
        osg: &ObjectStoreGateway,
        components: &[String],
        full_path: &str,
    ) -> Result<&'a mut DirNode> {
        match self.descend(osg, components, full_path)? {
            TreeNode::Directory(dir) => Ok(dir),
            TreeNode::File(_) => Err(Error::NotADirectory {
                filename: full_path.to_string(),
            }),
            TreeNode::Tombstone => Err(Error::NoSuchFileOrDirectory {
                filename: full_path.to_string(),
            }),
            TreeNode::Unexpanded(_) => unreachable!("expanded by descend"),
        }
    }

    /// Navigate without lazy expansion or error handling. Only valid for
    /// paths already known to exist and be expanded (i.e. paths this same
    /// transaction resolved moments earlier via `descend`).
    fn nav_dir_mut<'a>(root: &'a mut TreeNode, components: &[String]) -> &'a mut DirNode {
        let mut current = root;
        for name in components {
            current = match current {
                TreeNode::Directory(dir) => dir
                    .entries
                    .get_mut(name)
                    .expect("path resolved earlier in the same transaction"),
                _ => panic!("expected directory while navigating a resolved path"),
            };
        }
        match current {
            TreeNode::Directory(dir) => dir,
            _ => panic!("expected directory while navigating a resolved path"),
        }
    }

    fn mark_dirty_path(&mut self, parent_components: &[String]) {
        self.mutated = true;
        if let TreeNode::Directory(dir) = &mut self.root {
            dir.dirty = true;
        }
        let mut current = &mut self.root;
        for name in parent_components {
            current = match current {
                TreeNode::Directory(dir) => {
                    let child = dir
                        .entries
                        .get_mut(name)
                        .expect("path resolved earlier in the same transaction");
                    if let TreeNode::Directory(child_dir) = child {
                        child_dir.dirty = true;
                    }
                    child
                }
                _ => break,
            };
        }
    }

    pub fn resolve_dir_for_listing(
        &mut self,
        osg: &ObjectStoreGateway,
        components: &[String],
        full_path: &str,
    ) -> Result<Vec<String>> {
        let dir = self.descend_dir(osg, components, full_path)?;
        Ok(dir
            .entries
            .iter()
            .filter(|(_, node)| !matches!(node, TreeNode::Tombstone))
            .map(|(name, _)| name.clone())
            .collect())
    }

    pub fn exists(&mut self, osg: &ObjectStoreGateway, components: &[String]) -> bool {
        self.descend(osg, components, "").is_ok()
    }

    pub fn isdir(&mut self, osg: &ObjectStoreGateway, components: &[String]) -> bool {
        matches!(
            self.descend(osg, components, ""),
            Ok(TreeNode::Directory(_))
        )
    }

    pub fn isfile(&mut self, osg: &ObjectStoreGateway, components: &[String]) -> bool {
        matches!(self.descend(osg, components, ""), Ok(TreeNode::File(_)))
    }

    /// Resolve a path for `open(.., "r")`. Returns the blob hash to read.
    pub fn resolve_for_read(
        &mut self,
        osg: &ObjectStoreGateway,
        components: &[String],
        full_path: &str,
    ) -> Result<String> {
        if components.is_empty() {
            return Err(Error::IsADirectory {
                filename: String::new(),
            });
        }
        match self.descend(osg, components, full_path)? {
            TreeNode::File(f) => f.blob.as_ref().map(BlobSource::hash).map(str::to_string).ok_or_else(|| {
                Error::NoSuchFileOrDirectory {
                    filename: full_path.to_string(),
                }
            }),
            TreeNode::Directory(_) => Err(Error::IsADirectory {
                filename: full_path.to_string(),
            }),
            TreeNode::Tombstone => Err(Error::NoSuchFileOrDirectory {
                filename: full_path.to_string(),
            }),
            TreeNode::Unexpanded(_) => unreachable!("expanded by descend"),
        }
    }

    /// Resolve a path for `open(.., "w")`. Creates a pending `FileNode` if
    /// absent; returns the prior node, if any, so the caller can restore it
    /// on writer failure or abandonment.
    pub fn resolve_for_write(
        &mut self,
        osg: &ObjectStoreGateway,
        components: &[String],
        full_path: &str,
    ) -> Result<Option<FileNode>> {
        if components.is_empty() {
            return Err(Error::IsADirectory {
                filename: String::new(),
            });
        }
        let parent_components = &components[..components.len() - 1];
        let name = &components[components.len() - 1];
        let dir = self.descend_dir(osg, parent_components, full_path)?;

        match dir.entries.get(name) {
            Some(TreeNode::Directory(_)) => {
                return Err(Error::IsADirectory {
                    filename: full_path.to_string(),
                })
            }
            Some(TreeNode::File(f)) => {
                let prior = f.clone();
                return Ok(Some(prior));
            }
            Some(TreeNode::Tombstone) | None => {
                dir.entries
                    .insert(name.clone(), TreeNode::File(FileNode::new_pending()));
                return Ok(None);
            }
            Some(TreeNode::Unexpanded(_)) => unreachable!("expanded by descend_dir"),
        }
    }

    pub fn finalize_write(&mut self, components: &[String], hash: String) {
        let parent_components = &components[..components.len() - 1];
        let name = &components[components.len() - 1];
        let dir = Self::nav_dir_mut(&mut self.root, parent_components);
        if let Some(TreeNode::File(f)) = dir.entries.get_mut(name) {
            f.blob = Some(BlobSource::Staged(hash));
        }
        self.mark_dirty_path(parent_components);
    }

    pub fn restore_write(&mut self, components: &[String], prior: Option<FileNode>) {
        let parent_components = &components[..components.len() - 1];
        let name = &components[components.len() - 1];
        let dir = Self::nav_dir_mut(&mut self.root, parent_components);
        match prior {
            Some(node) => {
                dir.entries.insert(name.clone(), TreeNode::File(node));
            }
            None => {
                dir.entries.remove(name);
            }
        }
    }

    pub fn mkdir(
        &mut self,
        osg: &ObjectStoreGateway,
        components: &[String],
        full_path: &str,
    ) -> Result<()> {
        if components.is_empty() {
            return Err(Error::FileExists {
                filename: String::new(),
            });
        }
        let parent_components = &components[..components.len() - 1];
        let name = &components[components.len() - 1];
        let dir = self.descend_dir(osg, parent_components, full_path)?;

        if dir.entries.get(name).map_or(false, |n| !matches!(n, TreeNode::Tombstone)) {
            return Err(Error::FileExists {
                filename: full_path.to_string(),
            });
        }
        dir.entries
            .insert(name.clone(), TreeNode::new_dir(None, true));
        self.mark_dirty_path(parent_components);
        Ok(())
    }

    pub fn rm(
        &mut self,
        osg: &ObjectStoreGateway,
        components: &[String],
        full_path: &str,
    ) -> Result<()> {
        if components.is_empty() {
            return Err(Error::IsADirectory {
                filename: String::new(),
            });
        }
        let parent_components = &components[..components.len() - 1];
        let name = &components[components.len() - 1];
        let dir = self.descend_dir(osg, parent_components, full_path)?;

        match dir.entries.get(name) {
            Some(TreeNode::File(_)) => {}
            Some(TreeNode::Directory(_)) => {
                return Err(Error::IsADirectory {
                    filename: full_path.to_string(),
                })
            }
            Some(TreeNode::Tombstone) | None => {
                return Err(Error::NoSuchFileOrDirectory {
                    filename: full_path.to_string(),
                })
            }
            Some(TreeNode::Unexpanded(_)) => unreachable!("expanded by descend_dir"),
        }
        dir.entries.insert(name.clone(), TreeNode::Tombstone);
        self.mark_dirty_path(parent_components);
        Ok(())
    }

    pub fn rmdir(
        &mut self,
        osg: &ObjectStoreGateway,
        components: &[String],
        full_path: &str,
    ) -> Result<()> {
        if components.is_empty() {
            return Err(Error::IsADirectory {
                filename: String::new(),
            });
        }
        let parent_components = &components[..components.len() - 1];
        let name = &components[components.len() - 1];
        let dir = self.descend_dir(osg, parent_components, full_path)?;

        match dir.entries.get(name) {
            Some(TreeNode::Directory(_)) => {}
            Some(TreeNode::File(_)) => {
                return Err(Error::NotADirectory {
                    filename: full_path.to_string(),
                })
            }
            Some(TreeNode::Tombstone) | None => {
                return Err(Error::NoSuchFileOrDirectory {
                    filename: full_path.to_string(),
                })
            }
            Some(TreeNode::Unexpanded(_)) => unreachable!("expanded by descend_dir"),
        }
        dir.entries.insert(name.clone(), TreeNode::Tombstone);
        self.mark_dirty_path(parent_components);
        Ok(())
    }

    /// Walk the tree bottom-up, emitting a tree object for every dirty
    /// directory and reusing base hashes for everything else. Returns the
    /// root tree hash.
    pub fn emit_root(&self, osg: &ObjectStoreGateway) -> Result<String> {
        let (_, hash) = Self::emit(&self.root, osg)?;
        Ok(hash)
    }

    /// Returns (mode, kind, hash) for the node.
    fn emit(node: &TreeNode, osg: &ObjectStoreGateway) -> Result<(String, EntryKind, String)> {
        match node {
            TreeNode::Unexpanded(hash) => Ok(("040000".to_string(), EntryKind::Tree, hash.clone())),
            TreeNode::File(f) => {
                let hash = f
                    .blob
                    .as_ref()
                    .expect("commit already rejected files with open writers")
                    .hash()
                    .to_string();
                let kind = if f.git_type == "commit" {
                    EntryKind::Commit
                } else {
                    EntryKind::Blob
                };
                Ok((f.mode.clone(), kind, hash))
            }
            TreeNode::Tombstone => unreachable!("tombstones are filtered out before recursing"),
            TreeNode::Directory(dir) => {
                if !dir.dirty {
                    let hash = dir
                        .base_hash
                        .clone()
                        .expect("an untouched directory always has a base hash");
                    return Ok(("040000".to_string(), EntryKind::Tree, hash));
                }
                let mut entries = Vec::new();
                for (name, child) in &dir.entries {
                    if matches!(child, TreeNode::Tombstone) {
                        continue;
                    }
                    let (mode, kind, hash) = Self::emit(child, osg)?;
                    entries.push(TreeEntry {
                        mode,
                        kind,
                        hash,
                        name: name.clone(),
                    });
                }
                let hash = osg.mktree(&entries)?;
                Ok(("040000".to_string(), EntryKind::Tree, hash))
            }
        }
    }

    /// Re-seed the overlay from a freshly committed tree; drops all
    /// staged state.
    pub fn reseed(&mut self, tree_hash: String) {
        self.root = TreeNode::Unexpanded(tree_hash);
        self.mutated = false;
    }

    /// Discards all staged state, reverting to the given base tree (or an
    /// empty root if the branch has no commits). Used by abort.
    pub fn reset(&mut self, base_tree: Option<String>) {
        self.root = match base_tree {
            Some(hash) => TreeNode::Unexpanded(hash),
            None => TreeNode::new_dir(None, false),
        };
        self.mutated = false;
    }
}
