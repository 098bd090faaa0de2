//! Repository Session: the top-level façade clients construct and drive.

use std::cell::RefCell;
use std::io::{self, Read as _, Write as _};
use std::rc::Rc;

use tracing::instrument;

use crate::error::{Error, Result};
use crate::handle::{validate_mode, Reader, Writer};
use crate::osg::ObjectStoreGateway;
use crate::overlay::Overlay;
use crate::path::Components;
use crate::transaction::{TransactionCoordinator, TransactionMeta};

const DEFAULT_BRANCH: &str = "master";

/// Builder for [`RepositorySession`], mirroring the construction parameters
/// in the component design: repository path, create flag (default true),
/// bare flag (default false), branch name (default: whatever HEAD points
/// to, or "master" for a brand-new repository).
pub struct RepositorySessionBuilder {
    path: std::path::PathBuf,
    create: bool,
    bare: bool,
    branch: Option<String>,
}

impl RepositorySessionBuilder {
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn bare(mut self, bare: bool) -> Self {
        self.bare = bare;
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn open(self) -> Result<RepositorySession> {
        let osg = ObjectStoreGateway::new(&self.path);

        let (branch, base_tree) = if !osg.database_exists() {
            if !self.create {
                return Err(Error::NoDatabase {
                    path: self.path.display().to_string(),
                });
            }
            osg.init(self.bare)?;
            (self.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()), None)
        } else {
            let head_branch = osg.symbolic_ref_head()?.ok_or(Error::DetachedHead)?;
            let branch = self.branch.unwrap_or_else(|| head_branch.clone());
            let tip = osg.rev_parse_branch(&branch)?;
            let tip = match tip {
                Some(tip) => Some(tip),
                None => {
                    // Branch does not exist yet. That's only acceptable if
                    // the repository has no commits at all; otherwise the
                    // caller asked for a branch that genuinely isn't there.
                    let head_tip = osg.rev_parse_branch(&head_branch)?;
                    if head_tip.is_some() {
                        return Err(Error::NoSuchBranch { branch });
                    }
                    None
                }
            };
            let base_tree = tip.map(|c| osg.tree_of_commit(&c)).transpose()?;
            (branch, base_tree)
        };

        let non_bare = !osg.is_bare()?;
        let overlay = Rc::new(RefCell::new(Overlay::new(base_tree)));
        let osg = Rc::new(osg);
        let coordinator = TransactionCoordinator::new(branch, non_bare);

        Ok(RepositorySession {
            osg,
            overlay,
            coordinator,
            meta: TransactionMeta::default(),
        })
    }
}

/// A streaming read or write view into a staged file, depending on the mode
/// `open` was called with. Implements both [`std::io::Read`] and
/// [`std::io::Write`] so callers don't need to match on the variant for the
/// common case; calling the wrong one returns an `ErrorKind::Unsupported`
/// I/O error.
pub enum FileHandle {
    Reader(Reader),
    Writer(Writer),
}

impl FileHandle {
    /// Finalizes a writer (staging its blob into the overlay). A no-op for
    /// readers, which release their resources on drop.
    pub fn close(self) -> Result<()> {
        match self {
            FileHandle::Writer(w) => w.close(),
            FileHandle::Reader(_) => Ok(()),
        }
    }
}

impl io::Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileHandle::Reader(r) => r.read(buf),
            FileHandle::Writer(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file was opened for writing",
            )),
        }
    }
}

impl io::Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileHandle::Writer(w) => w.write(buf),
            FileHandle::Reader(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file was opened for reading",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileHandle::Writer(w) => w.flush(),
            FileHandle::Reader(_) => Ok(()),
        }
    }
}

/// Top-level façade: opens or creates a repository and dispatches calls
/// into the overlay and file handles on the caller's behalf.
pub struct RepositorySession {
    osg: Rc<ObjectStoreGateway>,
    overlay: Rc<RefCell<Overlay>>,
    coordinator: TransactionCoordinator,
    meta: TransactionMeta,
}

impl RepositorySession {
    pub fn builder(path: impl Into<std::path::PathBuf>) -> RepositorySessionBuilder {
        RepositorySessionBuilder {
            path: path.into(),
            create: true,
            bare: false,
            branch: None,
        }
    }

    /// Splits and validates a path. Malformed paths (empty components from
    /// a leading/trailing/doubled slash) can never resolve to anything, so
    /// they surface the same error as a missing path component.
    fn components(&self, path: &str) -> Result<Components> {
        Components::parse(path).map_err(|_| Error::NoSuchFileOrDirectory {
            filename: path.to_string(),
        })
    }

    pub fn open(&self, path: &str, mode: &str) -> Result<FileHandle> {
        validate_mode(mode)?;
        let components = self.components(path)?;
        match mode {
            "r" => {
                let hash = self
                    .overlay
                    .borrow_mut()
                    .resolve_for_read(&self.osg, components.as_slice(), path)?;
                let reader = Reader::new(Rc::clone(&self.overlay), &self.osg, &hash)?;
                Ok(FileHandle::Reader(reader))
            }
            "w" => {
                let prior = self.overlay.borrow_mut().resolve_for_write(
                    &self.osg,
                    components.as_slice(),
                    path,
                )?;
                let writer = Writer::new(
                    Rc::clone(&self.overlay),
                    &self.osg,
                    components.as_slice().to_vec(),
                    prior,
                )?;
                Ok(FileHandle::Writer(writer))
            }
            _ => unreachable!("validate_mode already rejected this"),
        }
    }

    pub fn mkdir(&self, path: &str) -> Result<()> {
        let components = self.components(path)?;
        self.overlay
            .borrow_mut()
            .mkdir(&self.osg, components.as_slice(), path)
    }

    pub fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let components = self.components(path)?;
        self.overlay
            .borrow_mut()
            .resolve_dir_for_listing(&self.osg, components.as_slice(), path)
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        let components = self.components(path)?;
        Ok(self.overlay.borrow_mut().exists(&self.osg, components.as_slice()))
    }

    pub fn isdir(&self, path: &str) -> Result<bool> {
        let components = self.components(path)?;
        Ok(self.overlay.borrow_mut().isdir(&self.osg, components.as_slice()))
    }

    pub fn isfile(&self, path: &str) -> Result<bool> {
        let components = self.components(path)?;
        Ok(self.overlay.borrow_mut().isfile(&self.osg, components.as_slice()))
    }

    pub fn rm(&self, path: &str) -> Result<()> {
        let components = self.components(path)?;
        self.overlay.borrow_mut().rm(&self.osg, components.as_slice(), path)
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let components = self.components(path)?;
        self.overlay
            .borrow_mut()
            .rmdir(&self.osg, components.as_slice(), path)
    }

    /// Sets the transaction's commit message. Mirrors the original system's
    /// `tx.note()`.
    pub fn note(&mut self, message: impl Into<String>) {
        self.meta.note(message);
    }

    /// Sets the transaction's author/committer user name, absent a more
    /// specific `extended_info("user", ...)` override.
    pub fn set_user(&mut self, user: impl Into<String>) {
        self.meta.set_user(user);
    }

    /// Sets an extended-info key. `"user"` overrides the author/committer
    /// name; `"email"` overrides the author/committer email.
    pub fn set_extended_info(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.meta.set_extended_info(key, value);
    }

    #[instrument(skip(self))]
    pub fn commit(&mut self) -> Result<()> {
        self.coordinator.commit(&self.overlay, &self.osg, &self.meta)?;
        self.meta = TransactionMeta::default();
        Ok(())
    }

    pub fn abort(&mut self) -> Result<()> {
        self.coordinator.abort(&self.overlay, &self.osg)?;
        self.meta = TransactionMeta::default();
        Ok(())
    }
}
