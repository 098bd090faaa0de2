//! Transaction Coordinator Adapter: the two-phase participant that turns a
//! staged overlay into a commit.
//!
//! The original system plugged into an ambient, thread-local transaction
//! manager that any code could join by touching shared state. That model
//! has no Rust analogue worth keeping — there is exactly one overlay per
//! session and no thread to hide the ambient state behind, so the adapter
//! is an explicit object the session drives directly instead of a
//! transaction-manager participant reached via thread-locals.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::osg::{CommitMeta, ObjectStoreGateway};
use crate::overlay::Overlay;

/// Commit metadata accumulated for the current transaction. Mirrors the
/// derivation order for authorship: `extended_info["user"]` if set, else
/// `user`, else `"unknown"`; email from `extended_info["email"]`, else
/// `"unknown@example.com"`. Committer mirrors author.
#[derive(Debug, Default, Clone)]
pub struct TransactionMeta {
    note: Option<String>,
    user: Option<String>,
    extended_info: BTreeMap<String, String>,
}

impl TransactionMeta {
    pub fn note(&mut self, message: impl Into<String>) {
        self.note = Some(message.into());
    }

    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = Some(user.into());
    }

    pub fn set_extended_info(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.extended_info.insert(key.into(), value.into());
    }

    fn author_name(&self) -> String {
        self.extended_info
            .get("user")
            .cloned()
            .or_else(|| self.user.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn author_email(&self) -> String {
        self.extended_info
            .get("email")
            .cloned()
            .unwrap_or_else(|| "unknown@example.com".to_string())
    }

    fn message(&self) -> String {
        self.note.clone().unwrap_or_default()
    }
}

/// Drives the tree -> commit -> ref algorithm. One instance per
/// [`crate::RepositorySession`]; reused across transactions by calling
/// `reset` after each commit or abort.
pub struct TransactionCoordinator {
    branch: String,
    non_bare: bool,
}

impl TransactionCoordinator {
    pub fn new(branch: impl Into<String>, non_bare: bool) -> Self {
        Self {
            branch: branch.into(),
            non_bare,
        }
    }

    /// Pre-commit check: fails with `OpenFileHandle` before any object-store
    /// mutation if any handle is still open.
    fn check_no_open_handles(overlay: &Overlay) -> Result<()> {
        if overlay.open_handle_count() > 0 {
            return Err(Error::OpenFileHandle);
        }
        Ok(())
    }

    /// Runs the full commit algorithm: emit trees, form a commit, CAS the
    /// branch ref, sync the working tree, and re-seed the overlay.
    #[instrument(skip_all, fields(branch = %self.branch))]
    pub fn commit(
        &self,
        overlay: &Rc<RefCell<Overlay>>,
        osg: &ObjectStoreGateway,
        meta: &TransactionMeta,
    ) -> Result<()> {
        {
            let overlay_ref = overlay.borrow();
            Self::check_no_open_handles(&overlay_ref)?;
            if !overlay_ref.is_mutated() {
                info!("commit is a no-op, no mutations staged");
                return Ok(());
            }
        }

        let parent = osg.rev_parse_branch(&self.branch)?;
        let root_hash = overlay.borrow().emit_root(osg)?;

        let parents: Vec<String> = parent.iter().cloned().collect();
        let author_name = meta.author_name();
        let author_email = meta.author_email();
        let commit_meta = CommitMeta {
            author_name: &author_name,
            author_email: &author_email,
            committer_name: &author_name,
            committer_email: &author_email,
            message: &meta.message(),
        };
        let commit_hash = osg.commit_tree(&root_hash, &parents, &commit_meta)?;

        osg.update_ref(&self.branch, &commit_hash, parent.as_deref())?;

        if self.non_bare {
            osg.read_tree_and_checkout(&root_hash)?;
        }

        overlay.borrow_mut().reseed(root_hash);
        info!(commit = %commit_hash, "transaction committed");
        Ok(())
    }

    /// Discards staged state. Blobs already written to the object store
    /// during the transaction are left as unreachable objects.
    pub fn abort(&self, overlay: &Rc<RefCell<Overlay>>, osg: &ObjectStoreGateway) -> Result<()> {
        let base = osg
            .rev_parse_branch(&self.branch)?
            .map(|commit| osg.tree_of_commit(&commit))
            .transpose()?;
        overlay.borrow_mut().reset(base);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_derivation_prefers_extended_info_user() {
        let mut meta = TransactionMeta::default();
        meta.set_user("alice");
        meta.set_extended_info("user", "bob");
        assert_eq!(meta.author_name(), "bob");
    }

    #[test]
    fn author_derivation_falls_back_to_set_user() {
        let mut meta = TransactionMeta::default();
        meta.set_user("alice");
        assert_eq!(meta.author_name(), "alice");
    }

    #[test]
    fn author_derivation_defaults_to_unknown() {
        let meta = TransactionMeta::default();
        assert_eq!(meta.author_name(), "unknown");
        assert_eq!(meta.author_email(), "unknown@example.com");
    }

    #[test]
    fn message_defaults_to_empty() {
        let meta = TransactionMeta::default();
        assert_eq!(meta.message(), "");
    }
}
