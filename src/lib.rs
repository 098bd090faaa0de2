//! A transactional, hierarchical file store backed by a git repository.
//!
//! See `SPEC_FULL.md` in the repository root for the full design. In short:
//! [`RepositorySession`] opens or creates a git repository and presents an
//! open/read/write/mkdir interface rooted at its working tree. Writes are
//! staged in an in-memory overlay ([`overlay::Overlay`]) and only become a
//! git commit when [`RepositorySession::commit`] runs.

mod error;
mod handle;
mod osg;
mod overlay;
mod path;
mod session;
mod transaction;

pub use error::{Error, Result};
pub use handle::{Reader, Writer};
pub use session::{FileHandle, RepositorySession, RepositorySessionBuilder};
pub use transaction::TransactionMeta;
