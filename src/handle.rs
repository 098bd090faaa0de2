//! Streaming file handles returned by `RepositorySession::open`.
//!
//! A [`Writer`] streams bytes straight into the OSG's blob-hashing
//! subprocess; the blob hash, and therefore the overlay update, is only
//! known once `close` runs. A [`Reader`] streams bytes straight out of the
//! OSG's blob-extraction subprocess. Both hold a reference-counted handle
//! to the overlay so the commit-time open-handle check sees them.

use std::cell::RefCell;
use std::io::{self, Read as _, Write as _};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::osg::{BlobReader, BlobWriter, ObjectStoreGateway};
use crate::overlay::{FileNode, Overlay};

/// A streaming writer over a staged file. Implements [`std::io::Write`].
/// Must be closed with [`Writer::close`] to finalize the write and publish
/// it to the overlay. Dropping without closing abandons the write: the
/// pending blob is discarded and the entry is restored to its prior state,
/// the same outcome as a failed close.
pub struct Writer {
    overlay: Rc<RefCell<Overlay>>,
    components: Vec<String>,
    prior: Option<FileNode>,
    inner: Option<BlobWriter>,
    closed: bool,
}

impl Writer {
    pub(crate) fn new(
        overlay: Rc<RefCell<Overlay>>,
        osg: &ObjectStoreGateway,
        components: Vec<String>,
        prior: Option<FileNode>,
    ) -> Result<Self> {
        let inner = osg.spawn_hash_object()?;
        overlay.borrow_mut().register_handle();
        Ok(Self {
            overlay,
            components,
            prior,
            inner: Some(inner),
            closed: false,
        })
    }

    /// Finalizes the write: the blob is sealed, and the overlay entry now
    /// points at it. On failure the entry is restored to its prior state.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let inner = self.inner.take().expect("inner present until closed");
        let result = match inner.finish() {
            Ok(hash) => {
                self.overlay
                    .borrow_mut()
                    .finalize_write(&self.components, hash);
                Ok(())
            }
            Err(err) => {
                self.overlay
                    .borrow_mut()
                    .restore_write(&self.components, self.prior.take());
                Err(err)
            }
        };
        self.overlay.borrow_mut().deregister_handle();
        result
    }

    /// Discards the pending write without finalizing the blob, restoring
    /// the entry to its prior state. Used when the writer is dropped
    /// without an explicit `close`.
    fn abandon(&mut self) {
        drop(self.inner.take());
        self.overlay
            .borrow_mut()
            .restore_write(&self.components, self.prior.take());
        self.overlay.borrow_mut().deregister_handle();
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .as_mut()
            .expect("write after close")
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.as_mut().expect("write after close").flush()
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.closed {
            self.abandon();
        }
    }
}

/// A streaming reader over a finalized blob. Implements [`std::io::Read`].
pub struct Reader {
    overlay: Rc<RefCell<Overlay>>,
    inner: Option<BlobReader>,
    failed: bool,
}

impl Reader {
    pub(crate) fn new(overlay: Rc<RefCell<Overlay>>, osg: &ObjectStoreGateway, hash: &str) -> Result<Self> {
        let inner = osg.cat_blob(hash)?;
        overlay.borrow_mut().register_handle();
        Ok(Self {
            overlay,
            inner: Some(inner),
            failed: false,
        })
    }
}

impl io::Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = self.inner.as_mut().expect("read after drop");
        inner.read(buf).inspect_err(|_| self.failed = true)
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.overlay.borrow_mut().deregister_handle();
        if let Some(reader) = self.inner.take() {
            if !self.failed {
                let _ = reader.finish();
            }
        }
    }
}

/// Maps an invalid mode string to the documented error.
pub(crate) fn validate_mode(mode: &str) -> Result<()> {
    match mode {
        "r" | "w" => Ok(()),
        other => Err(Error::BadMode(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn fixture() -> (tempfile::TempDir, ObjectStoreGateway, Rc<RefCell<Overlay>>) {
        let dir = tempfile::tempdir().unwrap();
        let osg = ObjectStoreGateway::new(dir.path());
        osg.init(false).unwrap();
        let overlay = Rc::new(RefCell::new(Overlay::new(None)));
        (dir, osg, overlay)
    }

    #[test]
    fn validate_mode_accepts_r_and_w() {
        assert!(validate_mode("r").is_ok());
        assert!(validate_mode("w").is_ok());
    }

    #[test]
    fn validate_mode_rejects_other() {
        let err = validate_mode("wtf").unwrap_err();
        assert!(matches!(err, Error::BadMode(m) if m == "wtf"));
    }

    #[test]
    fn writer_registers_and_close_deregisters_handle() {
        let (_dir, osg, overlay) = fixture();
        overlay
            .borrow_mut()
            .resolve_for_write(&osg, &["foo".to_string()], "foo")
            .unwrap();
        let mut writer = Writer::new(
            Rc::clone(&overlay),
            &osg,
            vec!["foo".to_string()],
            None,
        )
        .unwrap();
        assert_eq!(overlay.borrow().open_handle_count(), 1);
        writer.write_all(b"hello").unwrap();
        writer.close().unwrap();
        assert_eq!(overlay.borrow().open_handle_count(), 0);

        let hash = overlay
            .borrow_mut()
            .resolve_for_read(&osg, &["foo".to_string()], "foo")
            .unwrap();
        let mut reader = Reader::new(Rc::clone(&overlay), &osg, &hash).unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn dropping_writer_without_close_restores_prior_state() {
        let (_dir, osg, overlay) = fixture();
        overlay
            .borrow_mut()
            .resolve_for_write(&osg, &["foo".to_string()], "foo")
            .unwrap();
        {
            let mut writer = Writer::new(
                Rc::clone(&overlay),
                &osg,
                vec!["foo".to_string()],
                None,
            )
            .unwrap();
            writer.write_all(b"hello").unwrap();
        }
        assert_eq!(overlay.borrow().open_handle_count(), 0);
        assert!(!overlay.borrow_mut().exists(&osg, &["foo".to_string()]));
    }
}
