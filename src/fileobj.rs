//! Buffered writers for [`LakeFs`] and [`Transaction`].
//!
//! [`FileWriter`] accumulates writes and uploads on [`close()`](FileWriter::close).
//! [`TxWriter`] accumulates writes and buffers them into a [`Transaction`] on
//! [`close()`](TxWriter::close).
//!
//! Both implement [`std::io::Write`] so you can use `write!` / `write_all`.

use std::io;

use crate::error::Result;
use crate::fs::LakeFs;
use crate::transaction::Transaction;
use crate::types::ObjectInfo;

/// Buffered writer that uploads to a [`LakeFs`] path on close.
///
/// # Example
///
/// ```rust
/// use std::io::Write;
/// use lakefs_spec::{FsOptions, LakeFs, MemoryClient};
///
/// let fs = LakeFs::new(MemoryClient::with_repository("repo", "main").unwrap(), FsOptions::default());
/// let mut w = fs.writer("repo/main/output.bin").unwrap();
/// w.write_all(b"chunk 1").unwrap();
/// w.write_all(b"chunk 2").unwrap();
/// let info = w.close().unwrap();
/// assert_eq!(info.unwrap().size, 14);
/// ```
pub struct FileWriter {
    fs: LakeFs,
    path: String,
    buf: Vec<u8>,
    closed: bool,
}

impl FileWriter {
    pub(crate) fn new(fs: LakeFs, path: String) -> Self {
        Self {
            fs,
            path,
            buf: Vec::new(),
            closed: false,
        }
    }

    /// Whether this writer has been closed.
    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Upload the buffer. Returns `None` if the writer was already closed.
    pub fn close(&mut self) -> Result<Option<ObjectInfo>> {
        if self.closed {
            return Ok(None);
        }
        let data = std::mem::take(&mut self.buf);
        self.closed = true;
        self.fs.put(&self.path, &data).map(Some)
    }
}

impl io::Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "I/O operation on closed writer",
            ));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                log::warn!("upload of {} on drop failed: {}", self.path, e);
            }
        }
    }
}

/// Buffered writer that queues a write into a [`Transaction`] on close.
pub struct TxWriter<'a> {
    tx: &'a mut Transaction,
    resource: String,
    buf: Vec<u8>,
    closed: bool,
}

impl<'a> TxWriter<'a> {
    pub(crate) fn new(tx: &'a mut Transaction, resource: String) -> Self {
        Self {
            tx,
            resource,
            buf: Vec::new(),
            closed: false,
        }
    }

    /// Whether this writer has been closed.
    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Queue the buffered content in the transaction.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let data = std::mem::take(&mut self.buf);
        self.closed = true;
        self.tx.put(&self.resource, &data)
    }
}

impl io::Write for TxWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "I/O operation on closed writer",
            ));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for TxWriter<'_> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
