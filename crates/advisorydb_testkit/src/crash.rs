//! Crash and corruption simulation.
//!
//! Two kinds of helpers:
//!
//! 1. **Damaged files** - [`corrupt_byte`], [`truncate_tail`] and
//!    [`append_garbage`] edit a closed store file the way a bad disk or a
//!    killed process would.
//! 2. **Failing writes** - [`CrashableBackend`] wraps a backend and fails
//!    appends or syncs on demand, optionally leaving a partial write behind.
//!
//! ## Usage
//!
//! ```rust
//! use advisorydb_core::{Store, StoreOptions};
//! use advisorydb_testkit::crash::corrupt_byte;
//!
//! let dir = tempfile::tempdir().unwrap();
//! Store::open(dir.path(), StoreOptions::default()).unwrap().close().unwrap();
//! corrupt_byte(&Store::path(dir.path()), 0).unwrap();
//!
//! let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
//! assert!(store.recovered_from_corruption());
//! ```

use advisorydb_storage::{StorageBackend, StorageError, StorageResult};
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Flips every bit of the byte at `offset`.
///
/// # Errors
///
/// Returns an error if the file cannot be edited or is shorter than
/// `offset + 1` bytes.
pub fn corrupt_byte(path: &Path, offset: u64) -> io::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut byte)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&[!byte[0]])?;
    file.sync_all()
}

/// Cuts `count` bytes off the end of the file, as a write interrupted
/// mid-record would.
///
/// # Errors
///
/// Returns an error if the file cannot be edited.
pub fn truncate_tail(path: &Path, count: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len();
    file.set_len(len.saturating_sub(count))?;
    file.sync_all()
}

/// Appends `bytes` to the file.
///
/// # Errors
///
/// Returns an error if the file cannot be edited.
pub fn append_garbage(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Shared switches of a [`CrashableBackend`].
///
/// Clones control the same backend, so a test can keep one after handing
/// the backend to a store.
#[derive(Debug, Clone, Default)]
pub struct CrashSwitch {
    inner: Arc<SwitchState>,
}

#[derive(Debug)]
struct SwitchState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl Default for SwitchState {
    fn default() -> Self {
        Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }
}

impl CrashSwitch {
    /// Fails the append that would take the total written past `bytes`
    /// more bytes from now, keeping the part that fits.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.inner.bytes_written.load(Ordering::SeqCst);
        self.inner
            .crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether flush and sync fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.inner.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Clears every armed failure.
    pub fn reset(&self) {
        self.inner.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.inner.crashed.store(false, Ordering::SeqCst);
        self.inner.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Returns whether a simulated failure has fired.
    pub fn has_crashed(&self) -> bool {
        self.inner.crashed.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: CrashSwitch,
}

impl CrashableBackend {
    /// Wraps `inner`; returns the backend and its switch.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, CrashSwitch) {
        let switch = CrashSwitch::default();
        (
            Self {
                inner,
                switch: switch.clone(),
            },
            switch,
        )
    }

    fn simulated(&self, what: &str) -> StorageError {
        self.switch.inner.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let state = &self.switch.inner;
        let current = state.bytes_written.load(Ordering::SeqCst);
        let threshold = state.crash_after_bytes.load(Ordering::SeqCst);

        if current.saturating_add(bytes.len()) > threshold {
            // Keep what fits, like a write cut short by power loss.
            let partial = threshold.saturating_sub(current).min(bytes.len());
            if partial > 0 {
                self.inner.append(&bytes[..partial])?;
                state.bytes_written.fetch_add(partial, Ordering::SeqCst);
            }
            return Err(self.simulated("write"));
        }

        let offset = self.inner.append(bytes)?;
        state.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.switch.inner.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.simulated("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switch.inner.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.simulated("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}
