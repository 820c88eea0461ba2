//! Store configuration.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Page size written into new store files when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Default upper bound on calls coalesced into one batch commit.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Default time a batch leader waits for more calls to join.
pub const DEFAULT_MAX_BATCH_DELAY: Duration = Duration::from_millis(10);

/// Hook used instead of [`OpenOptions::open`] to open the store file.
///
/// The options passed in already carry the access mode the store needs.
#[derive(Clone)]
pub struct OpenFileHook(Arc<dyn Fn(&Path, &OpenOptions) -> io::Result<File> + Send + Sync>);

impl OpenFileHook {
    /// Wraps a file-opening function.
    pub fn new<F>(open: F) -> Self
    where
        F: Fn(&Path, &OpenOptions) -> io::Result<File> + Send + Sync + 'static,
    {
        Self(Arc::new(open))
    }

    /// Opens `path` through the hook.
    ///
    /// # Errors
    ///
    /// Returns whatever error the hook returns.
    pub fn open(&self, path: &Path, options: &OpenOptions) -> io::Result<File> {
        (self.0)(path, options)
    }
}

impl fmt::Debug for OpenFileHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OpenFileHook(..)")
    }
}

/// Options for opening a store.
///
/// Several options are named after the page-based stores this layer has
/// historically sat on. Their effect here:
///
/// - `no_freelist_sync` skips reclaiming superseded log space when closing
/// - `preload_freelist` computes the reclaimable-space figures while opening
/// - `initial_mmap_size` sizes the read buffer used to replay the log
/// - `page_size` is recorded in new files and sets the replay read chunk
/// - `mlock` is accepted and ignored with a warning
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Open with a shared lock and refuse every write.
    pub read_only: bool,

    /// How long to wait for the file lock. Zero waits indefinitely.
    pub timeout: Duration,

    /// Skip the directory fsync after the store file is created or replaced.
    pub no_grow_sync: bool,

    /// Never compact on close.
    pub no_freelist_sync: bool,

    /// Compute space statistics eagerly on open.
    pub preload_freelist: bool,

    /// Request that the file be locked in memory.
    pub mlock: bool,

    /// Initial capacity of the replay read buffer, in bytes.
    pub initial_mmap_size: usize,

    /// Page size for newly created files. Zero means [`DEFAULT_PAGE_SIZE`].
    pub page_size: u32,

    /// Flush commits to the OS without waiting for them to reach disk.
    pub no_sync: bool,

    /// Custom function used to open the store file.
    pub open_file: Option<OpenFileHook>,

    /// Most calls one coalesced batch commit may hold. Zero disables coalescing.
    pub max_batch_size: usize,

    /// How long a batch leader waits for other calls. Zero disables coalescing.
    pub max_batch_delay: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            timeout: Duration::ZERO,
            no_grow_sync: false,
            no_freelist_sync: false,
            preload_freelist: false,
            mlock: false,
            initial_mmap_size: 0,
            page_size: 0,
            no_sync: false,
            open_file: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_delay: DEFAULT_MAX_BATCH_DELAY,
        }
    }
}

impl StoreOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the lock acquisition timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether to skip directory fsyncs.
    #[must_use]
    pub const fn no_grow_sync(mut self, value: bool) -> Self {
        self.no_grow_sync = value;
        self
    }

    /// Sets whether to skip compaction on close.
    #[must_use]
    pub const fn no_freelist_sync(mut self, value: bool) -> Self {
        self.no_freelist_sync = value;
        self
    }

    /// Sets whether to compute space statistics on open.
    #[must_use]
    pub const fn preload_freelist(mut self, value: bool) -> Self {
        self.preload_freelist = value;
        self
    }

    /// Sets the memory-lock request.
    #[must_use]
    pub const fn mlock(mut self, value: bool) -> Self {
        self.mlock = value;
        self
    }

    /// Sets the initial replay buffer size.
    #[must_use]
    pub const fn initial_mmap_size(mut self, size: usize) -> Self {
        self.initial_mmap_size = size;
        self
    }

    /// Sets the page size for new files.
    #[must_use]
    pub const fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets whether commits skip fsync.
    #[must_use]
    pub const fn no_sync(mut self, value: bool) -> Self {
        self.no_sync = value;
        self
    }

    /// Sets the file-open hook.
    #[must_use]
    pub fn open_file(mut self, hook: OpenFileHook) -> Self {
        self.open_file = Some(hook);
        self
    }

    /// Sets the batch size limit.
    #[must_use]
    pub const fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the batch delay.
    #[must_use]
    pub const fn max_batch_delay(mut self, delay: Duration) -> Self {
        self.max_batch_delay = delay;
        self
    }

    /// Page size used for new files.
    #[must_use]
    pub const fn effective_page_size(&self) -> u32 {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }

    /// Returns `true` if concurrent batch calls may be coalesced.
    #[must_use]
    pub const fn batching_enabled(&self) -> bool {
        self.max_batch_size > 0 && !self.max_batch_delay.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = StoreOptions::default();
        assert!(!options.read_only);
        assert_eq!(options.timeout, Duration::ZERO);
        assert_eq!(options.effective_page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(options.max_batch_size, 1000);
        assert_eq!(options.max_batch_delay, Duration::from_millis(10));
        assert!(options.batching_enabled());
        assert!(options.open_file.is_none());
    }

    #[test]
    fn builder_pattern() {
        let options = StoreOptions::new()
            .read_only(true)
            .timeout(Duration::from_secs(1))
            .page_size(8192)
            .no_sync(true)
            .max_batch_size(0);

        assert!(options.read_only);
        assert_eq!(options.timeout, Duration::from_secs(1));
        assert_eq!(options.effective_page_size(), 8192);
        assert!(options.no_sync);
        assert!(!options.batching_enabled());
    }

    #[test]
    fn hook_is_called() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hooked");
        let hook = OpenFileHook::new(|path, options| options.open(path));
        let options = StoreOptions::new().open_file(hook);

        let mut open = OpenOptions::new();
        open.write(true).create(true);
        let file = options.open_file.as_ref().unwrap().open(&path, &open);
        assert!(file.is_ok());
        assert!(path.exists());
        assert_eq!(format!("{:?}", options.open_file.unwrap()), "OpenFileHook(..)");
    }
}
