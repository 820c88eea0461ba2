//! The store handle: open, recover, transact, compact, close.

use crate::batch::{BatchFn, Batcher};
use crate::bucket::{Bucket, BucketPath, ScanSpec};
use crate::config::StoreOptions;
use crate::dir::{
    compact_path, db_dir, db_path, ensure_dir, lock_store, open_data_file, remove_store_file,
    sync_directory, FileLock,
};
use crate::error::{CoreError, CoreResult};
use crate::log::{CommitLog, LogRecord, ReplaySummary};
use crate::provenance::{self, DataSource};
use crate::stats::StoreStats;
use crate::transaction::{BucketView, ReadTx, WriteTx};
use crate::types::{SequenceNumber, TransactionId};
use advisorydb_codec::Decode;
use advisorydb_storage::{FileBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Version of the record layout stored in the buckets.
///
/// The store itself never checks it; the owning application compares it
/// against the version its data was built with.
pub const SCHEMA_VERSION: u32 = 2;

/// Path reported for stores without a file.
const MEMORY_PATH: &str = ":memory:";

/// Steps of [`Store::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenPhase {
    Unopened,
    FaultDetected,
    Recreating,
    Open,
}

/// One value returned by [`Store::for_each`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanValue {
    /// Provenance of the root bucket the value was read from, if recorded.
    pub source: Option<DataSource>,
    /// The stored bytes.
    pub content: Vec<u8>,
}

impl ScanValue {
    /// Decodes the content as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid `T`.
    pub fn decode<T: Decode>(&self) -> CoreResult<T> {
        Ok(T::decode(&self.content)?)
    }
}

struct Committed {
    root: Arc<Bucket>,
    sequence: SequenceNumber,
}

struct Writer {
    log: CommitLog,
    next_txid: TransactionId,
    /// Held for as long as the store is open, across compaction and
    /// recovery. `None` without a file or lock file.
    lock: Option<FileLock>,
}

/// What opening a log produced.
struct Loaded {
    log: CommitLog,
    root: Bucket,
    summary: ReplaySummary,
}

/// An open advisory store.
///
/// A `Store` owns one store file (or an in-memory buffer) for its whole
/// life. Reads run against committed snapshots and never block the single
/// writer; writes go through [`Store::update`] or the coalescing
/// [`Store::batch_update`].
///
/// # Opening a Store
///
/// ```rust,no_run
/// use advisorydb_core::{BucketPath, Store, StoreOptions};
///
/// let store = Store::open("/var/cache/advisories", StoreOptions::default())?;
/// let path = BucketPath::new(["vulnerability"])?;
/// store.update(|tx| tx.put(&path, "CVE-2021-44228", "Log4Shell"))?;
/// assert!(store.get(&path, "CVE-2021-44228")?.is_some());
/// store.close()?;
/// # Ok::<(), advisorydb_core::CoreError>(())
/// ```
///
/// # Corruption
///
/// If the file turns out to be damaged while opening, a writable store
/// deletes it and starts over empty. The data is gone; it is expected to be
/// rebuilt from the feeds. [`Store::recovered_from_corruption`] tells the
/// caller this happened. Read-only stores report the corruption instead.
pub struct Store {
    options: StoreOptions,
    /// Store file. None for stores opened over a bare backend.
    path: Option<PathBuf>,
    committed: RwLock<Committed>,
    writer: Mutex<Option<Writer>>,
    batcher: Batcher,
    is_open: RwLock<bool>,
    recovered: bool,
}

impl Store {
    /// Opens or creates the store under `root`, at [`Store::path`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory or file cannot be created or opened (`Open`)
    /// - The file lock is not acquired in time (`LockTimeout`)
    /// - A read-only open finds no store (`NotInitialized`)
    /// - A read-only open finds a damaged store
    /// - Recreating a damaged store fails too (`RecoveryFailed`)
    pub fn open(root: impl AsRef<Path>, options: StoreOptions) -> CoreResult<Self> {
        let root = root.as_ref();
        let dir = Self::dir(root);
        let path = Self::path(root);
        if !options.read_only {
            ensure_dir(&dir)?;
        }
        if options.mlock {
            warn!(path = %path.display(), "mlock is not supported; ignoring");
        }

        let mut phase = OpenPhase::Unopened;
        debug!(path = %path.display(), ?phase, "opening store");
        let lock = lock_store(&path, &options)?;

        let (loaded, recovered) = match Self::load_file(&path, &options) {
            Ok(loaded) => (loaded, false),
            Err(fault) if fault.is_corruption() && !options.read_only => {
                phase = OpenPhase::FaultDetected;
                warn!(path = %path.display(), error = %fault, ?phase, "store file is corrupt");

                phase = OpenPhase::Recreating;
                info!(path = %path.display(), ?phase, "deleting and recreating store file");
                let recreated = remove_store_file(&path)
                    .and_then(|()| Self::load_file(&path, &options));
                match recreated {
                    Ok(loaded) => (loaded, true),
                    Err(source) => {
                        return Err(CoreError::RecoveryFailed {
                            path,
                            fault: fault.to_string(),
                            source: Box::new(source),
                        })
                    }
                }
            }
            Err(e) => return Err(e),
        };

        phase = OpenPhase::Open;
        info!(
            path = %path.display(),
            ?phase,
            sequence = %loaded.summary.sequence,
            records = loaded.summary.records,
            recovered,
            "store opened"
        );
        Self::assemble(options, Some(path), loaded, lock, recovered)
    }

    /// Opens a store over an arbitrary backend, with no file or lock.
    ///
    /// Corruption is handled as for files: the backend is cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or written.
    pub fn open_with_backend(
        backend: Box<dyn StorageBackend>,
        options: StoreOptions,
    ) -> CoreResult<Self> {
        let mut log = CommitLog::new(backend, &options);
        let (root, summary, recovered) = match replay(&mut log) {
            Ok((root, summary)) => (root, summary, false),
            Err(fault) if fault.is_corruption() && !options.read_only => {
                warn!(error = %fault, "store backend is corrupt; clearing it");
                let recreated = log.reset().and_then(|()| replay(&mut log));
                match recreated {
                    Ok((root, summary)) => (root, summary, true),
                    Err(source) => {
                        return Err(CoreError::RecoveryFailed {
                            path: PathBuf::from(MEMORY_PATH),
                            fault: fault.to_string(),
                            source: Box::new(source),
                        })
                    }
                }
            }
            Err(e) => return Err(e),
        };
        let loaded = Loaded { log, root, summary };
        Self::assemble(options, None, loaded, None, recovered)
    }

    /// Opens a fresh store that lives only in memory.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other openers.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(
            Box::new(advisorydb_storage::InMemoryBackend::new()),
            StoreOptions::default(),
        )
    }

    /// Directory that holds the store under `root`. No I/O.
    #[must_use]
    pub fn dir(root: impl AsRef<Path>) -> PathBuf {
        db_dir(root.as_ref())
    }

    /// Path of the store file under `root`. No I/O.
    #[must_use]
    pub fn path(root: impl AsRef<Path>) -> PathBuf {
        db_path(root.as_ref())
    }

    fn load_file(path: &Path, options: &StoreOptions) -> CoreResult<Loaded> {
        let file = open_data_file(path, options)?;
        let backend = FileBackend::from_file(path, file, options.read_only)?;
        let mut log = CommitLog::new(Box::new(backend), options);

        let (root, summary) = replay(&mut log).map_err(|e| match e {
            CoreError::NotInitialized { .. } => CoreError::NotInitialized {
                path: path.to_path_buf(),
            },
            other => other,
        })?;

        if summary.created && !options.no_grow_sync {
            if let Some(dir) = path.parent() {
                sync_directory(dir)?;
            }
        }

        Ok(Loaded { log, root, summary })
    }

    fn assemble(
        options: StoreOptions,
        path: Option<PathBuf>,
        loaded: Loaded,
        lock: Option<FileLock>,
        recovered: bool,
    ) -> CoreResult<Self> {
        let Loaded { log, root, summary } = loaded;

        if options.preload_freelist {
            let stats = StoreStats::measure(&root, summary.sequence, log.size()?)?;
            debug!(
                live_bytes = stats.live_bytes,
                reclaimable_bytes = stats.reclaimable_bytes,
                "measured store space"
            );
        }

        // Snapshots carry no transaction ID; commits never outnumber sequence numbers.
        let next_txid = summary
            .last_txid
            .next()
            .max(TransactionId::new(summary.sequence.as_u64() + 1));
        let batcher = Batcher::new(options.max_batch_size, options.max_batch_delay);
        Ok(Self {
            options,
            path,
            committed: RwLock::new(Committed {
                root: Arc::new(root),
                sequence: summary.sequence,
            }),
            writer: Mutex::new(Some(Writer {
                log,
                next_txid,
                lock,
            })),
            batcher,
            is_open: RwLock::new(true),
            recovered,
        })
    }

    /// Returns `true` if opening found a damaged store and replaced it.
    #[must_use]
    pub fn recovered_from_corruption(&self) -> bool {
        self.recovered
    }

    /// The store file, or `None` for backend-only stores.
    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The options the store was opened with.
    #[must_use]
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Starts a read transaction on the latest commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] after [`Store::close`].
    pub fn begin_read(&self) -> CoreResult<ReadTx> {
        self.ensure_open()?;
        let committed = self.committed.read();
        Ok(ReadTx::new(Arc::clone(&committed.root), committed.sequence))
    }

    /// Runs `f` against a snapshot of the latest commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] after close, or what `f` returns.
    pub fn view<F, R>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&ReadTx) -> CoreResult<R>,
    {
        let tx = self.begin_read()?;
        f(&tx)
    }

    /// Runs `f` in a write transaction and commits what it wrote.
    ///
    /// Writers are serialized. If `f` returns an error nothing it wrote is
    /// kept and the error is returned unchanged. A transaction that wrote
    /// nothing does not touch the file.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` or `DatabaseClosed` when writing is not possible,
    /// the error of `f`, or the error of appending the commit.
    pub fn update<F, R>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut WriteTx) -> CoreResult<R>,
    {
        self.ensure_open()?;
        if self.options.read_only {
            return Err(CoreError::ReadOnly);
        }

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(CoreError::DatabaseClosed)?;

        let (base, sequence) = {
            let committed = self.committed.read();
            (Bucket::clone(&committed.root), committed.sequence)
        };

        let mut tx = WriteTx::new(writer.next_txid, base);
        let value = f(&mut tx)?;
        if !tx.has_changes() {
            return Ok(value);
        }

        let txid = tx.id();
        let (root, ops) = tx.into_parts();
        let sequence = sequence.next();
        writer.log.append(&LogRecord::Commit {
            txid,
            sequence,
            ops,
        })?;
        writer.next_txid = txid.next();

        *self.committed.write() = Committed {
            root: Arc::new(root),
            sequence,
        };
        Ok(value)
    }

    /// Runs `f` in a write transaction that may be shared with concurrent
    /// callers.
    ///
    /// `f` can run more than once: when a batch fails, each function in it
    /// is retried. It must only act through the transaction. Calling back
    /// into this store from inside `f` deadlocks.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` from its solo run, `Panicked` if it panicked,
    /// or `Batch` if the shared commit failed.
    pub fn batch_update<F>(&self, f: F) -> CoreResult<()>
    where
        F: Fn(&mut WriteTx) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let f: BatchFn = Arc::new(f);
        self.batcher.run(self, f)
    }

    /// Returns a copy of the value under `key` in the bucket at `path`.
    ///
    /// A missing bucket or key is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] after close.
    pub fn get(&self, path: &BucketPath, key: impl AsRef<[u8]>) -> CoreResult<Option<Vec<u8>>> {
        let tx = self.begin_read()?;
        Ok(tx.get(path, key.as_ref()).map(|value| value.to_vec()))
    }

    /// Reads every entry under `spec` from every matching root bucket.
    ///
    /// Each value is tagged with the provenance of the root it came from.
    /// Roots without the nested chain are skipped. Keys are merged across
    /// roots and a later root overwrites an earlier one with the same key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] after close. Provenance
    /// failures are logged and reported as unknown provenance.
    pub fn for_each(&self, spec: &ScanSpec) -> CoreResult<HashMap<String, ScanValue>> {
        let tx = self.begin_read()?;
        let mut values = HashMap::new();

        for root_name in tx.resolve_roots(spec.root()) {
            let source = match provenance::lookup(&tx, &root_name) {
                Ok(Some(source)) => Some(source),
                Ok(None) => {
                    debug!(root = %root_name, "no data source recorded");
                    None
                }
                Err(e) => {
                    debug!(root = %root_name, error = %e, "data source lookup failed");
                    None
                }
            };

            let Some(bucket) = tx.bucket(&spec.path_for(&root_name)) else {
                continue;
            };
            // Puts reject non-UTF-8 keys, so this conversion is exact.
            for (key, value) in bucket.entries() {
                values.insert(
                    String::from_utf8_lossy(key).into_owned(),
                    ScanValue {
                        source: source.clone(),
                        content: value.to_vec(),
                    },
                );
            }
        }

        Ok(values)
    }

    /// Deletes the root bucket `name` and everything in it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNotFound`] (wrapped) if it does not exist.
    pub fn delete_bucket(&self, name: &str) -> CoreResult<()> {
        let path = BucketPath::root(name)?;
        self.update(|tx| tx.delete_bucket(&path))
    }

    /// Measures the store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] after close.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        self.ensure_open()?;
        let guard = self.writer.lock();
        let writer = guard.as_ref().ok_or(CoreError::DatabaseClosed)?;
        let committed = self.committed.read();
        StoreStats::measure(&committed.root, committed.sequence, writer.log.size()?)
    }

    /// Rewrites the store as a single snapshot, dropping superseded history.
    ///
    /// File-backed stores write a new file beside the old one and rename it
    /// into place, so a crash leaves either the old file or the new one.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` or `DatabaseClosed` when writing is not possible,
    /// or the I/O error that stopped the rewrite.
    pub fn compact(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.options.read_only {
            return Err(CoreError::ReadOnly);
        }
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(CoreError::DatabaseClosed)?;
        self.compact_locked(writer)
    }

    fn compact_locked(&self, writer: &mut Writer) -> CoreResult<()> {
        let (root, sequence) = {
            let committed = self.committed.read();
            (Arc::clone(&committed.root), committed.sequence)
        };
        let before = writer.log.size()?;
        let snapshot = LogRecord::Snapshot {
            sequence,
            ops: root.snapshot_ops(),
        };

        match &self.path {
            Some(path) => {
                let temp = compact_path(path);
                let options = self.options.clone().page_size(writer.log.page_size());
                match Self::write_snapshot(&temp, &options, &snapshot) {
                    Ok(log) => {
                        if let Err(e) = fs::rename(&temp, path) {
                            let _ = fs::remove_file(&temp);
                            return Err(e.into());
                        }
                        if !self.options.no_grow_sync {
                            if let Some(dir) = path.parent() {
                                sync_directory(dir)?;
                            }
                        }
                        writer.log = log;
                    }
                    Err(e) => {
                        let _ = fs::remove_file(&temp);
                        return Err(e);
                    }
                }
            }
            None => {
                writer.log.reset()?;
                writer.log.append(&snapshot)?;
            }
        }

        info!(
            before,
            after = writer.log.size()?,
            sequence = %sequence,
            "compacted store"
        );
        Ok(())
    }

    fn write_snapshot(
        temp: &Path,
        options: &StoreOptions,
        snapshot: &LogRecord,
    ) -> CoreResult<CommitLog> {
        remove_store_file(temp)?;
        let file = open_data_file(temp, options)?;
        let backend = FileBackend::from_file(temp, file, false)?;
        let mut log = CommitLog::new(Box::new(backend), options);
        log.replay(|_| Ok(()))?;
        log.append(snapshot)?;
        log.sync()?;
        Ok(log)
    }

    /// Closes the store.
    ///
    /// Syncs the file, compacts it first when enough space is reclaimable
    /// (unless `no_freelist_sync` is set), and releases the file lock.
    /// Closing twice is a no-op. Every later operation fails with
    /// [`CoreError::DatabaseClosed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails. Compaction failures are
    /// logged and do not fail the close.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;
        drop(is_open);

        let Some(mut writer) = self.writer.lock().take() else {
            return Ok(());
        };

        if !self.options.read_only && !self.options.no_freelist_sync {
            let stats = {
                let committed = self.committed.read();
                StoreStats::measure(&committed.root, committed.sequence, writer.log.size()?)?
            };
            if stats.worth_compacting() {
                if let Err(e) = self.compact_locked(&mut writer) {
                    warn!(error = %e, "compaction on close failed");
                }
            }
        }

        writer.log.sync()?;
        debug!(
            path = %self.path.as_deref().unwrap_or(Path::new(MEMORY_PATH)).display(),
            "store closed"
        );
        Ok(())
    }
}

/// Rebuilds the tree from the log.
fn replay(log: &mut CommitLog) -> CoreResult<(Bucket, ReplaySummary)> {
    let mut root = Bucket::new();
    let summary = log.replay(|record| {
        if matches!(record, LogRecord::Snapshot { .. }) {
            root = Bucket::new();
        }
        for op in record.ops() {
            root.apply(op)?;
        }
        Ok(())
    })?;
    Ok((root, summary))
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let committed = self.committed.read();
        // try_lock: formatting must not wait on a running writer.
        let lock = self.writer.try_lock().and_then(|writer| {
            writer
                .as_ref()
                .and_then(|w| w.lock.as_ref())
                .map(|lock| (lock.path().to_path_buf(), lock.mode()))
        });
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("is_open", &self.is_open())
            .field("sequence", &committed.sequence)
            .field("read_only", &self.options.read_only)
            .field("lock", &lock)
            .field("recovered", &self.recovered)
            .finish_non_exhaustive()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::FILE_HEADER_SIZE;
    use advisorydb_storage::InMemoryBackend;
    use std::time::Duration;
    use tempfile::tempdir;

    fn vuln_path() -> BucketPath {
        BucketPath::root("vulnerability").unwrap()
    }

    fn memory_store(backend: &InMemoryBackend) -> Store {
        Store::open_with_backend(Box::new(backend.clone()), StoreOptions::default()).unwrap()
    }

    #[test]
    fn path_helpers_do_no_io() {
        let root = Path::new("/nonexistent/cache");
        assert_eq!(Store::dir(root), PathBuf::from("/nonexistent/cache/db"));
        assert_eq!(
            Store::path(root),
            PathBuf::from("/nonexistent/cache/db/advisory.db")
        );
        assert!(!root.exists());
    }

    #[test]
    fn open_creates_directory_and_file() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        assert!(Store::path(dir.path()).exists());
        assert_eq!(store.file_path(), Some(Store::path(dir.path()).as_path()));
        assert!(!store.recovered_from_corruption());
    }

    #[test]
    fn put_get_and_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
            store
                .update(|tx| tx.put(&vuln_path(), "CVE-2021-44228", "Log4Shell"))
                .unwrap();
            store.close().unwrap();
        }

        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        let bytes = store.get(&vuln_path(), "CVE-2021-44228").unwrap().unwrap();
        let title: String = advisorydb_codec::from_cbor(&bytes).unwrap();
        assert_eq!(title, "Log4Shell");
        assert_eq!(store.stats().unwrap().sequence, SequenceNumber::new(1));
    }

    #[test]
    fn missing_reads_are_empty() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get(&vuln_path(), "CVE-0").unwrap().is_none());
        let spec = ScanSpec::new("nothing", ["here"]).unwrap();
        assert!(store.for_each(&spec).unwrap().is_empty());
    }

    #[test]
    fn failed_update_writes_nothing() {
        let backend = InMemoryBackend::new();
        let store = memory_store(&backend);
        let size = backend.data().len();

        let result: CoreResult<()> = store.update(|tx| {
            tx.put(&vuln_path(), "CVE-1", "one")?;
            tx.put(&vuln_path(), "CVE-2", "two")?;
            Err(CoreError::KeyRequired)
        });
        assert!(result.is_err());
        assert!(store.get(&vuln_path(), "CVE-1").unwrap().is_none());
        assert_eq!(backend.data().len(), size);
    }

    #[test]
    fn empty_update_does_not_commit() {
        let store = Store::open_in_memory().unwrap();
        store.update(|_| Ok(())).unwrap();
        assert_eq!(store.stats().unwrap().sequence, SequenceNumber::default());
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = Store::open_in_memory().unwrap();
        let before = store.begin_read().unwrap();
        store.update(|tx| tx.put(&vuln_path(), "CVE-1", "x")).unwrap();

        assert!(before.get(&vuln_path(), b"CVE-1").is_none());
        assert!(store.get(&vuln_path(), "CVE-1").unwrap().is_some());
    }

    #[test]
    fn delete_bucket_semantics() {
        let store = Store::open_in_memory().unwrap();
        store.update(|tx| tx.put(&vuln_path(), "CVE-1", "x")).unwrap();
        store.delete_bucket("vulnerability").unwrap();
        assert!(store.get(&vuln_path(), "CVE-1").unwrap().is_none());

        let err = store.delete_bucket("vulnerability").unwrap_err();
        assert!(matches!(err.root_cause(), CoreError::BucketNotFound { .. }));
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let store = Store::open_in_memory().unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(!store.is_open());
        assert!(matches!(store.get(&vuln_path(), "k"), Err(CoreError::DatabaseClosed)));
        assert!(matches!(
            store.update(|_| Ok(())),
            Err(CoreError::DatabaseClosed)
        ));
        assert!(matches!(store.stats(), Err(CoreError::DatabaseClosed)));
    }

    #[test]
    fn corrupt_memory_backend_is_cleared() {
        let backend = InMemoryBackend::new();
        {
            let store = memory_store(&backend);
            store.update(|tx| tx.put(&vuln_path(), "CVE-1", "x")).unwrap();
        }
        let last = backend.data().len() - 1;
        backend.set_byte(last, backend.data()[last] ^ 0xFF);

        let store = memory_store(&backend);
        assert!(store.recovered_from_corruption());
        assert!(store.get(&vuln_path(), "CVE-1").unwrap().is_none());
        assert_eq!(backend.data().len(), FILE_HEADER_SIZE);
    }

    #[test]
    fn corrupt_file_is_recreated() {
        let dir = tempdir().unwrap();
        ensure_dir(&Store::dir(dir.path())).unwrap();
        fs::write(Store::path(dir.path()), b"garbage that is not a store").unwrap();

        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        assert!(store.recovered_from_corruption());
        assert_eq!(store.stats().unwrap().entries, 0);
        store.update(|tx| tx.put(&vuln_path(), "CVE-1", "x")).unwrap();
    }

    #[test]
    fn read_only_reports_corruption() {
        let dir = tempdir().unwrap();
        ensure_dir(&Store::dir(dir.path())).unwrap();
        let path = Store::path(dir.path());
        fs::write(&path, b"garbage that is not a store").unwrap();

        let err = Store::open(dir.path(), StoreOptions::default().read_only(true)).unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(fs::read(&path).unwrap(), b"garbage that is not a store");
    }

    #[test]
    fn read_only_requires_existing_store() {
        let dir = tempdir().unwrap();
        let err = Store::open(dir.path(), StoreOptions::default().read_only(true)).unwrap_err();
        assert!(matches!(err, CoreError::NotInitialized { .. }));
    }

    #[test]
    fn read_only_refuses_writes() {
        let dir = tempdir().unwrap();
        Store::open(dir.path(), StoreOptions::default())
            .unwrap()
            .update(|tx| tx.put(&vuln_path(), "CVE-1", "x"))
            .unwrap();

        let store = Store::open(dir.path(), StoreOptions::default().read_only(true)).unwrap();
        assert!(store.get(&vuln_path(), "CVE-1").unwrap().is_some());
        assert!(matches!(
            store.update(|tx| tx.put(&vuln_path(), "CVE-2", "y")),
            Err(CoreError::ReadOnly)
        ));
        assert!(matches!(store.compact(), Err(CoreError::ReadOnly)));
    }

    #[test]
    fn second_writer_times_out() {
        let dir = tempdir().unwrap();
        let _first = Store::open(dir.path(), StoreOptions::default()).unwrap();
        let err = Store::open(
            dir.path(),
            StoreOptions::default().timeout(Duration::from_millis(50)),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
    }

    #[test]
    fn compact_keeps_data_and_shrinks() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::default().no_sync(true)).unwrap();
        for round in 0..20 {
            store
                .update(|tx| tx.put(&vuln_path(), "CVE-1", &format!("revision {round}")))
                .unwrap();
        }
        let before = store.stats().unwrap();
        assert!(before.reclaimable_bytes > 0);

        store.compact().unwrap();
        let after = store.stats().unwrap();
        assert_eq!(after.file_size, after.live_bytes);
        assert_eq!(after.reclaimable_bytes, 0);
        assert_eq!(after.sequence, before.sequence);
        assert!(!crate::dir::compact_path(&Store::path(dir.path())).exists());

        store.update(|tx| tx.put(&vuln_path(), "CVE-2", "new")).unwrap();
        store.close().unwrap();

        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        let value: String =
            advisorydb_codec::from_cbor(&store.get(&vuln_path(), "CVE-1").unwrap().unwrap())
                .unwrap();
        assert_eq!(value, "revision 19");
        assert!(store.get(&vuln_path(), "CVE-2").unwrap().is_some());
        assert_eq!(store.stats().unwrap().sequence, SequenceNumber::new(21));
    }

    #[test]
    fn memory_compaction() {
        let store = Store::open_in_memory().unwrap();
        store.update(|tx| tx.put(&vuln_path(), "CVE-1", "a")).unwrap();
        store.update(|tx| tx.put(&vuln_path(), "CVE-1", "b")).unwrap();
        store.compact().unwrap();
        assert_eq!(store.stats().unwrap().reclaimable_bytes, 0);
        let value: String =
            advisorydb_codec::from_cbor(&store.get(&vuln_path(), "CVE-1").unwrap().unwrap())
                .unwrap();
        assert_eq!(value, "b");
    }

    #[test]
    fn open_hook_is_used() {
        use crate::config::OpenFileHook;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook = OpenFileHook::new(move |path, options| {
            counter.fetch_add(1, Ordering::SeqCst);
            options.open(path)
        });

        let store = Store::open(dir.path(), StoreOptions::default().open_file(hook)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        store.update(|tx| tx.put(&vuln_path(), "CVE-1", "x")).unwrap();
    }

    fn header_page_size(root: &Path) -> u32 {
        let bytes = fs::read(Store::path(root)).unwrap();
        crate::log::FileHeader::decode(&bytes[..FILE_HEADER_SIZE])
            .unwrap()
            .page_size
    }

    #[test]
    fn page_size_is_fixed_by_the_creating_open() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::default().page_size(8192)).unwrap();
        store.update(|tx| tx.put(&vuln_path(), "CVE-1", "x")).unwrap();
        store.close().unwrap();
        assert_eq!(header_page_size(dir.path()), 8192);

        let store = Store::open(dir.path(), StoreOptions::default().page_size(16384)).unwrap();
        store.compact().unwrap();
        store.close().unwrap();
        assert_eq!(header_page_size(dir.path()), 8192);
    }

    #[test]
    fn preload_freelist_opens_with_history() {
        let dir = tempdir().unwrap();
        {
            let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
            for round in 0..5 {
                store
                    .update(|tx| tx.put(&vuln_path(), "CVE-1", &format!("revision {round}")))
                    .unwrap();
            }
        }

        let options = StoreOptions::default().preload_freelist(true);
        let store = Store::open(dir.path(), options).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.sequence, SequenceNumber::new(5));
        assert!(stats.reclaimable_bytes > 0);
    }

    #[test]
    fn no_grow_sync_still_persists() {
        let dir = tempdir().unwrap();
        let options = StoreOptions::default().no_grow_sync(true);
        {
            let store = Store::open(dir.path(), options.clone()).unwrap();
            store.update(|tx| tx.put(&vuln_path(), "CVE-1", "x")).unwrap();
            store.compact().unwrap();
            store.update(|tx| tx.put(&vuln_path(), "CVE-2", "y")).unwrap();
        }

        let store = Store::open(dir.path(), options).unwrap();
        assert!(store.get(&vuln_path(), "CVE-1").unwrap().is_some());
        assert!(store.get(&vuln_path(), "CVE-2").unwrap().is_some());
    }

    #[test]
    fn small_read_buffer_replays_large_records() {
        let dir = tempdir().unwrap();
        let value = vec![0x42u8; 100 * 1024];
        {
            let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
            store
                .update(|tx| tx.put_bytes(&vuln_path(), "CVE-1", value.clone()))
                .unwrap();
            store.update(|tx| tx.put(&vuln_path(), "CVE-2", "small")).unwrap();
        }

        for size in [1, 1 << 20] {
            let options = StoreOptions::default().initial_mmap_size(size);
            let store = Store::open(dir.path(), options).unwrap();
            assert_eq!(store.get(&vuln_path(), "CVE-1").unwrap(), Some(value.clone()));
            assert!(store.get(&vuln_path(), "CVE-2").unwrap().is_some());
        }
    }

    #[test]
    fn undecodable_data_source_scans_as_unknown() {
        let store = Store::open_in_memory().unwrap();
        let ghsa = BucketPath::new(["pip::ghsa", "django"]).unwrap();
        let osv = BucketPath::new(["pip::osv", "django"]).unwrap();
        store
            .update(|tx| {
                tx.put(&ghsa, "CVE-1", "ghsa advisory")?;
                let sources = BucketPath::root(provenance::DATA_SOURCE_BUCKET)?;
                tx.put_bytes(&sources, "pip::ghsa", vec![0xFF, 0x00])?;
                tx.put(&osv, "CVE-2", "osv advisory")?;
                tx.put_data_source("pip::osv", &DataSource::new("osv", "OSV", "https://osv.dev"))
            })
            .unwrap();

        let values = store
            .for_each(&ScanSpec::new("pip::", ["django"]).unwrap())
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["CVE-1"].source, None);
        assert_eq!(values["CVE-1"].decode::<String>().unwrap(), "ghsa advisory");
        assert_eq!(
            values["CVE-2"].source,
            Some(DataSource::new("osv", "OSV", "https://osv.dev"))
        );
    }

    #[test]
    fn scan_value_decodes() {
        let store = Store::open_in_memory().unwrap();
        let nested = vuln_path().child("nvd").unwrap();
        store.update(|tx| tx.put(&nested, "CVE-1", "detail")).unwrap();
        let values = store
            .for_each(&ScanSpec::new("vulnerability", ["nvd"]).unwrap())
            .unwrap();
        assert_eq!(values["CVE-1"].decode::<String>().unwrap(), "detail");
        assert_eq!(values["CVE-1"].source, None);
    }
}
