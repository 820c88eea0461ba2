//! Store file layout and locking.
//!
//! ```text
//! <root>/
//! └─ db/
//!    ├─ advisory.db    # header + commit log
//!    └─ advisory.lock  # advisory lock for single-writer
//! ```
//!
//! The lock lives in its own file because compaction renames a new store
//! file into place and recovery deletes the old one. Writers hold it
//! exclusively, read-only opens share it.

use crate::config::StoreOptions;
use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Directory under the root that holds the store.
pub const DB_DIR: &str = "db";

/// Store file name.
pub const DB_FILE: &str = "advisory.db";

/// Lock file name. Never renamed or removed.
pub const LOCK_FILE: &str = "advisory.lock";

/// Suffix of the temporary file written by compaction.
const COMPACT_SUFFIX: &str = "compact";

/// Longest sleep between lock attempts.
const MAX_LOCK_POLL: Duration = Duration::from_millis(50);

/// Returns `<root>/db`.
#[must_use]
pub fn db_dir(root: &Path) -> PathBuf {
    root.join(DB_DIR)
}

/// Returns `<root>/db/advisory.db`.
#[must_use]
pub fn db_path(root: &Path) -> PathBuf {
    db_dir(root).join(DB_FILE)
}

/// Returns the temporary path compaction writes before renaming.
pub(crate) fn compact_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(COMPACT_SUFFIX);
    path.with_file_name(name)
}

/// Returns the lock file guarding the store file at `path`.
pub(crate) fn lock_path(path: &Path) -> PathBuf {
    path.with_file_name(LOCK_FILE)
}

/// Creates `dir` and its parents, owner-only on Unix.
pub(crate) fn ensure_dir(dir: &Path) -> CoreResult<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|source| CoreError::Open {
        path: dir.to_path_buf(),
        source,
    })
}

/// Opens the store file with the access `options` call for.
///
/// Writable opens create the file; read-only opens require it.
pub(crate) fn open_data_file(path: &Path, options: &StoreOptions) -> CoreResult<File> {
    let mut open = OpenOptions::new();
    open.read(true);
    if !options.read_only {
        open.write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open.mode(0o600);
        }
    }

    let result = match &options.open_file {
        Some(hook) => hook.open(path, &open),
        None => open.open(path),
    };

    result.map_err(|source| {
        if options.read_only && source.kind() == io::ErrorKind::NotFound {
            CoreError::NotInitialized {
                path: path.to_path_buf(),
            }
        } else {
            CoreError::Open {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// Takes the lock guarding the store file at `path`.
///
/// Writers create the lock file. Read-only opens must not create files, so
/// they go unlocked when no writer has ever made one.
pub(crate) fn lock_store(path: &Path, options: &StoreOptions) -> CoreResult<Option<FileLock>> {
    let lock_path = lock_path(path);
    let mode = LockMode::for_options(options);

    let mut open = OpenOptions::new();
    open.read(true);
    if mode == LockMode::Exclusive {
        open.write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open.mode(0o600);
        }
    }

    match open.open(&lock_path) {
        Ok(file) => FileLock::acquire(file, &lock_path, mode, options.timeout).map(Some),
        Err(e) if options.read_only && e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %lock_path.display(), "no lock file; reading unlocked");
            Ok(None)
        }
        Err(source) => Err(CoreError::Open {
            path: lock_path,
            source,
        }),
    }
}

/// Deletes the store file. A file that is already gone is not an error.
pub(crate) fn remove_store_file(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Makes renames, creations and deletions inside `dir` durable.
#[cfg(unix)]
pub(crate) fn sync_directory(dir: &Path) -> CoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// NTFS journals metadata updates; there is no directory handle to sync.
#[cfg(not(unix))]
pub(crate) fn sync_directory(_dir: &Path) -> CoreResult<()> {
    Ok(())
}

/// How a [`FileLock`] shares the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    /// Many readers.
    Shared,
    /// One writer, no readers from other handles.
    Exclusive,
}

impl LockMode {
    pub(crate) fn for_options(options: &StoreOptions) -> Self {
        if options.read_only {
            Self::Shared
        } else {
            Self::Exclusive
        }
    }

    fn try_lock(self, file: &File) -> io::Result<()> {
        match self {
            Self::Shared => FileExt::try_lock_shared(file),
            Self::Exclusive => FileExt::try_lock_exclusive(file),
        }
    }

    fn lock(self, file: &File) -> io::Result<()> {
        match self {
            Self::Shared => FileExt::lock_shared(file),
            Self::Exclusive => FileExt::lock_exclusive(file),
        }
    }
}

/// An advisory lock held on the lock file until dropped.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl FileLock {
    /// Locks `file`, waiting at most `timeout` (zero waits forever).
    pub(crate) fn acquire(
        file: File,
        path: &Path,
        mode: LockMode,
        timeout: Duration,
    ) -> CoreResult<Self> {
        if timeout.is_zero() {
            mode.lock(&file)?;
        } else {
            let deadline = Instant::now() + timeout;
            let poll = (timeout / 10).clamp(Duration::from_millis(1), MAX_LOCK_POLL);
            loop {
                match mode.try_lock(&file) {
                    Ok(()) => break,
                    Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                        if Instant::now() >= deadline {
                            return Err(CoreError::LockTimeout {
                                path: path.to_path_buf(),
                                timeout,
                            });
                        }
                        thread::sleep(poll);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode,
        })
    }

    /// Returns the locked path.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the lock mode.
    pub(crate) fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
