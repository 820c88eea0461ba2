//! Error types for the advisory store.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in advisory store operations.
///
/// A missing bucket or key on read is never an error; reads return `None`
/// or an empty map instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] advisorydb_storage::StorageError),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] advisorydb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store directory or file could not be opened.
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The file lock was not acquired within the configured timeout.
    #[error("timed out after {timeout:?} waiting for the lock on {}", .path.display())]
    LockTimeout {
        /// Locked file.
        path: PathBuf,
        /// How long the open waited.
        timeout: Duration,
    },

    /// A read-only open found no initialized store.
    #[error("store is not initialized: {}", .path.display())]
    NotInitialized {
        /// Expected store file.
        path: PathBuf,
    },

    /// The store file is damaged.
    #[error("store corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Corruption was detected and recreating the store also failed.
    #[error("failed to recreate {} after corruption ({fault}): {source}", .path.display())]
    RecoveryFailed {
        /// Store file that was being recreated.
        path: PathBuf,
        /// The corruption that triggered recovery.
        fault: String,
        /// Why recreation failed.
        #[source]
        source: Box<CoreError>,
    },

    /// A bucket path with no segments.
    #[error("empty bucket path")]
    EmptyBucketPath,

    /// A bucket name was empty.
    #[error("bucket name required")]
    BucketNameRequired,

    /// A bulk scan named only a root bucket.
    #[error("bucket must be nested: {path}")]
    ScanNotNested {
        /// The rejected scan path.
        path: String,
    },

    /// A record key was empty.
    #[error("key required")]
    KeyRequired,

    /// A record key was not valid UTF-8.
    #[error("key is not valid UTF-8: {key}")]
    KeyNotUtf8 {
        /// The key, rendered lossily.
        key: String,
    },

    /// A key names a bucket where a value was expected, or the reverse.
    #[error("incompatible value at key {key}")]
    IncompatibleValue {
        /// The conflicting key.
        key: String,
    },

    /// A bucket to delete does not exist.
    #[error("bucket not found: {name}")]
    BucketNotFound {
        /// Name of the bucket.
        name: String,
    },

    /// The store is closed.
    #[error("store is closed")]
    DatabaseClosed,

    /// The store was opened read-only.
    #[error("store is read-only")]
    ReadOnly,

    /// The shared commit of a coalesced batch failed.
    #[error("batch commit failed: {source}")]
    Batch {
        /// Failure shared by every call of the batch.
        #[source]
        source: Arc<CoreError>,
    },

    /// A batch function panicked.
    #[error("batch function panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string.
        message: String,
    },

    /// An operation failed; carries what was being done and to what.
    #[error("{op} {target}: {source}")]
    Operation {
        /// Operation name.
        op: &'static str,
        /// Bucket chain and key the operation targeted.
        target: String,
        /// Underlying failure.
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a bucket-not-found error.
    pub fn bucket_not_found(name: impl Into<String>) -> Self {
        Self::BucketNotFound { name: name.into() }
    }

    /// Creates an incompatible-value error, rendering a byte key lossily.
    pub fn incompatible_value(key: &[u8]) -> Self {
        Self::IncompatibleValue {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    /// Wraps this error with the operation and target it belongs to.
    #[must_use]
    pub fn context(self, op: &'static str, target: impl Into<String>) -> Self {
        Self::Operation {
            op,
            target: target.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error below any operation or batch wrapping.
    #[must_use]
    pub fn root_cause(&self) -> &CoreError {
        match self {
            Self::Operation { source, .. } => source.root_cause(),
            Self::Batch { source } => source.root_cause(),
            other => other,
        }
    }

    /// Returns `true` if this error means the store file is damaged.
    ///
    /// Opening a writable store recreates the file when this holds.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Corruption { .. } | Self::ChecksumMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_root_cause() {
        let err = CoreError::KeyRequired
            .context("put", "vulnerability")
            .context("batch", "npm");
        assert!(matches!(err.root_cause(), CoreError::KeyRequired));
        assert_eq!(
            err.to_string(),
            "batch npm: put vulnerability: key required"
        );
    }

    #[test]
    fn corruption_is_classified_through_wrappers() {
        assert!(CoreError::corruption("bad magic").is_corruption());
        assert!(CoreError::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .context("replay", "advisory.db")
        .is_corruption());
        assert!(!CoreError::ReadOnly.is_corruption());
    }

    #[test]
    fn batch_error_is_shared() {
        let shared = Arc::new(CoreError::DatabaseClosed);
        let a = CoreError::Batch {
            source: Arc::clone(&shared),
        };
        let b = CoreError::Batch { source: shared };
        assert!(matches!(a.root_cause(), CoreError::DatabaseClosed));
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn errors_cross_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CoreError>();
    }
}
