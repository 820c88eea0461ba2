//! Read-only snapshot access.

use crate::bucket::{Bucket, BucketPath, RootSelector};
use crate::types::SequenceNumber;
use bytes::Bytes;
use std::sync::Arc;

/// Read access shared by [`ReadTx`] and [`crate::WriteTx`].
///
/// Missing buckets and keys read as `None` or an empty list, never as
/// errors.
pub trait BucketView {
    /// The root of the tree this view reads.
    fn tree(&self) -> &Bucket;

    /// Returns the root bucket `name`.
    fn root_bucket(&self, name: &str) -> Option<&Bucket> {
        self.tree().bucket(name.as_bytes())
    }

    /// Resolves `path` to its innermost bucket.
    fn bucket(&self, path: &BucketPath) -> Option<&Bucket> {
        path.segments()
            .iter()
            .try_fold(self.tree(), |bucket, name| bucket.bucket(name.as_bytes()))
    }

    /// Returns the value under `key` in the bucket at `path`.
    fn get(&self, path: &BucketPath, key: &[u8]) -> Option<&Bytes> {
        self.bucket(path)?.get(key)
    }

    /// Names of all root buckets, in byte order.
    fn root_names(&self) -> Vec<String> {
        self.tree()
            .buckets()
            .map(|(name, _)| String::from_utf8_lossy(name).into_owned())
            .collect()
    }

    /// Root bucket names starting with `prefix`.
    fn roots_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.tree()
            .buckets()
            .filter(|(name, _)| name.starts_with(prefix.as_bytes()))
            .map(|(name, _)| String::from_utf8_lossy(name).into_owned())
            .collect()
    }

    /// Root bucket names picked by `selector` that exist.
    fn resolve_roots(&self, selector: &RootSelector) -> Vec<String> {
        match selector {
            RootSelector::Literal(name) => self
                .root_bucket(name)
                .map(|_| vec![name.clone()])
                .unwrap_or_default(),
            RootSelector::Prefix(prefix) => self.roots_with_prefix(prefix),
        }
    }
}

/// A consistent view of the store as of one commit.
///
/// Holding a `ReadTx` never blocks writers.
#[derive(Debug, Clone)]
pub struct ReadTx {
    root: Arc<Bucket>,
    sequence: SequenceNumber,
}

impl ReadTx {
    pub(crate) fn new(root: Arc<Bucket>, sequence: SequenceNumber) -> Self {
        Self { root, sequence }
    }

    /// Sequence number of the commit this view reflects.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }
}

impl BucketView for ReadTx {
    fn tree(&self) -> &Bucket {
        &self.root
    }
}
