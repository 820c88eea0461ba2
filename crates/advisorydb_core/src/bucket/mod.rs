//! The in-memory bucket tree.
//!
//! A [`Bucket`] holds sub-buckets and key/value entries. Sub-buckets sit
//! behind `Arc`, so cloning a tree is cheap and a write transaction copies
//! only the nodes along the paths it touches. Readers keep the `Arc` of the
//! committed root they started with and never see later writes.

mod path;

pub use path::{BucketPath, RootSelector, ScanSpec, ROOT_PREFIX_DELIMITER};

use crate::error::{CoreError, CoreResult};
use crate::log::Op;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A node of the bucket tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    buckets: BTreeMap<Bytes, Arc<Bucket>>,
    entries: BTreeMap<Bytes, Bytes>,
}

/// Totals below a bucket, the bucket itself excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketCounts {
    /// Nested buckets at any depth.
    pub buckets: u64,
    /// Key/value entries at any depth.
    pub entries: u64,
}

impl Bucket {
    /// Creates an empty bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.entries.get(key)
    }

    /// Returns the sub-bucket `name`.
    #[must_use]
    pub fn bucket(&self, name: &[u8]) -> Option<&Bucket> {
        self.buckets.get(name).map(Arc::as_ref)
    }

    /// Key/value entries in key order. Sub-buckets are not included.
    pub fn entries(&self) -> impl Iterator<Item = (&Bytes, &Bytes)> + '_ {
        self.entries.iter()
    }

    /// Sub-buckets in name order.
    pub fn buckets(&self) -> impl Iterator<Item = (&Bytes, &Bucket)> + '_ {
        self.buckets.iter().map(|(name, b)| (name, b.as_ref()))
    }

    /// Number of entries directly in this bucket.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the bucket holds neither entries nor sub-buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.buckets.is_empty()
    }

    /// Follows `path` down from this bucket. An empty path is `self`.
    #[must_use]
    pub fn lookup(&self, path: &[Bytes]) -> Option<&Bucket> {
        path.iter()
            .try_fold(self, |bucket, name| bucket.bucket(name))
    }

    /// Follows `path` for writing, creating every missing bucket.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNameRequired`] for an empty name and
    /// [`CoreError::IncompatibleValue`] where a name is already a key.
    pub fn create_path(&mut self, path: &[Bytes]) -> CoreResult<&mut Bucket> {
        let mut bucket = self;
        for name in path {
            bucket = bucket.create_bucket(name.clone())?;
        }
        Ok(bucket)
    }

    /// Follows `path` for writing without creating anything.
    pub fn bucket_mut_path(&mut self, path: &[Bytes]) -> Option<&mut Bucket> {
        let mut bucket = self;
        for name in path {
            bucket = Arc::make_mut(bucket.buckets.get_mut(name)?);
        }
        Some(bucket)
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyRequired`] for an empty key and
    /// [`CoreError::IncompatibleValue`] if `key` names a sub-bucket.
    pub fn put(&mut self, key: Bytes, value: Bytes) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::KeyRequired);
        }
        if self.buckets.contains_key(&key) {
            return Err(CoreError::incompatible_value(&key));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Removes `key`. Returns `false` if it was not present.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompatibleValue`] if `key` names a sub-bucket.
    pub fn delete(&mut self, key: &[u8]) -> CoreResult<bool> {
        if self.buckets.contains_key(key) {
            return Err(CoreError::incompatible_value(key));
        }
        Ok(self.entries.remove(key).is_some())
    }

    /// Returns the sub-bucket `name`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNameRequired`] for an empty name and
    /// [`CoreError::IncompatibleValue`] if `name` is already a key.
    pub fn create_bucket(&mut self, name: Bytes) -> CoreResult<&mut Bucket> {
        if name.is_empty() {
            return Err(CoreError::BucketNameRequired);
        }
        if self.entries.contains_key(&name) {
            return Err(CoreError::incompatible_value(&name));
        }
        Ok(Arc::make_mut(self.buckets.entry(name).or_default()))
    }

    /// Removes the sub-bucket `name` with everything below it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompatibleValue`] if `name` is a key and
    /// [`CoreError::BucketNotFound`] if there is no such bucket.
    pub fn remove_bucket(&mut self, name: &[u8]) -> CoreResult<()> {
        if self.entries.contains_key(name) {
            return Err(CoreError::incompatible_value(name));
        }
        match self.buckets.remove(name) {
            Some(_) => Ok(()),
            None => Err(CoreError::bucket_not_found(
                String::from_utf8_lossy(name).into_owned(),
            )),
        }
    }

    /// Applies one logged op to this tree, treated as the root.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the op does not fit the tree: the log
    /// only ever holds ops that succeeded when they were written.
    pub fn apply(&mut self, op: &Op) -> CoreResult<()> {
        let result = match op {
            Op::CreateBucket { path } => self.create_path(path).map(|_| ()),
            Op::Put { path, key, value } => self
                .create_path(path)
                .and_then(|bucket| bucket.put(key.clone(), value.clone())),
            Op::Delete { path, key } => match self.bucket_mut_path(path) {
                Some(bucket) => bucket.delete(key).map(|_| ()),
                None => Err(CoreError::bucket_not_found(display_path(path))),
            },
            Op::DeleteBucket { path } => match path.split_last() {
                Some((name, parent)) => match self.bucket_mut_path(parent) {
                    Some(bucket) => bucket.remove_bucket(name),
                    None => Err(CoreError::bucket_not_found(display_path(parent))),
                },
                None => Err(CoreError::EmptyBucketPath),
            },
        };
        result.map_err(|e| {
            CoreError::corruption(format!(
                "logged op on {} does not apply: {e}",
                display_path(op.path())
            ))
        })
    }

    /// Ops that rebuild this tree from empty, parents before children.
    #[must_use]
    pub fn snapshot_ops(&self) -> Vec<Op> {
        let mut ops = Vec::new();
        let mut path = Vec::new();
        self.collect_ops(&mut path, &mut ops);
        ops
    }

    fn collect_ops(&self, path: &mut Vec<Bytes>, ops: &mut Vec<Op>) {
        if !path.is_empty() {
            ops.push(Op::CreateBucket { path: path.clone() });
            for (key, value) in &self.entries {
                ops.push(Op::Put {
                    path: path.clone(),
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        for (name, child) in &self.buckets {
            path.push(name.clone());
            child.collect_ops(path, ops);
            path.pop();
        }
    }

    /// Counts buckets and entries below this bucket.
    #[must_use]
    pub fn counts(&self) -> BucketCounts {
        let mut counts = BucketCounts {
            buckets: self.buckets.len() as u64,
            entries: self.entries.len() as u64,
        };
        for child in self.buckets.values() {
            let below = child.counts();
            counts.buckets += below.buckets;
            counts.entries += below.entries;
        }
        counts
    }
}

pub(crate) fn display_path(path: &[Bytes]) -> String {
    path.iter()
        .map(|name| String::from_utf8_lossy(name))
        .collect::<Vec<_>>()
        .join("/")
}
