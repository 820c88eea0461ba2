//! Write transactions.

use crate::bucket::{display_path, Bucket, BucketPath};
use crate::error::{CoreError, CoreResult};
use crate::log::Op;
use crate::transaction::BucketView;
use crate::types::TransactionId;
use advisorydb_codec::Encode;
use bytes::Bytes;

/// A write transaction: a private working copy of the tree plus the ops
/// that produced it.
///
/// Reads inside the transaction see its own writes. Nothing is visible to
/// other readers until [`crate::Store::update`] commits it; returning an
/// error from the update closure throws the working copy away.
#[derive(Debug)]
pub struct WriteTx {
    txid: TransactionId,
    root: Bucket,
    ops: Vec<Op>,
}

impl WriteTx {
    pub(crate) fn new(txid: TransactionId, root: Bucket) -> Self {
        Self {
            txid,
            root,
            ops: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.txid
    }

    /// Creates every missing bucket along `path`.
    ///
    /// Creating a bucket that already exists is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompatibleValue`] if a name on the path is
    /// already a key.
    pub fn create_bucket_if_not_exists(&mut self, path: &BucketPath) -> CoreResult<()> {
        if self.bucket(path).is_some() {
            return Ok(());
        }
        let keys = path.to_keys();
        self.check_path(&keys)
            .map_err(|e| e.context("create bucket", path.to_string()))?;
        self.root.create_path(&keys)?;
        self.ops.push(Op::CreateBucket { path: keys });
        Ok(())
    }

    /// Encodes `value` and stores it under `key` in the bucket at `path`,
    /// creating the buckets as needed. Overwrites silently.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be encoded, `key` is empty or not
    /// UTF-8, or the path or key clashes with an existing entry of the other
    /// kind.
    pub fn put<T>(&mut self, path: &BucketPath, key: impl AsRef<[u8]>, value: &T) -> CoreResult<()>
    where
        T: Encode + ?Sized,
    {
        let key = key.as_ref();
        let encoded = value
            .encode()
            .map_err(|e| CoreError::from(e).context("put", target(path, key)))?;
        self.put_bytes(path, key, encoded)
    }

    /// Stores already-encoded bytes under `key` in the bucket at `path`.
    ///
    /// # Errors
    ///
    /// As [`WriteTx::put`], minus encoding.
    pub fn put_bytes(
        &mut self,
        path: &BucketPath,
        key: impl AsRef<[u8]>,
        value: impl Into<Bytes>,
    ) -> CoreResult<()> {
        let key = key.as_ref();
        let keys = path.to_keys();
        self.check_put(&keys, key)
            .map_err(|e| e.context("put", target(path, key)))?;

        let key = Bytes::copy_from_slice(key);
        let value = value.into();
        self.root
            .create_path(&keys)?
            .put(key.clone(), value.clone())?;
        self.ops.push(Op::Put {
            path: keys,
            key,
            value,
        });
        Ok(())
    }

    /// Removes `key` from the bucket at `path`.
    ///
    /// Returns `false` if the bucket or the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompatibleValue`] if `key` names a bucket.
    pub fn delete(&mut self, path: &BucketPath, key: impl AsRef<[u8]>) -> CoreResult<bool> {
        let key = key.as_ref();
        let keys = path.to_keys();
        if self.root.lookup(&keys).is_none() {
            return Ok(false);
        }
        let Some(bucket) = self.root.bucket_mut_path(&keys) else {
            return Ok(false);
        };
        let removed = bucket
            .delete(key)
            .map_err(|e| e.context("delete", target(path, key)))?;
        if removed {
            self.ops.push(Op::Delete {
                path: keys,
                key: Bytes::copy_from_slice(key),
            });
        }
        Ok(removed)
    }

    /// Removes the bucket at `path` with everything below it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNotFound`] if it does not exist.
    pub fn delete_bucket(&mut self, path: &BucketPath) -> CoreResult<()> {
        let keys = path.to_keys();
        let Some((name, parent)) = keys.split_last() else {
            return Err(CoreError::EmptyBucketPath);
        };
        if self.root.lookup(&keys).is_none() {
            return Err(CoreError::bucket_not_found(path.to_string())
                .context("delete bucket", path.to_string()));
        }
        self.root
            .bucket_mut_path(parent)
            .ok_or_else(|| CoreError::bucket_not_found(display_path(parent)))?
            .remove_bucket(name)
            .map_err(|e| e.context("delete bucket", path.to_string()))?;
        self.ops.push(Op::DeleteBucket { path: keys });
        Ok(())
    }

    /// Returns `true` if the transaction has written anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.ops.is_empty()
    }

    /// Number of ops recorded so far.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn into_parts(self) -> (Bucket, Vec<Op>) {
        (self.root, self.ops)
    }

    /// Checks that creating `path` cannot hit a key of the same name, so a
    /// failed write never leaves half a path behind.
    fn check_path(&self, path: &[Bytes]) -> CoreResult<()> {
        let mut bucket = Some(&self.root);
        for name in path {
            let Some(current) = bucket else { break };
            if current.get(name).is_some() {
                return Err(CoreError::incompatible_value(name));
            }
            bucket = current.bucket(name);
        }
        Ok(())
    }

    fn check_put(&self, path: &[Bytes], key: &[u8]) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::KeyRequired);
        }
        // Scans hand keys back as strings.
        if std::str::from_utf8(key).is_err() {
            return Err(CoreError::KeyNotUtf8 {
                key: String::from_utf8_lossy(key).into_owned(),
            });
        }
        self.check_path(path)?;
        match self.root.lookup(path) {
            Some(bucket) if bucket.bucket(key).is_some() => Err(CoreError::incompatible_value(key)),
            _ => Ok(()),
        }
    }
}

impl BucketView for WriteTx {
    fn tree(&self) -> &Bucket {
        &self.root
    }
}

fn target(path: &BucketPath, key: &[u8]) -> String {
    format!("{path}/{}", String::from_utf8_lossy(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Fix {
        fixed_version: String,
    }

    fn tx() -> WriteTx {
        WriteTx::new(TransactionId::new(1), Bucket::new())
    }

    fn path(segments: &[&str]) -> BucketPath {
        BucketPath::new(segments.iter().copied()).unwrap()
    }

    #[test]
    fn put_creates_buckets_and_reads_back() {
        let mut tx = tx();
        let p = path(&["alpine 3.10", "openssl"]);
        let fix = Fix {
            fixed_version: "1.1.1d-r0".into(),
        };
        tx.put(&p, "CVE-2019-1547", &fix).unwrap();

        let bytes = tx.get(&p, b"CVE-2019-1547").unwrap();
        let decoded: Fix = advisorydb_codec::from_cbor(bytes).unwrap();
        assert_eq!(decoded, fix);
        assert_eq!(tx.op_count(), 1);
    }

    #[test]
    fn create_twice_records_once() {
        let mut tx = tx();
        let p = path(&["vulnerability-id", "CVE-2020-1"]);
        tx.create_bucket_if_not_exists(&p).unwrap();
        tx.create_bucket_if_not_exists(&p).unwrap();
        assert_eq!(tx.op_count(), 1);
        assert!(tx.bucket(&p).is_some());
    }

    #[test]
    fn failed_put_leaves_no_trace() {
        let mut tx = tx();
        tx.put_bytes(&path(&["a"]), "b", Bytes::from_static(b"v"))
            .unwrap();
        let before = tx.op_count();

        let err = tx
            .put_bytes(&path(&["a", "b", "c"]), "k", Bytes::from_static(b"v"))
            .unwrap_err();
        assert!(matches!(err.root_cause(), CoreError::IncompatibleValue { .. }));
        assert!(tx.bucket(&path(&["a", "b"])).is_none());
        assert_eq!(tx.op_count(), before);

        let err = tx.put_bytes(&path(&["a"]), "", Bytes::new()).unwrap_err();
        assert!(matches!(err.root_cause(), CoreError::KeyRequired));
    }

    #[test]
    fn non_utf8_keys_are_rejected() {
        let mut tx = tx();
        for key in [&[0xFF, b'a'][..], &[0xFE, b'a'][..]] {
            let err = tx
                .put_bytes(&path(&["alpine 3.10"]), key, Bytes::from_static(b"v"))
                .unwrap_err();
            assert!(matches!(err.root_cause(), CoreError::KeyNotUtf8 { .. }));
        }
        assert_eq!(tx.op_count(), 0);
        assert!(tx.bucket(&path(&["alpine 3.10"])).is_none());

        tx.put_bytes(&path(&["alpine 3.10"]), "CVE-2019-1547 ✓", Bytes::new())
            .unwrap();
        assert_eq!(tx.op_count(), 1);
    }

    #[test]
    fn error_carries_target() {
        let mut tx = tx();
        tx.create_bucket_if_not_exists(&path(&["a", "sub"])).unwrap();
        let err = tx.put_bytes(&path(&["a"]), "sub", Bytes::new()).unwrap_err();
        assert_eq!(err.to_string(), "put a/sub: incompatible value at key sub");
    }

    #[test]
    fn delete_missing_is_false() {
        let mut tx = tx();
        assert!(!tx.delete(&path(&["nope"]), "k").unwrap());

        tx.put_bytes(&path(&["a"]), "k", Bytes::from_static(b"v"))
            .unwrap();
        assert!(!tx.delete(&path(&["a"]), "other").unwrap());
        assert!(tx.delete(&path(&["a"]), "k").unwrap());
        assert!(tx.get(&path(&["a"]), b"k").is_none());
        assert_eq!(tx.op_count(), 2);
    }

    #[test]
    fn delete_bucket_requires_existence() {
        let mut tx = tx();
        let err = tx.delete_bucket(&path(&["advisory-detail"])).unwrap_err();
        assert!(matches!(err.root_cause(), CoreError::BucketNotFound { .. }));

        tx.create_bucket_if_not_exists(&path(&["advisory-detail", "CVE-1"]))
            .unwrap();
        tx.delete_bucket(&path(&["advisory-detail"])).unwrap();
        assert!(tx.root_bucket("advisory-detail").is_none());
        assert!(tx.has_changes());
    }
}
