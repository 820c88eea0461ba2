//! Model-checked store harness.
//!
//! [`ModelHarness`] applies writes to a store and to a plain map side by
//! side, then checks that every read agrees with the map.

use crate::generators::BucketOperation;
use advisorydb_core::{BucketPath, CoreError, CoreResult, ScanSpec, Store, WriteTx};
use std::collections::{BTreeMap, HashMap};

/// Expected contents, keyed by bucket path then key.
type Model = BTreeMap<BucketPath, BTreeMap<String, Vec<u8>>>;

/// A test harness that mirrors the store in memory.
pub struct ModelHarness {
    /// The store under test.
    pub store: Store,
    model: Model,
}

impl ModelHarness {
    /// Creates a harness over a new in-memory store.
    pub fn new() -> Self {
        Self::with_store(Store::open_in_memory().expect("Failed to open store"))
    }

    /// Creates a harness over `store`, which must be empty.
    pub fn with_store(store: Store) -> Self {
        Self {
            store,
            model: Model::new(),
        }
    }

    /// Applies `ops` in one transaction, to the store and the model.
    ///
    /// # Errors
    ///
    /// Returns the store's error; the model is left untouched then.
    pub fn apply(&mut self, ops: &[BucketOperation]) -> CoreResult<()> {
        self.store.update(|tx| apply_ops(tx, ops))?;
        for op in ops {
            match op {
                BucketOperation::Put { path, key, value } => {
                    self.model
                        .entry(path.clone())
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                BucketOperation::Delete { path, key } => {
                    if let Some(bucket) = self.model.get_mut(path) {
                        bucket.remove(key);
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies `ops` and then fails the transaction; neither side changes.
    ///
    /// # Panics
    ///
    /// Panics if the transaction does not report the injected failure.
    pub fn apply_and_abort(&mut self, ops: &[BucketOperation]) {
        let result = self.store.update(|tx| {
            apply_ops(tx, ops)?;
            Err::<(), _>(CoreError::Panicked {
                message: "aborted by harness".into(),
            })
        });
        assert!(matches!(result, Err(CoreError::Panicked { .. })));
    }

    /// Verifies every tracked key with a point read.
    pub fn verify_all(&self) {
        for (path, entries) in &self.model {
            for (key, expected) in entries {
                let actual = self.store.get(path, key).expect("Failed to read");
                assert_eq!(actual.as_ref(), Some(expected), "mismatch at {path}/{key}");
            }
        }
    }

    /// Verifies a bulk scan of `root/nested...` against the model.
    pub fn verify_scan(&self, root: &str, nested: &[&str]) {
        let spec = ScanSpec::new(root, nested.iter().copied()).expect("Invalid scan");
        let values = self.store.for_each(&spec).expect("Failed to scan");

        let path = BucketPath::new(std::iter::once(root).chain(nested.iter().copied()))
            .expect("Invalid path");
        let expected: HashMap<&String, &Vec<u8>> = self
            .model
            .get(&path)
            .map(|entries| entries.iter().collect())
            .unwrap_or_default();
        let actual: HashMap<&String, &Vec<u8>> =
            values.iter().map(|(key, value)| (key, &value.content)).collect();
        assert_eq!(actual, expected, "scan mismatch at {path}");
    }

    /// Returns the count of tracked keys.
    pub fn tracked_count(&self) -> usize {
        self.model.values().map(BTreeMap::len).sum()
    }
}

impl Default for ModelHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_ops(tx: &mut WriteTx, ops: &[BucketOperation]) -> CoreResult<()> {
    for op in ops {
        match op {
            BucketOperation::Put { path, key, value } => {
                tx.put_bytes(path, key, value.clone())?;
            }
            BucketOperation::Delete { path, key } => {
                tx.delete(path, key)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(path: &[&str], key: &str, value: &[u8]) -> BucketOperation {
        BucketOperation::Put {
            path: BucketPath::new(path.iter().copied()).unwrap(),
            key: key.into(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_harness_tracks_writes() {
        let mut harness = ModelHarness::new();
        harness
            .apply(&[put(&["a"], "k1", b"one"), put(&["a", "B"], "k2", b"two")])
            .unwrap();
        harness
            .apply(&[BucketOperation::Delete {
                path: BucketPath::root("a").unwrap(),
                key: "k1".into(),
            }])
            .unwrap();

        assert_eq!(harness.tracked_count(), 1);
        harness.verify_all();
        harness.verify_scan("a", &["B"]);
    }

    #[test]
    fn test_abort_changes_nothing() {
        let mut harness = ModelHarness::new();
        harness.apply(&[put(&["a"], "k", b"v")]).unwrap();
        harness.apply_and_abort(&[put(&["a"], "k", b"changed"), put(&["c"], "k", b"new")]);
        harness.verify_all();
        assert!(harness.store.get(&BucketPath::root("c").unwrap(), "k").unwrap().is_none());
    }
}
