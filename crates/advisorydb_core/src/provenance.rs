//! Provenance registry: which data source filled each root bucket.
//!
//! One [`DataSource`] record per root bucket, stored in the `data-source`
//! root under the owning bucket's name. Bulk scans read it back so every
//! returned record can say where it came from.

use crate::bucket::BucketPath;
use crate::error::CoreResult;
use crate::transaction::{BucketView, WriteTx};
use advisorydb_codec::from_cbor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root bucket holding the provenance records.
pub const DATA_SOURCE_BUCKET: &str = "data-source";

/// Short identifier of a data source, such as `nvd` or `ghsa`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Creates a source ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the ID is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Where the records of a root bucket came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSource {
    /// Source identifier.
    #[serde(rename = "ID", skip_serializing_if = "SourceId::is_empty")]
    pub id: SourceId,
    /// Human-readable source name.
    #[serde(rename = "Name", skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Where the source publishes its data.
    #[serde(rename = "URL", skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl DataSource {
    /// Creates a data source record.
    pub fn new(id: impl Into<SourceId>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
        }
    }

    /// Returns `true` if every field is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.name.is_empty() && self.url.is_empty()
    }
}

impl WriteTx {
    /// Records `source` as the provenance of the root bucket `root`.
    ///
    /// A later call for the same root replaces the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or stored.
    pub fn put_data_source(&mut self, root: &str, source: &DataSource) -> CoreResult<()> {
        let path = BucketPath::root(DATA_SOURCE_BUCKET)?;
        self.put(&path, root, source)
    }
}

/// Reads the provenance record of the root bucket `root`.
///
/// Returns `Ok(None)` when none was recorded.
///
/// # Errors
///
/// Returns an error if the stored record does not decode.
pub fn lookup<T: BucketView + ?Sized>(tx: &T, root: &str) -> CoreResult<Option<DataSource>> {
    let Some(bucket) = tx.root_bucket(DATA_SOURCE_BUCKET) else {
        return Ok(None);
    };
    match bucket.get(root.as_bytes()) {
        Some(bytes) => {
            let source = from_cbor(bytes).map_err(|e| {
                crate::error::CoreError::from(e).context("lookup data source", root)
            })?;
            Ok(Some(source))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::Bucket;
    use crate::error::CoreError;
    use crate::types::TransactionId;
    use bytes::Bytes;

    fn ghsa() -> DataSource {
        DataSource::new(
            "ghsa",
            "GitHub Security Advisory pip",
            "https://github.com/advisories?query=type%3Areviewed+ecosystem%3Apip",
        )
    }

    #[test]
    fn put_then_lookup() {
        let mut tx = WriteTx::new(TransactionId::new(1), Bucket::new());
        tx.put_data_source("pip::GitHub Security Advisory pip", &ghsa())
            .unwrap();

        assert_eq!(
            lookup(&tx, "pip::GitHub Security Advisory pip").unwrap(),
            Some(ghsa())
        );
        assert_eq!(lookup(&tx, "npm::GitHub Security Advisory npm").unwrap(), None);
    }

    #[test]
    fn missing_registry_is_none() {
        let tx = WriteTx::new(TransactionId::new(1), Bucket::new());
        assert_eq!(lookup(&tx, "anything").unwrap(), None);
    }

    #[test]
    fn undecodable_record_is_error() {
        let mut tx = WriteTx::new(TransactionId::new(1), Bucket::new());
        tx.put_bytes(
            &BucketPath::root(DATA_SOURCE_BUCKET).unwrap(),
            "broken",
            Bytes::from_static(&[0xff, 0x00]),
        )
        .unwrap();
        let err = lookup(&tx, "broken").unwrap_err();
        assert!(matches!(err.root_cause(), CoreError::Codec(_)));
    }

    #[test]
    fn empty_fields_are_omitted() {
        let source = DataSource {
            name: "NVD".into(),
            ..DataSource::default()
        };
        let bytes = advisorydb_codec::to_canonical_cbor(&source).unwrap();
        // {"Name": "NVD"}
        assert_eq!(bytes, [0xa1, 0x64, b'N', b'a', b'm', b'e', 0x63, b'N', b'V', b'D']);
        assert!(!source.is_empty());
        assert!(DataSource::default().is_empty());
    }
}
