//! Vulnerability records on top of the bucket store.
//!
//! Layout of the root buckets:
//!
//! ```text
//! vulnerability          / <vuln id>                          = Vulnerability
//! vulnerability-detail   / <vuln id> / <source id>            = VulnerabilityDetail
//! vulnerability-id       / <vuln id>                          = {}
//! advisory-detail        / <vuln id> / <nested...> / <pkg>    = advisory
//! <nested...>            / <pkg>     / <vuln id>              = advisory
//! data-source            / <root bucket>                      = DataSource
//! Red Hat Repository     / <repository>                       = [cpe index]
//! Red Hat NVR            / <nvr>                              = [cpe index]
//! Red Hat CPE            / <cpe index>                        = cpe
//! ```
//!
//! Ingestion writes advisories into `advisory-detail` keyed by
//! vulnerability first. [`AdvisoryWriter::save_advisory_details`] then
//! copies them to the per-source buckets keyed by package, which is what
//! lookups read.

mod types;

pub use types::{Advisory, Cvss, Severity, Status, Vulnerability, VulnerabilityDetail};

use crate::bucket::{Bucket, BucketPath, ScanSpec};
use crate::error::{CoreError, CoreResult};
use crate::provenance::SourceId;
use crate::store::{ScanValue, Store};
use crate::transaction::{BucketView, WriteTx};
use advisorydb_codec::{from_cbor, Decode, Encode};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Merged vulnerability records.
pub const VULNERABILITY_BUCKET: &str = "vulnerability";
/// Per-source vulnerability details.
pub const VULNERABILITY_DETAIL_BUCKET: &str = "vulnerability-detail";
/// Index of every known vulnerability ID.
pub const VULNERABILITY_ID_BUCKET: &str = "vulnerability-id";
/// Advisories keyed by vulnerability, before they are saved per package.
pub const ADVISORY_DETAIL_BUCKET: &str = "advisory-detail";
/// Red Hat content set to CPE indices.
pub const RED_HAT_REPOSITORY_BUCKET: &str = "Red Hat Repository";
/// Red Hat build NVR to CPE indices.
pub const RED_HAT_NVR_BUCKET: &str = "Red Hat NVR";
/// Red Hat CPE index to CPE.
pub const RED_HAT_CPE_BUCKET: &str = "Red Hat CPE";

/// Writes vulnerability records inside a write transaction.
pub trait AdvisoryWriter {
    /// Stores `advisory` at `advisory-detail/<vuln_id>/<nested...>/<pkg_name>`.
    ///
    /// `nested` is usually `[<source root>]` or `[<source root>, <platform>]`.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is empty, the path clashes with a key, or
    /// the advisory cannot be encoded.
    fn put_advisory_detail<T: Encode + ?Sized>(
        &mut self,
        vuln_id: &str,
        pkg_name: &str,
        nested: &[&str],
        advisory: &T,
    ) -> CoreResult<()>;

    /// Stores what `source` says about `vuln_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is empty or the detail cannot be encoded.
    fn put_vulnerability_detail(
        &mut self,
        vuln_id: &str,
        source: &SourceId,
        detail: &VulnerabilityDetail,
    ) -> CoreResult<()>;

    /// Adds `vuln_id` to the vulnerability ID index.
    ///
    /// # Errors
    ///
    /// Returns an error if `vuln_id` is empty.
    fn put_vulnerability_id(&mut self, vuln_id: &str) -> CoreResult<()>;

    /// Stores the merged record of `vuln_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if `vuln_id` is empty or the record cannot be encoded.
    fn put_vulnerability(&mut self, vuln_id: &str, vulnerability: &Vulnerability)
        -> CoreResult<()>;

    /// Copies every advisory of `vuln_id` out of `advisory-detail` to
    /// `<nested...>/<pkg_name>/<vuln_id>`.
    ///
    /// Unknown IDs are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored advisory is not a map, or a target path
    /// clashes with an existing key.
    fn save_advisory_details(&mut self, vuln_id: &str) -> CoreResult<()>;

    /// Maps a Red Hat content set to CPE indices.
    ///
    /// # Errors
    ///
    /// Returns an error if `repository` is empty.
    fn put_red_hat_repositories(&mut self, repository: &str, cpe_indices: &[u32])
        -> CoreResult<()>;

    /// Maps a Red Hat build NVR to CPE indices.
    ///
    /// # Errors
    ///
    /// Returns an error if `nvr` is empty.
    fn put_red_hat_nvrs(&mut self, nvr: &str, cpe_indices: &[u32]) -> CoreResult<()>;

    /// Stores the CPE behind `cpe_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be stored.
    fn put_red_hat_cpe(&mut self, cpe_index: u32, cpe: &str) -> CoreResult<()>;
}

impl AdvisoryWriter for WriteTx {
    fn put_advisory_detail<T: Encode + ?Sized>(
        &mut self,
        vuln_id: &str,
        pkg_name: &str,
        nested: &[&str],
        advisory: &T,
    ) -> CoreResult<()> {
        let path =
            BucketPath::new([ADVISORY_DETAIL_BUCKET, vuln_id])?.join(nested.iter().copied())?;
        self.put(&path, pkg_name, advisory)
    }

    fn put_vulnerability_detail(
        &mut self,
        vuln_id: &str,
        source: &SourceId,
        detail: &VulnerabilityDetail,
    ) -> CoreResult<()> {
        let path = BucketPath::new([VULNERABILITY_DETAIL_BUCKET, vuln_id])?;
        self.put(&path, source.as_str(), detail)
    }

    fn put_vulnerability_id(&mut self, vuln_id: &str) -> CoreResult<()> {
        let path = BucketPath::root(VULNERABILITY_ID_BUCKET)?;
        self.put(&path, vuln_id, &BTreeMap::<String, String>::new())
    }

    fn put_vulnerability(
        &mut self,
        vuln_id: &str,
        vulnerability: &Vulnerability,
    ) -> CoreResult<()> {
        let path = BucketPath::root(VULNERABILITY_BUCKET)?;
        self.put(&path, vuln_id, vulnerability)
    }

    fn save_advisory_details(&mut self, vuln_id: &str) -> CoreResult<()> {
        let root = BucketPath::new([ADVISORY_DETAIL_BUCKET, vuln_id])?;
        let mut found = Vec::new();
        if let Some(bucket) = self.bucket(&root) {
            collect_entries(bucket, &mut Vec::new(), &mut found);
        }

        for (chain, value) in found {
            let target = BucketPath::new(chain)?;
            from_cbor::<HashMap<String, ciborium::Value>>(&value).map_err(|e| {
                CoreError::from(e).context("save advisory details", format!("{target}/{vuln_id}"))
            })?;
            self.put_bytes(&target, vuln_id, value)?;
        }
        Ok(())
    }

    fn put_red_hat_repositories(
        &mut self,
        repository: &str,
        cpe_indices: &[u32],
    ) -> CoreResult<()> {
        let path = BucketPath::root(RED_HAT_REPOSITORY_BUCKET)?;
        self.put(&path, repository, cpe_indices)
    }

    fn put_red_hat_nvrs(&mut self, nvr: &str, cpe_indices: &[u32]) -> CoreResult<()> {
        let path = BucketPath::root(RED_HAT_NVR_BUCKET)?;
        self.put(&path, nvr, cpe_indices)
    }

    fn put_red_hat_cpe(&mut self, cpe_index: u32, cpe: &str) -> CoreResult<()> {
        let path = BucketPath::root(RED_HAT_CPE_BUCKET)?;
        self.put(&path, cpe_index.to_string(), cpe)
    }
}

/// Walks `bucket` depth-first, turning each entry into
/// `(<nested...>/<key>, value)`.
///
/// Bucket names come from string paths and puts reject non-UTF-8 keys, so
/// the lossy conversions below never alter a name.
fn collect_entries(
    bucket: &Bucket,
    chain: &mut Vec<String>,
    out: &mut Vec<(Vec<String>, Bytes)>,
) {
    for (name, child) in bucket.buckets() {
        chain.push(String::from_utf8_lossy(name).into_owned());
        collect_entries(child, chain, out);
        chain.pop();
    }
    for (key, value) in bucket.entries() {
        let mut target = chain.clone();
        target.push(String::from_utf8_lossy(key).into_owned());
        out.push((target, value.clone()));
    }
}

/// Reads vulnerability records from a store.
pub trait AdvisoryReader {
    /// Returns the advisories of `pkg_name` from the source root `source`,
    /// sorted by vulnerability ID.
    ///
    /// A `source` containing `::` reads every root with that prefix.
    /// Each advisory carries its vulnerability ID and, when recorded, the
    /// provenance of its root.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored advisory does not decode.
    fn get_advisories(&self, source: &str, pkg_name: &str) -> CoreResult<Vec<Advisory>>;

    /// Raw advisories of `pkg_name` under the bucket chain `sources`, keyed
    /// by vulnerability ID.
    ///
    /// # Errors
    ///
    /// Returns an error if `sources` is empty or holds an empty name.
    fn for_each_advisory(
        &self,
        sources: &[&str],
        pkg_name: &str,
    ) -> CoreResult<HashMap<String, ScanValue>>;

    /// Every source's detail on `vuln_id`. Empty when there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored detail does not decode.
    fn get_vulnerability_detail(
        &self,
        vuln_id: &str,
    ) -> CoreResult<HashMap<SourceId, VulnerabilityDetail>>;

    /// The merged record of `vuln_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored record does not decode.
    fn get_vulnerability(&self, vuln_id: &str) -> CoreResult<Option<Vulnerability>>;

    /// Calls `f` for every indexed vulnerability ID, all inside one write
    /// transaction so `f` can write derived records.
    ///
    /// # Errors
    ///
    /// Returns the first error of `f`; nothing written is kept.
    fn for_each_vulnerability_id<F>(&self, f: F) -> CoreResult<()>
    where
        F: FnMut(&mut WriteTx, &str) -> CoreResult<()>;

    /// Drops the `advisory-detail` bucket once its contents are saved.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNotFound`] (wrapped) if it does not exist.
    fn delete_advisory_detail_bucket(&self) -> CoreResult<()>;

    /// Drops the `vulnerability-detail` bucket once it is merged.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNotFound`] (wrapped) if it does not exist.
    fn delete_vulnerability_detail_bucket(&self) -> CoreResult<()>;

    /// CPE indices of a Red Hat content set. Empty if unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored list does not decode.
    fn red_hat_repo_to_cpes(&self, repository: &str) -> CoreResult<Vec<u32>>;

    /// CPE indices of a Red Hat build NVR. Empty if unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored list does not decode.
    fn red_hat_nvr_to_cpes(&self, nvr: &str) -> CoreResult<Vec<u32>>;

    /// The CPE behind `cpe_index`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored CPE does not decode.
    fn red_hat_cpe(&self, cpe_index: u32) -> CoreResult<Option<String>>;
}

impl AdvisoryReader for Store {
    fn get_advisories(&self, source: &str, pkg_name: &str) -> CoreResult<Vec<Advisory>> {
        let values = self.for_each_advisory(&[source], pkg_name)?;

        let mut advisories = Vec::with_capacity(values.len());
        for (vuln_id, value) in values {
            let mut advisory: Advisory = value.decode().map_err(|e| {
                e.context("get advisories", format!("{source}/{pkg_name}/{vuln_id}"))
            })?;
            advisory.vulnerability_id = vuln_id;
            advisory.data_source = value.source.filter(|source| !source.is_empty());
            advisories.push(advisory);
        }
        advisories.sort_by(|a, b| a.vulnerability_id.cmp(&b.vulnerability_id));
        Ok(advisories)
    }

    fn for_each_advisory(
        &self,
        sources: &[&str],
        pkg_name: &str,
    ) -> CoreResult<HashMap<String, ScanValue>> {
        let chain = sources.iter().copied().chain(std::iter::once(pkg_name));
        let spec = ScanSpec::from_chain(chain)?;
        self.for_each(&spec)
    }

    fn get_vulnerability_detail(
        &self,
        vuln_id: &str,
    ) -> CoreResult<HashMap<SourceId, VulnerabilityDetail>> {
        let path = BucketPath::new([VULNERABILITY_DETAIL_BUCKET, vuln_id])?;
        self.view(|tx| {
            let mut details = HashMap::new();
            let Some(bucket) = tx.bucket(&path) else {
                return Ok(details);
            };
            for (source, bytes) in bucket.entries() {
                let source = String::from_utf8_lossy(source).into_owned();
                let detail = from_cbor(bytes).map_err(|e| {
                    let target = format!("{path}/{source}");
                    CoreError::from(e).context("get vulnerability detail", target)
                })?;
                details.insert(SourceId::new(source), detail);
            }
            Ok(details)
        })
    }

    fn get_vulnerability(&self, vuln_id: &str) -> CoreResult<Option<Vulnerability>> {
        let path = BucketPath::root(VULNERABILITY_BUCKET)?;
        decode_optional(self, &path, vuln_id, "get vulnerability")
    }

    fn for_each_vulnerability_id<F>(&self, mut f: F) -> CoreResult<()>
    where
        F: FnMut(&mut WriteTx, &str) -> CoreResult<()>,
    {
        self.update(|tx| {
            let ids: Vec<String> = match tx.root_bucket(VULNERABILITY_ID_BUCKET) {
                Some(bucket) => bucket
                    .entries()
                    .map(|(id, _)| String::from_utf8_lossy(id).into_owned())
                    .collect(),
                None => {
                    debug!("no vulnerability IDs recorded");
                    return Ok(());
                }
            };
            for id in &ids {
                f(tx, id)?;
            }
            Ok(())
        })
    }

    fn delete_advisory_detail_bucket(&self) -> CoreResult<()> {
        self.delete_bucket(ADVISORY_DETAIL_BUCKET)
    }

    fn delete_vulnerability_detail_bucket(&self) -> CoreResult<()> {
        self.delete_bucket(VULNERABILITY_DETAIL_BUCKET)
    }

    fn red_hat_repo_to_cpes(&self, repository: &str) -> CoreResult<Vec<u32>> {
        let path = BucketPath::root(RED_HAT_REPOSITORY_BUCKET)?;
        Ok(decode_optional(self, &path, repository, "red hat repository")?.unwrap_or_default())
    }

    fn red_hat_nvr_to_cpes(&self, nvr: &str) -> CoreResult<Vec<u32>> {
        let path = BucketPath::root(RED_HAT_NVR_BUCKET)?;
        Ok(decode_optional(self, &path, nvr, "red hat nvr")?.unwrap_or_default())
    }

    fn red_hat_cpe(&self, cpe_index: u32) -> CoreResult<Option<String>> {
        let path = BucketPath::root(RED_HAT_CPE_BUCKET)?;
        decode_optional(self, &path, &cpe_index.to_string(), "red hat cpe")
    }
}

fn decode_optional<T: Decode>(
    store: &Store,
    path: &BucketPath,
    key: &str,
    op: &'static str,
) -> CoreResult<Option<T>> {
    match store.get(path, key)? {
        Some(bytes) => T::decode(&bytes)
            .map(Some)
            .map_err(|e| CoreError::from(e).context(op, format!("{path}/{key}"))),
        None => Ok(None),
    }
}
