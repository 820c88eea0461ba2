//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores
//! and common ingestion scenarios.

use advisorydb_core::{
    Advisory, AdvisoryWriter, DataSource, Severity, SourceId, Status, Store, StoreOptions,
    VulnerabilityDetail,
};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use time::macros::datetime;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Store,
    /// The temporary root directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            store: Store::open_in_memory().expect("Failed to open in-memory store"),
            temp_dir: None,
        }
    }

    /// Creates a new file-backed test store under a temporary root.
    pub fn file() -> Self {
        Self::file_with(StoreOptions::default())
    }

    /// Creates a file-backed test store with `options`.
    pub fn file_with(options: StoreOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::open(temp_dir.path(), options).expect("Failed to open file store");
        Self {
            store,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the root directory if file-backed, None if in-memory.
    pub fn root(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Returns the store file if file-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.root().map(Store::path)
    }

    /// Closes the store and opens the same file again.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores.
    pub fn reopen(&mut self, options: StoreOptions) {
        let root = self
            .root()
            .expect("Only file stores can be reopened")
            .to_path_buf();
        self.store.close().expect("Failed to close store");
        self.store = Store::open(&root, options).expect("Failed to reopen store");
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust
/// use advisorydb_core::BucketPath;
/// use advisorydb_testkit::with_temp_store;
///
/// with_temp_store(|store| {
///     let path = BucketPath::root("vulnerability").unwrap();
///     assert!(store.get(&path, "CVE-2021-44228").unwrap().is_none());
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary file-backed store and its root directory.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store, &Path) -> R,
{
    let test_store = TestStore::file();
    let root = test_store.root().expect("File store should have a root");
    f(&test_store.store, root)
}

/// Routes `tracing` output to the test harness.
///
/// Honors `RUST_LOG`; defaults to `advisorydb_core=debug`. Safe to call
/// from every test.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("advisorydb_core=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Sample records shaped like real feed output.
pub mod samples {
    use super::*;

    /// Root bucket of the GitHub pip advisories.
    pub const GHSA_PIP: &str = "pip::GitHub Security Advisory pip";
    /// Root bucket of the OSV PyPI advisories.
    pub const OSV_PYPI: &str = "pip::Open Source Vulnerabilities PyPI";

    /// Provenance of [`GHSA_PIP`].
    pub fn ghsa_pip() -> DataSource {
        DataSource::new(
            "ghsa",
            "GitHub Security Advisory pip",
            "https://github.com/advisories?query=type%3Areviewed+ecosystem%3Apip",
        )
    }

    /// Provenance of [`OSV_PYPI`].
    pub fn osv_pypi() -> DataSource {
        DataSource::new("osv", "Open Source Vulnerabilities PyPI", "https://osv.dev")
    }

    /// An advisory fixed in `fixed`.
    pub fn advisory(fixed: &str) -> Advisory {
        Advisory {
            status: Some(Status::Fixed),
            severity: Severity::High,
            fixed_version: fixed.to_string(),
            vulnerable_versions: vec![format!("<{fixed}")],
            patched_versions: vec![format!(">={fixed}")],
            ..Advisory::default()
        }
    }

    /// A detail record as NVD would publish it.
    pub fn nvd_detail(vuln_id: &str) -> VulnerabilityDetail {
        VulnerabilityDetail {
            id: vuln_id.to_string(),
            cvss_score_v3: Some(7.5),
            cvss_vector_v3: "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:N/I:N/A:H".to_string(),
            severity_v3: Severity::High,
            cwe_ids: vec!["CWE-400".to_string()],
            references: vec![format!("https://nvd.nist.gov/vuln/detail/{vuln_id}")],
            title: format!("{vuln_id} in sample package"),
            description: "Uncontrolled resource consumption.".to_string(),
            published_date: Some(datetime!(2021-02-01 15:15 UTC)),
            last_modified_date: Some(datetime!(2021-06-14 18:15 UTC)),
            ..VulnerabilityDetail::default()
        }
    }

    /// Source ID of [`nvd_detail`] records.
    pub fn nvd() -> SourceId {
        SourceId::new("nvd")
    }
}

/// Ingestion scenario helpers.
pub mod scenarios {
    use super::samples::{self, GHSA_PIP};
    use super::*;

    /// Vulnerability ID of the `index`th record of [`populated_store`].
    pub fn vuln_id(index: usize) -> String {
        format!("CVE-2021-{:05}", index + 1)
    }

    /// Creates a store holding `count` advisories for package `django`
    /// under [`GHSA_PIP`], ingested the way a feed would.
    pub fn populated_store(count: usize) -> TestStore {
        let test_store = TestStore::memory();
        test_store
            .update(|tx| {
                tx.put_data_source(GHSA_PIP, &samples::ghsa_pip())?;
                for i in 0..count {
                    let id = vuln_id(i);
                    let fixed = format!("3.{i}.0");
                    tx.put_advisory_detail(&id, "django", &[GHSA_PIP], &samples::advisory(&fixed))?;
                    tx.put_vulnerability_detail(&id, &samples::nvd(), &samples::nvd_detail(&id))?;
                    tx.put_vulnerability_id(&id)?;
                }
                for i in 0..count {
                    tx.save_advisory_details(&vuln_id(i))?;
                }
                Ok(())
            })
            .expect("Failed to ingest scenario");
        test_store
    }
}
