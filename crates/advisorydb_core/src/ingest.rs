//! The seam between feed parsers and the store.
//!
//! A feed parser turns one upstream's files into records and writes all of
//! them through a single [`Store::batch_update`], so a failed run leaves
//! nothing behind. For every record it stores the advisory, the
//! vulnerability detail and the vulnerability ID in that same batch, and it
//! records the provenance of each root bucket it fills.

use crate::error::CoreResult;
use crate::provenance::SourceId;
use crate::store::Store;
use std::path::Path;

/// A feed that can be loaded into the store.
pub trait VulnSrc {
    /// Identifier of the feed, used as the source in vulnerability details.
    fn name(&self) -> SourceId;

    /// Loads the feed's files found under `dir` into `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be read or the batch fails.
    fn update(&self, store: &Store, dir: &Path) -> CoreResult<()>;
}

/// Picks the vulnerability ID of a record.
///
/// An explicit, non-blank identifier from the record wins. Otherwise the ID
/// is the entry's file name without directories and extension, so
/// `advisories/CVE-2019-12139.yaml` yields `CVE-2019-12139`.
#[must_use]
pub fn vulnerability_id(explicit: Option<&str>, entry_name: &str) -> String {
    if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    let path = Path::new(entry_name);
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::provenance::DataSource;
    use crate::transaction::BucketView;
    use crate::vulndb::{Advisory, AdvisoryReader, AdvisoryWriter, VulnerabilityDetail};
    use std::fs;

    #[test]
    fn explicit_id_wins() {
        assert_eq!(
            vulnerability_id(Some("GHSA-xxxx-yyyy"), "CVE-1.yaml"),
            "GHSA-xxxx-yyyy"
        );
        assert_eq!(vulnerability_id(Some("  "), "CVE-2019-12139.yaml"), "CVE-2019-12139");
    }

    #[test]
    fn id_from_entry_name() {
        assert_eq!(
            vulnerability_id(None, "symfony/http-kernel/CVE-2019-10909.yaml"),
            "CVE-2019-10909"
        );
        assert_eq!(vulnerability_id(None, "CVE-2020-1"), "CVE-2020-1");
        assert_eq!(vulnerability_id(None, "RHSA-2020:1234.json"), "RHSA-2020:1234");
    }

    /// A feed of `<package>/<vuln id>.txt` files holding the fixed version.
    struct TextFeed;

    const ROOT: &str = "text::Test Feed";

    impl VulnSrc for TextFeed {
        fn name(&self) -> SourceId {
            SourceId::new("text")
        }

        fn update(&self, store: &Store, dir: &Path) -> CoreResult<()> {
            let mut records = Vec::new();
            for package in fs::read_dir(dir)? {
                let package = package?;
                let pkg_name = package.file_name().to_string_lossy().into_owned();
                for entry in fs::read_dir(package.path())? {
                    let entry = entry?;
                    let fixed = fs::read_to_string(entry.path())?;
                    let id = vulnerability_id(None, &entry.file_name().to_string_lossy());
                    records.push((pkg_name.clone(), id, fixed.trim().to_string()));
                }
            }

            let source = self.name();
            store.batch_update(move |tx| {
                tx.put_data_source(ROOT, &DataSource::new(source.clone(), "Test Feed", ""))?;
                for (pkg_name, id, fixed) in &records {
                    if fixed.is_empty() {
                        return Err(CoreError::KeyRequired);
                    }
                    let advisory = Advisory {
                        fixed_version: fixed.clone(),
                        ..Advisory::default()
                    };
                    tx.put_advisory_detail(id, pkg_name, &[ROOT], &advisory)?;
                    tx.put_vulnerability_detail(id, &source, &VulnerabilityDetail::default())?;
                    tx.put_vulnerability_id(id)?;
                    tx.save_advisory_details(id)?;
                }
                Ok(())
            })
        }
    }

    #[test]
    fn feed_loads_in_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("requests")).unwrap();
        fs::write(dir.path().join("requests/CVE-2018-18074.txt"), "2.20.0\n").unwrap();
        fs::write(dir.path().join("requests/CVE-2023-32681.txt"), "2.31.0").unwrap();

        let store = Store::open_in_memory().unwrap();
        TextFeed.update(&store, dir.path()).unwrap();

        let advisories = store.get_advisories(ROOT, "requests").unwrap();
        assert_eq!(advisories.len(), 2);
        assert_eq!(advisories[0].vulnerability_id, "CVE-2018-18074");
        assert_eq!(advisories[0].fixed_version, "2.20.0");
        assert_eq!(advisories[1].data_source.as_ref().unwrap().id, TextFeed.name());
        assert!(store
            .get_vulnerability_detail("CVE-2023-32681")
            .unwrap()
            .contains_key(&SourceId::new("text")));
    }

    #[test]
    fn failed_feed_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("urllib3")).unwrap();
        fs::write(dir.path().join("urllib3/CVE-2021-33503.txt"), "1.26.5").unwrap();
        fs::write(dir.path().join("urllib3/CVE-2019-0000.txt"), "").unwrap();

        let store = Store::open_in_memory().unwrap();
        assert!(TextFeed.update(&store, dir.path()).is_err());
        assert!(store.get_advisories(ROOT, "urllib3").unwrap().is_empty());
        assert!(store.view(|tx| Ok(tx.root_names().is_empty())).unwrap());
    }
}
