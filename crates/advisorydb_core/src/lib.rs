//! # AdvisoryDB Core
//!
//! Embedded store for vulnerability advisories.
//!
//! This crate provides:
//! - A single-file store with an append-only commit log and crash recovery
//! - Nested buckets of keyed records, created on write
//! - Snapshot reads that never block the writer
//! - Coalescing batch writes for concurrent ingestion
//! - Provenance records attached to bulk reads
//! - Vulnerability, advisory and Red Hat mapping records
//!
//! ## Example
//!
//! ```rust
//! use advisorydb_core::{AdvisoryReader, AdvisoryWriter, Advisory, DataSource, Store};
//!
//! let store = Store::open_in_memory()?;
//! let root = "pip::GitHub Security Advisory pip";
//!
//! store.batch_update(move |tx| {
//!     tx.put_data_source(root, &DataSource::new("ghsa", "GitHub Security Advisory pip", ""))?;
//!     let advisory = Advisory { fixed_version: "2.2.13".into(), ..Advisory::default() };
//!     tx.put_advisory_detail("CVE-2021-3281", "django", &[root], &advisory)?;
//!     tx.put_vulnerability_id("CVE-2021-3281")?;
//!     tx.save_advisory_details("CVE-2021-3281")
//! })?;
//!
//! let advisories = store.get_advisories("pip::", "django")?;
//! assert_eq!(advisories[0].vulnerability_id, "CVE-2021-3281");
//! # Ok::<(), advisorydb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod bucket;
mod config;
mod dir;
mod error;
pub mod ingest;
pub mod log;
pub mod provenance;
mod stats;
mod store;
mod transaction;
mod types;
pub mod vulndb;

pub use bucket::{Bucket, BucketCounts, BucketPath, RootSelector, ScanSpec, ROOT_PREFIX_DELIMITER};
pub use config::{
    OpenFileHook, StoreOptions, DEFAULT_MAX_BATCH_DELAY, DEFAULT_MAX_BATCH_SIZE, DEFAULT_PAGE_SIZE,
};
pub use dir::{DB_DIR, DB_FILE, LOCK_FILE};
pub use error::{CoreError, CoreResult};
pub use ingest::VulnSrc;
pub use provenance::{DataSource, SourceId, DATA_SOURCE_BUCKET};
pub use stats::StoreStats;
pub use store::{ScanValue, Store, SCHEMA_VERSION};
pub use transaction::{BucketView, ReadTx, WriteTx};
pub use types::{SequenceNumber, TransactionId};
pub use vulndb::{
    Advisory, AdvisoryReader, AdvisoryWriter, Cvss, Severity, Status, Vulnerability,
    VulnerabilityDetail,
};
