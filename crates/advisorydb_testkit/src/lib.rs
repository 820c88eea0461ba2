//! # AdvisoryDB Testkit
//!
//! Test utilities for AdvisoryDB.
//!
//! This crate provides:
//! - Test fixtures, store helpers and sample feed records
//! - Property-based test generators using proptest
//! - A model-checked harness for cross-crate integration tests
//! - Corruption and crash simulation
//! - Concurrent stress runs
//!
//! ## Usage
//!
//! ```rust
//! use advisorydb_core::{AdvisoryReader, AdvisoryWriter};
//! use advisorydb_testkit::prelude::*;
//!
//! with_temp_store(|store| {
//!     store
//!         .update(|tx| tx.put_vulnerability_id("CVE-2021-44228"))
//!         .unwrap();
//!     assert_eq!(store.get_vulnerability("CVE-2021-44228").unwrap(), None);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
