//! # AdvisoryDB Storage
//!
//! Byte-store backends underneath the advisory database file.
//!
//! Backends are **opaque byte stores**: they read, append, flush and truncate
//! bytes and know nothing about headers, commit records or buckets. The core
//! crate owns every byte of the file format.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - persistent storage through OS file APIs
//! - [`InMemoryBackend`] - ephemeral storage for tests; clones share one buffer
//!
//! ## Example
//!
//! ```rust
//! use advisorydb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
