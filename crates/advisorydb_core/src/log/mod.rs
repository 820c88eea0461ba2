//! The store file: a header followed by an append-only log of commits.
//!
//! # File Format
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ magic "ADVB" | version | page size | crc32 │  14 bytes
//! ├──────────────────────────────┤
//! │ record                       │
//! │ record                       │
//! │ ...                          │
//! └──────────────────────────────┘
//! ```
//!
//! Each record is framed as
//!
//! ```text
//! magic "ALOG" (4) | version (2) | type (1) | length (4) | payload | crc32 (4)
//! ```
//!
//! A `Commit` record holds the ops of one write transaction. A `Snapshot`
//! record holds the whole tree and is written only by compaction, as the
//! first record of a fresh file.
//!
//! # Recovery
//!
//! An incomplete record at the end of the file is an interrupted append and
//! is dropped on open. Every other parse failure is corruption, which the
//! store answers by recreating the file.

mod header;
mod iterator;
mod record;
mod writer;

pub use header::{FileHeader, FILE_FORMAT_VERSION, FILE_HEADER_SIZE, FILE_MAGIC};
pub use iterator::LogIterator;
pub use record::{compute_crc32, LogRecord, Op, RecordType, RECORD_MAGIC, RECORD_VERSION};
pub use writer::{CommitLog, ReplaySummary};
