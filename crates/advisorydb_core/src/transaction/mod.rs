//! Read and write transactions over the bucket tree.
//!
//! - **Atomicity**: a write transaction's ops reach the log as one commit
//!   record, or not at all
//! - **Isolation**: a read transaction holds the committed root it started
//!   with and never observes later commits
//! - **Durability**: a commit returns only after its record is synced
//!
//! Both transaction kinds implement [`BucketView`], so lookup code is
//! written once and runs against either.

mod read;
mod write;

pub use read::{BucketView, ReadTx};
pub use write::WriteTx;
