//! Store size and content statistics.

use crate::bucket::Bucket;
use crate::error::CoreResult;
use crate::log::{LogRecord, FILE_HEADER_SIZE};
use crate::types::SequenceNumber;

/// Reclaimable space below which closing never compacts.
pub(crate) const AUTO_COMPACT_MIN_BYTES: u64 = 4 * 1024 * 1024;

/// A point-in-time summary of a store.
///
/// `live_bytes` is what the file would shrink to if compacted now;
/// everything above it is superseded history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Sequence number of the last commit.
    pub sequence: SequenceNumber,
    /// Current size of the store file.
    pub file_size: u64,
    /// Size of the file after compaction.
    pub live_bytes: u64,
    /// Bytes compaction would give back.
    pub reclaimable_bytes: u64,
    /// Number of root buckets.
    pub root_buckets: u64,
    /// Buckets at every depth, roots included.
    pub buckets: u64,
    /// Key/value entries at every depth.
    pub entries: u64,
}

impl StoreStats {
    /// Measures `root` as committed at `sequence` in a file of `file_size`.
    pub(crate) fn measure(
        root: &Bucket,
        sequence: SequenceNumber,
        file_size: u64,
    ) -> CoreResult<Self> {
        let counts = root.counts();
        let snapshot = LogRecord::Snapshot {
            sequence,
            ops: root.snapshot_ops(),
        };
        let live_bytes = FILE_HEADER_SIZE as u64 + snapshot.encode_frame()?.len() as u64;
        Ok(Self {
            sequence,
            file_size,
            live_bytes,
            reclaimable_bytes: file_size.saturating_sub(live_bytes),
            root_buckets: root.buckets().count() as u64,
            buckets: counts.buckets,
            entries: counts.entries,
        })
    }

    /// Returns `true` once superseded history outweighs live data and is
    /// large enough to be worth a rewrite.
    #[must_use]
    pub fn worth_compacting(&self) -> bool {
        self.reclaimable_bytes >= AUTO_COMPACT_MIN_BYTES
            && self.reclaimable_bytes >= self.live_bytes
    }
}
