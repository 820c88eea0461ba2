//! Commit log writer and replay.

use crate::config::StoreOptions;
use crate::error::{CoreError, CoreResult};
use crate::log::header::{FileHeader, FILE_HEADER_SIZE};
use crate::log::iterator::LogIterator;
use crate::log::record::LogRecord;
use crate::types::{SequenceNumber, TransactionId};
use advisorydb_storage::StorageBackend;
use tracing::warn;

/// What [`CommitLog::replay`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Sequence number of the last applied record.
    pub sequence: SequenceNumber,
    /// Highest transaction ID seen in a commit record.
    pub last_txid: TransactionId,
    /// Number of records applied.
    pub records: u64,
    /// Offset just past the last complete record.
    pub end_offset: u64,
    /// Bytes of an incomplete trailing record that were dropped.
    pub truncated: u64,
    /// `true` if the file was empty and a header was written.
    pub created: bool,
}

/// Append-only log of commits over a storage backend.
///
/// The log is the whole store: a header followed by records. Opening a
/// store replays every record into the bucket tree; committing appends one
/// record. A commit is durable once [`CommitLog::append`] returns.
pub struct CommitLog {
    backend: Box<dyn StorageBackend>,
    page_size: u32,
    read_buffer: usize,
    read_only: bool,
    no_sync: bool,
}

impl CommitLog {
    /// Wraps `backend`. Nothing is read until [`CommitLog::replay`].
    pub fn new(backend: Box<dyn StorageBackend>, options: &StoreOptions) -> Self {
        Self {
            backend,
            page_size: options.effective_page_size(),
            read_buffer: options.initial_mmap_size,
            read_only: options.read_only,
            no_sync: options.no_sync,
        }
    }

    /// Validates the header and feeds every complete record to `apply`.
    ///
    /// An empty backend is initialized with a fresh header (or rejected with
    /// [`CoreError::NotInitialized`] when read-only). An incomplete trailing
    /// record is the mark of an interrupted append and is cut off. Anything
    /// else that does not parse is corruption.
    ///
    /// # Errors
    ///
    /// Returns a corruption error for a damaged header or record, or the
    /// first error `apply` returns.
    pub fn replay<F>(&mut self, mut apply: F) -> CoreResult<ReplaySummary>
    where
        F: FnMut(LogRecord) -> CoreResult<()>,
    {
        let size = self.backend.size()?;
        if size == 0 {
            if self.read_only {
                return Err(CoreError::NotInitialized {
                    path: Default::default(),
                });
            }
            self.write_header()?;
            return Ok(ReplaySummary {
                sequence: SequenceNumber::default(),
                last_txid: TransactionId::new(0),
                records: 0,
                end_offset: FILE_HEADER_SIZE as u64,
                truncated: 0,
                created: true,
            });
        }

        let available = usize::try_from(size.min(FILE_HEADER_SIZE as u64)).unwrap_or(0);
        let header = FileHeader::decode(&self.backend.read_at(0, available)?)?;
        self.page_size = header.page_size;

        let buffer_size = self.read_buffer.max(header.page_size as usize);
        let start = FILE_HEADER_SIZE as u64;
        let mut iter = LogIterator::new(self.backend.as_ref(), start, buffer_size)?;

        let mut sequence = SequenceNumber::default();
        let mut last_txid = TransactionId::new(0);
        let mut records = 0u64;
        for item in iter.by_ref() {
            let (offset, record) = item?;
            if record.sequence() <= sequence && records > 0 {
                return Err(CoreError::corruption(format!(
                    "sequence went backwards at offset {offset}: {} after {sequence}",
                    record.sequence()
                )));
            }
            sequence = record.sequence();
            if let LogRecord::Commit { txid, .. } = &record {
                last_txid = last_txid.max(*txid);
            }
            apply(record)?;
            records += 1;
        }

        let end_offset = iter.position();
        let torn = iter.torn_tail();
        drop(iter);

        let mut truncated = 0;
        if torn {
            truncated = size - end_offset;
            if self.read_only {
                warn!(
                    offset = end_offset,
                    bytes = truncated,
                    "ignoring incomplete trailing record in read-only store"
                );
            } else {
                warn!(
                    offset = end_offset,
                    bytes = truncated,
                    "truncating incomplete trailing record"
                );
                self.backend.truncate(end_offset)?;
            }
        }

        Ok(ReplaySummary {
            sequence,
            last_txid,
            records,
            end_offset,
            truncated,
            created: false,
        })
    }

    /// Appends one record and makes it durable.
    ///
    /// If the write or sync fails, the log is cut back to its previous end
    /// so a half-written record never precedes later commits.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, writing or syncing fails.
    pub fn append(&mut self, record: &LogRecord) -> CoreResult<u64> {
        if self.read_only {
            return Err(CoreError::ReadOnly);
        }
        let frame = record.encode_frame()?;
        let before = self.backend.size()?;

        let result = self
            .backend
            .append(&frame)
            .and_then(|offset| self.persist().map(|()| offset));

        match result {
            Ok(offset) => Ok(offset),
            Err(e) => {
                if let Err(rollback) = self.backend.truncate(before) {
                    warn!(error = %rollback, offset = before, "failed to roll back partial append");
                }
                Err(e.into())
            }
        }
    }

    /// Drops every record and writes a fresh header.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be truncated or written.
    pub fn reset(&mut self) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::ReadOnly);
        }
        self.backend.truncate(0)?;
        self.write_header()
    }

    /// Forces all written data to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Pushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Returns the current log size in bytes, header included.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns the page size recorded in the header.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn write_header(&mut self) -> CoreResult<()> {
        let header = FileHeader::new(self.page_size);
        self.backend.append(&header.encode())?;
        self.persist()?;
        Ok(())
    }

    fn persist(&mut self) -> advisorydb_storage::StorageResult<()> {
        if self.no_sync {
            self.backend.flush()
        } else {
            self.backend.sync()
        }
    }
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLog")
            .field("page_size", &self.page_size)
            .field("read_only", &self.read_only)
            .field("no_sync", &self.no_sync)
            .finish_non_exhaustive()
    }
}
