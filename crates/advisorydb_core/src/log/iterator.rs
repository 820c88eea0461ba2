//! Streaming log record iterator.
//!
//! Reads records one by one through a bounded buffer, so replaying a large
//! store never needs the whole file in memory at once.

use crate::error::{CoreError, CoreResult};
use crate::log::record::{
    compute_crc32, LogRecord, RecordType, CRC_SIZE, RECORD_HEADER_SIZE, RECORD_MAGIC,
    RECORD_VERSION,
};
use advisorydb_storage::StorageBackend;

/// Smallest read buffer the iterator will use.
const MIN_BUFFER_SIZE: usize = 4096;

/// A streaming iterator over log records.
///
/// Yields `(offset, record)` pairs.
///
/// # Error Handling
///
/// - CRC mismatches return an error immediately
/// - Truncated records (incomplete header or payload) end the iteration and
///   set [`LogIterator::torn_tail`], as long as nothing after them parses as
///   a complete record
/// - A payload length running past the end of the log while complete
///   records follow is a damaged length field, reported as corruption
/// - Invalid magic bytes, unknown types and newer versions return a
///   corruption error
pub struct LogIterator<'a> {
    backend: &'a dyn StorageBackend,
    /// Total size of the backend.
    total_size: u64,
    /// Offset of the next unread record.
    current_offset: u64,
    buffer: Vec<u8>,
    /// Current position within the buffer.
    buffer_pos: usize,
    /// Number of valid bytes in the buffer.
    buffer_len: usize,
    finished: bool,
    torn_tail: bool,
}

impl<'a> LogIterator<'a> {
    /// Creates an iterator starting at `start_offset`.
    ///
    /// `buffer_size` is the read chunk; it grows on demand for larger
    /// records.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(
        backend: &'a dyn StorageBackend,
        start_offset: u64,
        buffer_size: usize,
    ) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            current_offset: start_offset,
            buffer: vec![0u8; buffer_size.max(MIN_BUFFER_SIZE)],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
            torn_tail: false,
        })
    }

    /// Offset just past the last complete record read so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.current_offset
    }

    /// Returns `true` if iteration stopped at an incomplete record.
    #[must_use]
    pub fn torn_tail(&self) -> bool {
        self.torn_tail
    }

    /// Ensures at least `min_bytes` are buffered from the current position.
    ///
    /// Returns `false` if the backend ends first.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let unread = self.total_size.saturating_sub(self.current_offset);
        if unread < min_bytes as u64 {
            return Ok(false);
        }

        // Move remaining data to the start of the buffer
        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let not_buffered = unread - available as u64;
        let room = (self.buffer.len() - self.buffer_len) as u64;
        let to_read = room.min(not_buffered) as usize;
        if to_read > 0 {
            let read_offset = self.current_offset + self.buffer_len as u64;
            let data = self.backend.read_at(read_offset, to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    fn read_next_record(&mut self) -> CoreResult<Option<(u64, LogRecord)>> {
        if self.finished {
            return Ok(None);
        }
        if self.current_offset >= self.total_size {
            self.finished = true;
            return Ok(None);
        }

        let record_start = self.current_offset;

        if !self.ensure_buffered(RECORD_HEADER_SIZE)? {
            self.finished = true;
            self.torn_tail = true;
            return Ok(None);
        }

        let header = &self.buffer[self.buffer_pos..self.buffer_pos + RECORD_HEADER_SIZE];

        if header[0..4] != RECORD_MAGIC {
            self.finished = true;
            return Err(CoreError::corruption(format!(
                "invalid record magic at offset {record_start}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > RECORD_VERSION {
            self.finished = true;
            return Err(CoreError::corruption(format!(
                "unsupported record version {version} at offset {record_start}"
            )));
        }

        let type_byte = header[6];
        let Some(record_type) = RecordType::from_byte(type_byte) else {
            self.finished = true;
            return Err(CoreError::corruption(format!(
                "unknown record type {type_byte} at offset {record_start}"
            )));
        };

        let payload_len =
            u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total_len = RECORD_HEADER_SIZE + payload_len + CRC_SIZE;

        if !self.ensure_buffered(total_len)? {
            self.finished = true;
            if let Some(next) = self.find_complete_record(record_start)? {
                return Err(CoreError::corruption(format!(
                    "record at offset {record_start} claims {payload_len} payload bytes \
                     past the end of the log, but a complete record starts at offset {next}"
                )));
            }
            self.torn_tail = true;
            return Ok(None);
        }

        let payload_start = self.buffer_pos + RECORD_HEADER_SIZE;
        let payload_end = payload_start + payload_len;
        let stored_crc = u32::from_le_bytes([
            self.buffer[payload_end],
            self.buffer[payload_end + 1],
            self.buffer[payload_end + 2],
            self.buffer[payload_end + 3],
        ]);

        // CRC covers header + payload
        let computed_crc = compute_crc32(&self.buffer[self.buffer_pos..payload_end]);
        if stored_crc != computed_crc {
            self.finished = true;
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let payload = &self.buffer[payload_start..payload_end];
        let record = match LogRecord::decode_payload(record_type, payload) {
            Ok(record) => record,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        self.buffer_pos += total_len;
        self.current_offset += total_len as u64;

        Ok(Some((record_start, record)))
    }

    /// Searches past the header at `record_start` for a complete, checksummed
    /// record and returns its offset.
    ///
    /// A torn append is always the last thing in the log, so finding one
    /// means the header's length field is damaged.
    fn find_complete_record(&self, record_start: u64) -> CoreResult<Option<u64>> {
        let from = record_start + RECORD_HEADER_SIZE as u64;
        let Ok(len) = usize::try_from(self.total_size.saturating_sub(from)) else {
            return Ok(None);
        };
        if len < RECORD_HEADER_SIZE + CRC_SIZE {
            return Ok(None);
        }
        let rest = self.backend.read_at(from, len)?;
        let found = rest
            .windows(RECORD_MAGIC.len())
            .enumerate()
            .filter(|(_, window)| *window == RECORD_MAGIC)
            .map(|(at, _)| at)
            .find(|&at| is_complete_frame(&rest[at..]));
        Ok(found.map(|at| from + at as u64))
    }
}

/// Returns `true` if `bytes` starts with a whole record whose CRC matches.
fn is_complete_frame(bytes: &[u8]) -> bool {
    if bytes.len() < RECORD_HEADER_SIZE + CRC_SIZE || bytes[0..4] != RECORD_MAGIC {
        return false;
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version > RECORD_VERSION || RecordType::from_byte(bytes[6]).is_none() {
        return false;
    }
    let payload_len = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;
    let Some(end) = RECORD_HEADER_SIZE.checked_add(payload_len) else {
        return false;
    };
    match bytes.get(end..end + CRC_SIZE) {
        Some(crc) => {
            u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]) == compute_crc32(&bytes[..end])
        }
        None => false,
    }
}

impl Iterator for LogIterator<'_> {
    type Item = CoreResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next_record().transpose()
    }
}
