//! Log record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{SequenceNumber, TransactionId};
use bytes::Bytes;

/// Magic bytes identifying a log record.
pub const RECORD_MAGIC: [u8; 4] = *b"ALOG";

/// Current record format version.
pub const RECORD_VERSION: u16 = 1;

/// Record envelope header: magic (4) + version (2) + type (1) + length (4).
pub const RECORD_HEADER_SIZE: usize = 11;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// One committed write transaction.
    Commit = 1,
    /// A full image of the tree, written by compaction.
    Snapshot = 2,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One mutation of the bucket tree.
///
/// Paths are raw bucket names from the root down and are never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Create every missing bucket along `path`.
    CreateBucket {
        /// Bucket chain.
        path: Vec<Bytes>,
    },
    /// Store `value` under `key` in the bucket at `path`.
    Put {
        /// Bucket chain.
        path: Vec<Bytes>,
        /// Record key.
        key: Bytes,
        /// Encoded record.
        value: Bytes,
    },
    /// Remove `key` from the bucket at `path`.
    Delete {
        /// Bucket chain.
        path: Vec<Bytes>,
        /// Record key.
        key: Bytes,
    },
    /// Remove the bucket at `path` with everything below it.
    DeleteBucket {
        /// Bucket chain.
        path: Vec<Bytes>,
    },
}

impl Op {
    const CREATE_BUCKET: u8 = 1;
    const PUT: u8 = 2;
    const DELETE: u8 = 3;
    const DELETE_BUCKET: u8 = 4;

    /// Returns the bucket chain this op targets.
    #[must_use]
    pub fn path(&self) -> &[Bytes] {
        match self {
            Self::CreateBucket { path }
            | Self::Put { path, .. }
            | Self::Delete { path, .. }
            | Self::DeleteBucket { path } => path,
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        match self {
            Self::CreateBucket { path } => {
                buf.push(Self::CREATE_BUCKET);
                encode_path(buf, path)?;
            }
            Self::Put { path, key, value } => {
                buf.push(Self::PUT);
                encode_path(buf, path)?;
                encode_bytes(buf, key)?;
                encode_bytes(buf, value)?;
            }
            Self::Delete { path, key } => {
                buf.push(Self::DELETE);
                encode_path(buf, path)?;
                encode_bytes(buf, key)?;
            }
            Self::DeleteBucket { path } => {
                buf.push(Self::DELETE_BUCKET);
                encode_path(buf, path)?;
            }
        }
        Ok(())
    }

    fn decode_from(reader: &mut PayloadReader<'_>) -> CoreResult<Self> {
        let tag = reader.read_u8()?;
        let path = reader.read_path()?;
        match tag {
            Self::CREATE_BUCKET => Ok(Self::CreateBucket { path }),
            Self::PUT => {
                let key = reader.read_bytes()?;
                let value = reader.read_bytes()?;
                Ok(Self::Put { path, key, value })
            }
            Self::DELETE => {
                let key = reader.read_bytes()?;
                Ok(Self::Delete { path, key })
            }
            Self::DELETE_BUCKET => Ok(Self::DeleteBucket { path }),
            other => Err(CoreError::corruption(format!("unknown op tag {other}"))),
        }
    }
}

/// A record in the store log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// The ops of one committed write transaction, applied all together.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Sequence number assigned to this commit.
        sequence: SequenceNumber,
        /// Ops in the order they were performed.
        ops: Vec<Op>,
    },

    /// The complete tree as of `sequence`; replay discards earlier state.
    Snapshot {
        /// Sequence number the snapshot captures.
        sequence: SequenceNumber,
        /// Ops rebuilding the tree from empty.
        ops: Vec<Op>,
    },
}

impl LogRecord {
    /// Maximum encoded payload, bounded by the 4-byte length field.
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Commit { .. } => RecordType::Commit,
            Self::Snapshot { .. } => RecordType::Snapshot,
        }
    }

    /// Returns the sequence number of the state after this record.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        match self {
            Self::Commit { sequence, .. } | Self::Snapshot { sequence, .. } => *sequence,
        }
    }

    /// Returns the record's ops.
    #[must_use]
    pub fn ops(&self) -> &[Op] {
        match self {
            Self::Commit { ops, .. } | Self::Snapshot { ops, .. } => ops,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns an error if a count or length does not fit its field.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Commit {
                txid,
                sequence,
                ops,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
                encode_ops(&mut buf, ops)?;
            }
            Self::Snapshot { sequence, ops } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
                encode_ops(&mut buf, ops)?;
            }
        }
        if buf.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(CoreError::corruption(format!(
                "record payload of {} bytes exceeds the 4 GiB limit",
                buf.len()
            )));
        }
        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns a corruption error on short, malformed or oversized payloads.
    pub fn decode_payload(record_type: RecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader::new(payload);
        let record = match record_type {
            RecordType::Commit => {
                let txid = TransactionId::new(reader.read_u64()?);
                let sequence = SequenceNumber::new(reader.read_u64()?);
                let ops = decode_ops(&mut reader)?;
                Self::Commit {
                    txid,
                    sequence,
                    ops,
                }
            }
            RecordType::Snapshot => {
                let sequence = SequenceNumber::new(reader.read_u64()?);
                let ops = decode_ops(&mut reader)?;
                Self::Snapshot { sequence, ops }
            }
        };
        reader.finish(record_type)?;
        Ok(record)
    }

    /// Serializes the record with its envelope and checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::corruption("record payload too large"))?;

        let mut frame = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&RECORD_MAGIC);
        frame.extend_from_slice(&RECORD_VERSION.to_le_bytes());
        frame.push(self.record_type().as_byte());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);

        // CRC32 over everything before it
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

fn encode_len(buf: &mut Vec<u8>, len: usize, what: &str) -> CoreResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| CoreError::corruption(format!("{what} length {len} exceeds u32")))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> CoreResult<()> {
    encode_len(buf, bytes.len(), "field")?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn encode_path(buf: &mut Vec<u8>, path: &[Bytes]) -> CoreResult<()> {
    let depth = u16::try_from(path.len()).map_err(|_| {
        CoreError::corruption(format!("bucket path depth {} exceeds u16", path.len()))
    })?;
    buf.extend_from_slice(&depth.to_le_bytes());
    for segment in path {
        encode_bytes(buf, segment)?;
    }
    Ok(())
}

fn encode_ops(buf: &mut Vec<u8>, ops: &[Op]) -> CoreResult<()> {
    encode_len(buf, ops.len(), "op count")?;
    for op in ops {
        op.encode_into(buf)?;
    }
    Ok(())
}

fn decode_ops(reader: &mut PayloadReader<'_>) -> CoreResult<Vec<Op>> {
    let count = reader.read_u32()? as usize;
    // Every op takes at least a tag and a depth, so the count is bounded.
    if count > reader.remaining() / 3 {
        return Err(CoreError::corruption(format!(
            "op count {count} exceeds payload size"
        )));
    }
    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        ops.push(Op::decode_from(reader)?);
    }
    Ok(ops)
}

/// Bounds-checked little-endian reader over a record payload.
struct PayloadReader<'a> {
    payload: &'a [u8],
    cursor: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, cursor: 0 }
    }

    fn remaining(&self) -> usize {
        self.payload.len() - self.cursor
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(CoreError::corruption("unexpected end of payload"));
        }
        let bytes = &self.payload[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> CoreResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> CoreResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> CoreResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| CoreError::corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_bytes(&mut self) -> CoreResult<Bytes> {
        let len = self.read_u32()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    fn read_path(&mut self) -> CoreResult<Vec<Bytes>> {
        let depth = self.read_u16()? as usize;
        if depth == 0 {
            return Err(CoreError::corruption("op with empty bucket path"));
        }
        let mut path = Vec::with_capacity(depth.min(self.remaining() / 4));
        for _ in 0..depth {
            path.push(self.read_bytes()?);
        }
        Ok(path)
    }

    fn finish(&self, record_type: RecordType) -> CoreResult<()> {
        if self.cursor != self.payload.len() {
            return Err(CoreError::corruption(format!(
                "trailing bytes in {record_type:?} record: expected {} bytes, got {}",
                self.cursor,
                self.payload.len()
            )));
        }
        Ok(())
    }
}
