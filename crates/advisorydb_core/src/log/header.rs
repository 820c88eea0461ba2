//! Store file header.

use crate::error::{CoreError, CoreResult};
use crate::log::record::compute_crc32;

/// Magic bytes opening every store file.
pub const FILE_MAGIC: [u8; 4] = *b"ADVB";

/// Current file format version.
pub const FILE_FORMAT_VERSION: u16 = 1;

/// Encoded header size: magic (4) + version (2) + page size (4) + crc32 (4).
pub const FILE_HEADER_SIZE: usize = 14;

/// The fixed header at offset zero of a store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version the file was written with.
    pub version: u16,
    /// Page size recorded when the file was created.
    pub page_size: u32,
}

impl FileHeader {
    /// Creates a header for a new file.
    #[must_use]
    pub const fn new(page_size: u32) -> Self {
        Self {
            version: FILE_FORMAT_VERSION,
            page_size,
        }
    }

    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&FILE_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.page_size.to_le_bytes());
        let crc = compute_crc32(&buf[0..10]);
        buf[10..14].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and validates a header.
    ///
    /// # Errors
    ///
    /// Every failure is a corruption error: short input, foreign magic,
    /// a newer format version, a zero page size or a checksum mismatch.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(CoreError::corruption(format!(
                "file header truncated: {} of {FILE_HEADER_SIZE} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] != FILE_MAGIC {
            return Err(CoreError::corruption("not an advisory store file"));
        }

        let stored = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
        let computed = compute_crc32(&bytes[0..10]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version > FILE_FORMAT_VERSION {
            return Err(CoreError::corruption(format!(
                "unsupported file format version {version}"
            )));
        }
        let page_size = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        if page_size == 0 {
            return Err(CoreError::corruption("file header has zero page size"));
        }

        Ok(Self { version, page_size })
    }
}
