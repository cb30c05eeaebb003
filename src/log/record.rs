//! Log record definitions
//!
//! Defines the structure of individual hybrid log records.

use std::io::Read;

use crate::envelope::Envelope;
use crate::error::{DictError, Result};

/// Header size: CRC (4) + Flags (4) + Allocated length (4)
pub const RECORD_HEADER_SIZE: usize = 12;

/// Records are padded to this alignment
pub const RECORD_ALIGNMENT: usize = 8;

const TOMBSTONE_BIT: u32 = 1;
const INVALID_BIT: u32 = 1 << 1;

/// Per-record flag word
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordInfo {
    bits: u32,
}

impl RecordInfo {
    pub fn from_bits(bits: u32) -> Self {
        Self { bits }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// The record marks its key deleted
    pub fn is_tombstone(&self) -> bool {
        self.bits & TOMBSTONE_BIT != 0
    }

    /// The record was superseded in place and must be skipped
    pub fn is_invalid(&self) -> bool {
        self.bits & INVALID_BIT != 0
    }

    /// Neither deleted nor superseded
    pub fn is_live(&self) -> bool {
        !self.is_tombstone() && !self.is_invalid()
    }

    pub fn set_tombstone(&mut self, tombstone: bool) {
        self.set(TOMBSTONE_BIT, tombstone);
    }

    pub fn set_invalid(&mut self, invalid: bool) {
        self.set(INVALID_BIT, invalid);
    }

    fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.bits |= bit;
        } else {
            self.bits &= !bit;
        }
    }
}

/// A single record in the hybrid log
///
/// The allocated length is fixed when the record is appended; an in-place
/// update may only store a value whose record still fits that allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub info: RecordInfo,
    pub key: Envelope,
    pub value: Envelope,
    allocated: u32,
}

impl LogRecord {
    /// Build a live record sized for `key` and `value`
    pub fn new(key: Envelope, value: Envelope) -> Result<Self> {
        let allocated = Self::required_len(&key, &value)?;
        Ok(Self {
            info: RecordInfo::default(),
            key,
            value,
            allocated,
        })
    }

    /// Build a tombstone for `key`
    pub fn tombstone(key: Envelope) -> Result<Self> {
        let mut record = Self::new(key, Envelope::empty())?;
        record.info.set_tombstone(true);
        Ok(record)
    }

    /// Bytes this record occupies in the log
    pub fn allocated_len(&self) -> u32 {
        self.allocated
    }

    /// Whether `value` can replace the current value without moving the record
    pub fn fits(&self, value: &Envelope) -> bool {
        Self::required_len(&self.key, value)
            .map(|needed| needed <= self.allocated)
            .unwrap_or(false)
    }

    /// Serialize with header, checksum and padding
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.allocated as usize);
        buf.extend_from_slice(&[0u8; 4]); // CRC placeholder
        buf.extend_from_slice(&self.info.bits().to_le_bytes());
        buf.extend_from_slice(&self.allocated.to_le_bytes());
        self.key.encode_into(&mut buf);
        self.value.encode_into(&mut buf);
        buf.resize(self.allocated as usize, 0);

        let crc = crc32fast::hash(&buf[4..]);
        buf[..4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserialize one record occupying all of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = parse_header(bytes)?;
        if bytes.len() != header.allocated as usize {
            return Err(DictError::Corruption(format!(
                "record length mismatch: header says {}, got {}",
                header.allocated,
                bytes.len()
            )));
        }

        let actual_crc = crc32fast::hash(&bytes[4..]);
        if actual_crc != header.crc {
            return Err(DictError::Corruption(format!(
                "record CRC mismatch: expected {:08x}, got {:08x}",
                header.crc, actual_crc
            )));
        }

        let body = &bytes[RECORD_HEADER_SIZE..];
        let (key, used) = Envelope::decode_prefix(body)?;
        let (value, _) = Envelope::decode_prefix(&body[used..])?;

        Ok(Self {
            info: RecordInfo::from_bits(header.flags),
            key,
            value,
            allocated: header.allocated,
        })
    }

    /// Read one record from a stream positioned at a record boundary
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        reader.read_exact(&mut header)?;
        let parsed = parse_header(&header)?;

        let mut buf = vec![0u8; parsed.allocated as usize];
        buf[..RECORD_HEADER_SIZE].copy_from_slice(&header);
        reader.read_exact(&mut buf[RECORD_HEADER_SIZE..])?;

        Self::decode(&buf)
    }

    fn required_len(key: &Envelope, value: &Envelope) -> Result<u32> {
        let raw = RECORD_HEADER_SIZE + key.encoded_len() + value.encoded_len();
        let aligned = raw.div_ceil(RECORD_ALIGNMENT) * RECORD_ALIGNMENT;
        u32::try_from(aligned)
            .map_err(|_| DictError::Envelope(format!("record too large: {} bytes", aligned)))
    }
}

struct RecordHeader {
    crc: u32,
    flags: u32,
    allocated: u32,
}

fn parse_header(bytes: &[u8]) -> Result<RecordHeader> {
    if bytes.len() < RECORD_HEADER_SIZE {
        return Err(DictError::Corruption(format!(
            "incomplete record header: expected {} bytes, got {}",
            RECORD_HEADER_SIZE,
            bytes.len()
        )));
    }
    let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let header = RecordHeader {
        crc: word(0),
        flags: word(4),
        allocated: word(8),
    };

    if (header.allocated as usize) < RECORD_HEADER_SIZE + 2 * crate::envelope::LENGTH_PREFIX_SIZE
        || header.allocated as usize % RECORD_ALIGNMENT != 0
    {
        return Err(DictError::Corruption(format!(
            "invalid record allocation: {}",
            header.allocated
        )));
    }
    Ok(header)
}
