//! Envelope Module
//!
//! The record shape the engine stores for every key and value.
//!
//! ## Wire Format
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ Size (4, BE) │         Payload (Size)       │
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! The payload is either raw bytes (when the logical type already is a byte
//! sequence) or UTF-8 JSON. See [`Codec`].

mod codec;

use std::io::Read;

use bytes::Bytes;

use crate::error::{DictError, Result};

pub use codec::{Codec, Json};

/// Size of the length prefix in front of every payload
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum payload size (256 MB)
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// A length-prefixed payload
///
/// The declared size is derived from the payload itself, so the two can
/// never disagree. Offsets into the encoded form are never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Envelope {
    payload: Bytes,
}

impl Envelope {
    /// Wrap a payload, rejecting payloads whose size does not fit the prefix
    pub fn new(payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(DictError::Envelope(format!(
                "payload too large: {} bytes (max {})",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        Ok(Self { payload })
    }

    /// The empty envelope (used as the value of tombstones)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Declared payload size
    pub fn size(&self) -> u32 {
        self.payload.len() as u32
    }

    /// The payload bytes
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the envelope, keeping the payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Length of the encoded form (prefix + payload)
    pub fn encoded_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }

    /// Append the encoded form to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.size().to_be_bytes());
        buf.extend_from_slice(&self.payload);
    }

    /// Encode to a fresh buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decode an envelope from the front of `bytes`
    ///
    /// Returns the envelope and the number of bytes consumed. Bytes after the
    /// declared payload are left untouched for the caller.
    pub fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize)> {
        let size = read_size(bytes)?;
        let end = LENGTH_PREFIX_SIZE + size;
        if bytes.len() < end {
            return Err(DictError::Envelope(format!(
                "incomplete payload: declared {} bytes, {} available",
                size,
                bytes.len() - LENGTH_PREFIX_SIZE
            )));
        }
        let payload = Bytes::copy_from_slice(&bytes[LENGTH_PREFIX_SIZE..end]);
        Ok((Self { payload }, end))
    }

    /// Decode an envelope that must span `bytes` exactly
    pub fn decode_exact(bytes: &[u8]) -> Result<Self> {
        let (envelope, consumed) = Self::decode_prefix(bytes)?;
        if consumed != bytes.len() {
            return Err(DictError::Envelope(format!(
                "declared size {} does not match {} payload bytes",
                envelope.size(),
                bytes.len() - LENGTH_PREFIX_SIZE
            )));
        }
        Ok(envelope)
    }

    /// Read one envelope from a stream
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        reader.read_exact(&mut prefix)?;
        let size = read_size(&prefix)?;
        let mut payload = vec![0u8; size];
        reader.read_exact(&mut payload)?;
        Ok(Self {
            payload: Bytes::from(payload),
        })
    }
}

/// Parse and validate the length prefix
fn read_size(bytes: &[u8]) -> Result<usize> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes
        .get(..LENGTH_PREFIX_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            DictError::Envelope(format!(
                "incomplete length prefix: expected {} bytes, got {}",
                LENGTH_PREFIX_SIZE,
                bytes.len()
            ))
        })?;
    let size = u32::from_be_bytes(prefix) as usize;
    if size > MAX_PAYLOAD_SIZE {
        return Err(DictError::Envelope(format!(
            "declared size too large: {} bytes (max {})",
            size, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(size)
}
