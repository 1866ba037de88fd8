//! # Record - segment log record codec
//!
//! Encodes and decodes the single unit persisted to a segment file: a key
//! plus either a value or a tombstone marker.
//!
//! ## Binary record format
//!
//! ```text
//! [crc: u64][key_len: i32][value_len: i32][tombstone: u8][key][value]
//! ```
//!
//! All integers are big-endian. The CRC is the IEEE CRC-32 of everything
//! after the crc field (`key_len | value_len | tombstone | key | value`),
//! zero-extended into the 64-bit slot. Existing segment files carry the
//! 32-in-64 layout, so the wide field is part of the wire format and must
//! not be narrowed.
//!
//! A tombstone always encodes `value_len = 0` and carries no value bytes.
//! A segment file is a pure concatenation of these records: no file
//! header, no footer, no lengths recorded anywhere else.
//!
//! ## Example
//!
//! ```rust
//! use record::Record;
//!
//! let rec = Record::put(b"hello".to_vec(), b"world".to_vec());
//! let image = rec.encode();
//! assert_eq!(image.len() as u64, rec.disk_size());
//!
//! let decoded = Record::decode(&mut &image[..]).unwrap();
//! assert_eq!(decoded, rec);
//! ```

use byteorder::{BigEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Fixed bytes preceding the key: crc (8) + key_len (4) + value_len (4) +
/// tombstone flag (1).
pub const HEADER_BYTES: u64 = 17;

/// Largest key or value length the decoder will allocate for. A corrupt
/// header can claim any length; reject absurd ones before reserving memory.
const MAX_FIELD_BYTES: i32 = 64 * 1024 * 1024;

/// Errors from encoding or decoding a record.
#[derive(Debug, Error)]
pub enum RecordError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended before a full record was read.
    #[error("unexpected eof inside record")]
    ShortRead,

    /// The stored CRC disagrees with the payload, or a header length field
    /// is not a plausible length. Either way the bytes at this position do
    /// not form a record.
    #[error("crc mismatch")]
    CrcMismatch,
}

/// One log record.
///
/// `value` is always empty when `tombstone` is set; [`Record::tombstone`]
/// enforces this for writers and the encoder re-enforces it on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub tombstone: bool,
}

impl Record {
    /// A live key-value record.
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            tombstone: false,
        }
    }

    /// A deletion marker for `key`.
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            tombstone: true,
        }
    }

    /// Bytes this record occupies on disk.
    pub fn disk_size(&self) -> u64 {
        HEADER_BYTES + self.key.len() as u64 + self.value.len() as u64
    }

    /// Serializes the record into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body_image();
        let mut image = Vec::with_capacity(8 + body.len());
        image.extend_from_slice(&u64::from(checksum(&body)).to_be_bytes());
        image.extend_from_slice(&body);
        image
    }

    /// Serializes the record into `out`.
    pub fn encode_into<W: Write>(&self, out: &mut W) -> Result<(), RecordError> {
        out.write_all(&self.encode())?;
        Ok(())
    }

    /// Everything the CRC covers: `key_len | value_len | tombstone | key |
    /// value`.
    fn body_image(&self) -> Vec<u8> {
        let value: &[u8] = if self.tombstone { &[] } else { &self.value };
        let mut body =
            Vec::with_capacity((HEADER_BYTES as usize - 8) + self.key.len() + value.len());
        body.extend_from_slice(&(self.key.len() as i32).to_be_bytes());
        body.extend_from_slice(&(value.len() as i32).to_be_bytes());
        body.push(u8::from(self.tombstone));
        body.extend_from_slice(&self.key);
        body.extend_from_slice(value);
        body
    }

    /// Reads one record from `input`.
    ///
    /// The record's on-disk footprint is its [`disk_size`](Record::disk_size);
    /// callers scanning a file advance by that much on success.
    ///
    /// Zero-length keys decode fine even though the database never writes
    /// them.
    ///
    /// # Errors
    ///
    /// [`RecordError::ShortRead`] if the stream ends inside the record,
    /// [`RecordError::CrcMismatch`] if the stored checksum disagrees with
    /// the payload or a length field is garbage, [`RecordError::Io`] for
    /// any other read failure.
    pub fn decode<R: Read>(input: &mut R) -> Result<Record, RecordError> {
        let crc = input.read_u64::<BigEndian>().map_err(eof_is_short_read)?;
        let raw_key_len = input.read_i32::<BigEndian>().map_err(eof_is_short_read)?;
        let raw_value_len = input.read_i32::<BigEndian>().map_err(eof_is_short_read)?;
        let tombstone = input.read_u8().map_err(eof_is_short_read)?;

        let key_len = checked_len(raw_key_len)?;
        let value_len = checked_len(raw_value_len)?;

        let mut key = vec![0u8; key_len];
        input.read_exact(&mut key).map_err(eof_is_short_read)?;
        let mut value = vec![0u8; value_len];
        input.read_exact(&mut value).map_err(eof_is_short_read)?;

        // Recompute over the exact byte range the encoder covered.
        let mut hasher = Crc32::new();
        hasher.update(&raw_key_len.to_be_bytes());
        hasher.update(&raw_value_len.to_be_bytes());
        hasher.update(&[tombstone]);
        hasher.update(&key);
        hasher.update(&value);
        if u64::from(hasher.finalize()) != crc {
            return Err(RecordError::CrcMismatch);
        }

        Ok(Record {
            key,
            value,
            tombstone: tombstone != 0,
        })
    }
}

/// IEEE CRC-32 over `bytes`. Stored zero-extended in the record's u64 slot.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn eof_is_short_read(e: io::Error) -> RecordError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        RecordError::ShortRead
    } else {
        RecordError::Io(e)
    }
}

/// A negative or over-cap length means the header bytes are garbage;
/// classified with the checksum failures so scans resync over it.
fn checked_len(raw: i32) -> Result<usize, RecordError> {
    if !(0..=MAX_FIELD_BYTES).contains(&raw) {
        return Err(RecordError::CrcMismatch);
    }
    Ok(raw as usize)
}
