//! Fixed-width record codec and the in-memory block.
//!
//! Every measurement is stored as a 24-byte little-endian record. The layout
//! must stay endianness- and width-stable across restarts, since files
//! written by one run are read by later runs.
//!
//! ## Binary Layout
//!
//! ```text
//! Offset  Size    Field
//! ------  ----    -----
//! 0x00    8       series_id (i64 LE)
//! 0x08    8       ts (i64 LE, milliseconds)
//! 0x10    8       value (f64 LE)
//! ```
//!
//! For numerical records `value` holds the sample. For categorical records
//! it holds the interned value id. For raw records it holds the byte offset
//! of the payload entry in the raw sidecar: arena-relative while buffered,
//! rebased to the file-absolute offset at commit time.
//!
//! Raw payload entries are variable-width and therefore live outside the
//! record stream, each as `[len: u32 LE][crc32: u32 LE][bytes]`.

use crate::error::{Result, StoreError};
use crate::model::{SeriesId, Timestamp};
use tracing::warn;

/// Encoded size of one record in bytes.
pub const RECORD_SIZE: usize = 24;

/// Size of the raw payload entry header (length + CRC32).
pub const RAW_HEADER_SIZE: usize = 8;

/// The fixed-width encoding of one measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    /// Registry id of the series this record belongs to.
    pub series_id: SeriesId,
    /// Timestamp in milliseconds.
    pub ts: Timestamp,
    /// Sample value, interned value id, or raw payload offset.
    pub value: f64,
}

impl Record {
    /// Appends the encoded record to `buf`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.series_id.to_le_bytes());
        buf.extend_from_slice(&self.ts.to_le_bytes());
        buf.extend_from_slice(&self.value.to_le_bytes());
    }

    /// Decodes one record from an exact 24-byte frame.
    pub fn decode(frame: &[u8; RECORD_SIZE]) -> Self {
        let series_id = i64::from_le_bytes(frame[0..8].try_into().unwrap());
        let ts = i64::from_le_bytes(frame[8..16].try_into().unwrap());
        let value = f64::from_le_bytes(frame[16..24].try_into().unwrap());
        Self {
            series_id,
            ts,
            value,
        }
    }
}

/// Decodes a concatenation of fixed-width records.
///
/// A short trailing fragment (for example after a crash mid-append) is
/// skipped rather than failing the whole buffer.
pub fn decode_records(bytes: &[u8]) -> Vec<Record> {
    let mut records = Vec::with_capacity(bytes.len() / RECORD_SIZE);
    let mut chunks = bytes.chunks_exact(RECORD_SIZE);
    for chunk in &mut chunks {
        let frame: &[u8; RECORD_SIZE] = chunk.try_into().unwrap();
        records.push(Record::decode(frame));
    }
    if !chunks.remainder().is_empty() {
        warn!(
            trailing = chunks.remainder().len(),
            "skipping undecodable trailing bytes"
        );
    }
    records
}

/// Encodes a raw payload entry (`len + crc32 + bytes`) into `buf`.
pub fn encode_raw_entry(buf: &mut Vec<u8>, payload: &[u8]) {
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf.extend_from_slice(payload);
}

/// Decodes the raw payload entry starting at `offset` in `bytes`.
///
/// Verifies the entry CRC; a mismatch or an out-of-bounds offset is an
/// error, and the caller skips the record.
pub fn decode_raw_entry(bytes: &[u8], offset: usize) -> Result<Vec<u8>> {
    let oob = || StoreError::RawOutOfBounds {
        offset,
        len: bytes.len(),
    };
    let header_end = offset
        .checked_add(RAW_HEADER_SIZE)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(oob)?;
    let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
    let expected = u32::from_le_bytes(bytes[offset + 4..header_end].try_into().unwrap());
    let end = header_end
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(oob)?;
    let payload = &bytes[header_end..end];
    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Err(StoreError::ChecksumMismatch { expected, actual });
    }
    Ok(payload.to_vec())
}

/// An ordered batch of records not yet committed to a file.
///
/// Raw payloads are staged in an arena; their records carry arena-relative
/// offsets until the commit rebases them against the target sidecar.
#[derive(Debug, Default)]
pub struct Block {
    records: Vec<Record>,
    arena: Vec<u8>,
    raw_indices: Vec<usize>,
}

impl Block {
    /// Creates an empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a numerical or categorical record.
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Appends a raw record, staging its payload in the arena.
    ///
    /// The record's value field is set to the arena offset of the entry.
    pub fn push_raw(&mut self, series_id: SeriesId, ts: Timestamp, payload: &[u8]) {
        let offset = self.arena.len();
        encode_raw_entry(&mut self.arena, payload);
        self.raw_indices.push(self.records.len());
        self.records.push(Record {
            series_id,
            ts,
            value: offset as f64,
        });
    }

    /// Buffered size in bytes, the commit-threshold unit.
    pub fn byte_size(&self) -> usize {
        self.records.len() * RECORD_SIZE + self.arena.len()
    }

    /// Returns true if no records are buffered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The buffered records in insertion order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// The staged raw payload arena.
    pub fn arena(&self) -> &[u8] {
        &self.arena
    }

    /// Encodes all records with raw offsets rebased by `raw_base` bytes.
    ///
    /// `raw_base` is the current length of the sidecar the arena will be
    /// appended to, so committed records carry file-absolute offsets.
    pub fn encode_records(&self, raw_base: u64) -> Vec<u8> {
        let mut rebased = self.records.clone();
        for &i in &self.raw_indices {
            rebased[i].value += raw_base as f64;
        }
        let mut buf = Vec::with_capacity(rebased.len() * RECORD_SIZE);
        for record in &rebased {
            record.encode_to(&mut buf);
        }
        buf
    }

    /// Drops all buffered records and payloads.
    pub fn clear(&mut self) {
        self.records.clear();
        self.arena.clear();
        self.raw_indices.clear();
    }
}
