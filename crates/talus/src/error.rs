//! Error and Result types for store operations.

use crate::model::MeasurementKind;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A series name was reused with a measurement of a different kind.
    #[error("kind mismatch for series {name:?}: registered as {registered:?}, got {offered:?}")]
    KindMismatch {
        /// Name of the series.
        name: String,
        /// Kind the series was first registered with.
        registered: MeasurementKind,
        /// Kind of the rejected measurement.
        offered: MeasurementKind,
    },

    /// The data directory could not be created or accessed at startup.
    #[error("cannot initialize data directory {path}: {source}")]
    DirectoryInit {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A record references a registry id that cannot be resolved.
    #[error("unknown series id: {0}")]
    UnknownId(i64),

    /// A raw record points outside its payload sidecar.
    #[error("raw payload offset {offset} out of bounds (sidecar is {len} bytes)")]
    RawOutOfBounds {
        /// Offset the record carried.
        offset: usize,
        /// Size of the sidecar that was read.
        len: usize,
    },

    /// A raw payload entry failed its CRC32 check.
    #[error("raw payload checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected CRC32 checksum.
        expected: u32,
        /// Actual computed CRC32 checksum.
        actual: u32,
    },

    /// The metadata file could not be parsed.
    #[error("corrupt metadata file: {0}")]
    CorruptMeta(String),

    /// The store has shut down and no longer accepts calls.
    #[error("store is stopped")]
    Stopped,

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
