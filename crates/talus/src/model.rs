//! Measurement kinds and typed measurements.
//!
//! A series is a named, typed stream of measurements over time. The kind a
//! name is first seen with is permanent; the registry rejects writes of any
//! other kind under the same name.

use serde::{Deserialize, Serialize};

/// Timestamp in milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Compact numeric identifier for a series, assigned once and never reused.
pub type SeriesId = i64;

/// Interned identifier for a categorical value, scoped to one series.
pub type ValueId = i64;

/// The kind of measurement a series carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementKind {
    /// Floating-point samples.
    Numerical,
    /// String samples, interned to value ids for storage.
    Categorical,
    /// Opaque byte payloads.
    Raw,
}

impl MeasurementKind {
    /// Stable on-disk tag for this kind.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Numerical => 1,
            Self::Categorical => 2,
            Self::Raw => 3,
        }
    }

    /// Decodes a kind from its on-disk tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Numerical),
            2 => Some(Self::Categorical),
            3 => Some(Self::Raw),
            _ => None,
        }
    }
}

/// One typed measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    /// A floating-point sample.
    Numerical {
        /// Timestamp in milliseconds.
        ts: Timestamp,
        /// Sample value.
        value: f64,
    },
    /// A string sample.
    Categorical {
        /// Timestamp in milliseconds.
        ts: Timestamp,
        /// Sample value.
        value: String,
    },
    /// An opaque byte payload.
    Raw {
        /// Timestamp in milliseconds.
        ts: Timestamp,
        /// Payload bytes.
        value: Vec<u8>,
    },
}

impl Measurement {
    /// Returns the timestamp of the measurement.
    pub fn ts(&self) -> Timestamp {
        match self {
            Self::Numerical { ts, .. } | Self::Categorical { ts, .. } | Self::Raw { ts, .. } => *ts,
        }
    }

    /// Returns the kind of the measurement.
    pub fn kind(&self) -> MeasurementKind {
        match self {
            Self::Numerical { .. } => MeasurementKind::Numerical,
            Self::Categorical { .. } => MeasurementKind::Categorical,
            Self::Raw { .. } => MeasurementKind::Raw,
        }
    }
}

/// Name and kind of a known series, for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesInfo {
    /// Human-readable series name.
    pub name: String,
    /// Kind the series is bound to.
    pub kind: MeasurementKind,
}
