//! Talus - embedded measurement-history storage engine.
//!
//! Talus accepts a continuous stream of named measurements (numeric,
//! categorical, or opaque raw bytes), buffers them in memory, periodically
//! flushes them to append-oriented files, enforces a total on-disk budget by
//! evicting the oldest file, and answers time-range queries that merge
//! committed files with the live buffer.
//!
//! # Components
//!
//! - [`MetaRegistry`]: name↔id mapping and categorical value interning
//! - [`FileManager`]: append, rotation, and oldest-first eviction of data files
//! - [`Store`]: the single-threaded buffer & commit controller and public API
//!
//! # Example
//!
//! ```rust,ignore
//! use talus::{Measurement, Store, StoreConfig, FilterDefinition};
//!
//! let store = Store::open(StoreConfig::new("data"))?;
//! store.add("cpu", Measurement::Numerical { ts: now_ms, value: 0.75 })?;
//!
//! let result = store.query(now_ms - 60_000, now_ms, &FilterDefinition::default())?;
//! for (name, measurements) in &result {
//!     println!("{name}: {} measurements", measurements.len());
//! }
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod files;
pub mod filter;
pub mod meta;
pub mod model;
mod query;
pub mod record;
pub mod store;

pub use error::{Result, StoreError};
pub use files::{FileManager, FileMeta};
pub use filter::{FilterCollection, FilterDefinition};
pub use meta::MetaRegistry;
pub use model::{Measurement, MeasurementKind, SeriesId, SeriesInfo, Timestamp, ValueId};
pub use query::QueryResult;
pub use record::{Block, Record, RECORD_SIZE};
pub use store::{Store, StoreConfig};
