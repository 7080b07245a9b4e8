//! The buffer & commit controller and the public store handle.
//!
//! All mutation and every read funnel through one event loop running on a
//! dedicated thread, so the block, the file list, and the registry are only
//! ever touched from a single place and need no locks. The loop drains
//! exactly one event at a time: an add, a query, an introspection request,
//! a timer-driven commit, or shutdown.
//!
//! ```text
//! producers ──add──▶ ┌────────────────────┐ ──commit──▶ FileManager
//! readers  ──query─▶ │  engine event loop │
//! timer    ──tick──▶ └────────────────────┘
//! ```
//!
//! `add` returns as soon as the event is enqueued; `query` blocks the
//! caller on a reply channel because it needs the data before proceeding.

use crate::error::{Result, StoreError};
use crate::files::FileManager;
use crate::filter::FilterDefinition;
use crate::meta::MetaRegistry;
use crate::model::{Measurement, SeriesInfo, Timestamp};
use crate::query::{run_query, QueryResult};
use crate::record::{Block, Record};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default buffered bytes before a size-triggered commit.
pub const DEFAULT_COMMIT_BUFFER_THRESHOLD: usize = 12 * 1024;

/// Default wall-clock period between time-triggered commits.
pub const DEFAULT_COMMIT_INTERVAL: Duration = Duration::from_secs(20);

/// Default size cap per data file (4 MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// Default total on-disk budget (64 MB).
pub const DEFAULT_MAX_DISK_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration for a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding data files and the registry.
    pub data_dir: PathBuf,
    /// Rotation threshold: a new file is started once the newest file
    /// reaches this size.
    pub max_file_size: u64,
    /// Eviction threshold: the oldest file is deleted once the total
    /// on-disk size exceeds this budget.
    pub max_disk_size: u64,
    /// Buffered-but-uncommitted bytes that force an immediate commit.
    pub commit_buffer_threshold: usize,
    /// Wall-clock period for time-triggered commits.
    pub commit_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_disk_size: DEFAULT_MAX_DISK_SIZE,
            commit_buffer_threshold: DEFAULT_COMMIT_BUFFER_THRESHOLD,
            commit_interval: DEFAULT_COMMIT_INTERVAL,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration rooted at `data_dir` with default limits.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the per-file rotation threshold.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Sets the total on-disk budget.
    pub fn with_max_disk_size(mut self, bytes: u64) -> Self {
        self.max_disk_size = bytes;
        self
    }

    /// Sets the buffered-bytes commit threshold.
    pub fn with_commit_buffer_threshold(mut self, bytes: usize) -> Self {
        self.commit_buffer_threshold = bytes;
        self
    }

    /// Sets the time-triggered commit interval.
    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }
}

enum Command {
    Add {
        name: String,
        measurement: Measurement,
    },
    Query {
        from: Timestamp,
        to: Timestamp,
        definition: FilterDefinition,
        reply: Sender<QueryResult>,
    },
    Infos {
        reply: Sender<Vec<SeriesInfo>>,
    },
    Shutdown,
}

/// The single serialization point: owns registry, file list, and block.
struct Engine {
    config: StoreConfig,
    meta: MetaRegistry,
    files: FileManager,
    block: Block,
}

impl Engine {
    fn open(config: StoreConfig) -> Result<Self> {
        let files = FileManager::open(
            &config.data_dir,
            config.max_file_size,
            config.max_disk_size,
        )?;
        let meta = MetaRegistry::load(&config.data_dir)?;
        Ok(Self {
            config,
            meta,
            files,
            block: Block::new(),
        })
    }

    fn handle_add(&mut self, name: &str, measurement: Measurement) {
        let id = match self.meta.get_or_create_id(name, measurement.kind()) {
            Ok(id) => id,
            Err(err @ StoreError::KindMismatch { .. }) => {
                // A name keeps its first kind for its entire lifetime; a
                // later write under another kind is dropped so it cannot
                // corrupt the existing history. Best-effort ingestion,
                // surfaced only to operators.
                warn!(%err, "dropping measurement");
                return;
            }
            Err(err) => {
                error!(name, %err, "registry update failed, dropping measurement");
                return;
            }
        };

        match measurement {
            Measurement::Numerical { ts, value } => self.block.push(Record {
                series_id: id,
                ts,
                value,
            }),
            Measurement::Categorical { ts, value } => match self.meta.intern_value(id, &value) {
                Ok(value_id) => self.block.push(Record {
                    series_id: id,
                    ts,
                    value: value_id as f64,
                }),
                Err(err) => {
                    error!(name, %err, "value interning failed, dropping measurement");
                }
            },
            Measurement::Raw { ts, value } => self.block.push_raw(id, ts, &value),
        }

        if self.block.byte_size() > self.config.commit_buffer_threshold {
            self.commit();
        }
    }

    /// Writes the block to disk and empties it. On failure the buffer is
    /// kept so the data is retried on the next commit trigger.
    fn commit(&mut self) {
        if self.block.is_empty() {
            return;
        }
        match self.files.commit_block(&self.block) {
            Ok(()) => {
                debug!(bytes = self.block.byte_size(), "committed block");
                self.block.clear();
            }
            Err(err) => {
                error!(%err, "commit failed, keeping buffer for next cycle");
            }
        }
    }

    fn run(mut self, commands: Receiver<Command>) {
        let interval = self.config.commit_interval;
        let mut deadline = Instant::now() + interval;
        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match commands.recv_timeout(timeout) {
                Ok(Command::Add { name, measurement }) => self.handle_add(&name, measurement),
                Ok(Command::Query {
                    from,
                    to,
                    definition,
                    reply,
                }) => {
                    let result =
                        run_query(&self.meta, &self.files, &self.block, from, to, &definition);
                    let _ = reply.send(result);
                }
                Ok(Command::Infos { reply }) => {
                    let _ = reply.send(self.meta.infos());
                }
                Ok(Command::Shutdown) => {
                    self.commit();
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.commit();
                    deadline = Instant::now() + interval;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Handle dropped without an explicit shutdown; flush
                    // whatever is buffered before the thread ends.
                    self.commit();
                    break;
                }
            }
        }
    }
}

/// Handle to a running store.
///
/// Cheap to keep around; all operations are forwarded to the engine thread.
/// After [`Store::shutdown`] every call returns [`StoreError::Stopped`].
pub struct Store {
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Store {
    /// Opens the store, spawning its engine thread.
    ///
    /// The registry and the file list are loaded on the calling thread, so
    /// a missing or unreadable data directory fails here rather than later.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let engine = Engine::open(config)?;
        let (commands, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("talus-store".to_string())
            .spawn(move || engine.run(receiver))?;
        Ok(Self {
            commands,
            handle: Some(handle),
        })
    }

    /// Buffers one measurement for `name`.
    ///
    /// Returns once the event is enqueued. A measurement whose kind differs
    /// from the series' registered kind is dropped by the engine, not
    /// surfaced here.
    pub fn add(&self, name: &str, measurement: Measurement) -> Result<()> {
        self.commands
            .send(Command::Add {
                name: name.to_string(),
                measurement,
            })
            .map_err(|_| StoreError::Stopped)
    }

    /// Fire-and-forget ingestion; same contract as [`Store::add`].
    pub fn notify(&self, name: &str, measurement: Measurement) -> Result<()> {
        self.add(name, measurement)
    }

    /// Returns all measurements in `[from, to]` passing the filter, keyed
    /// by series name and ordered chronologically.
    ///
    /// Blocks until the engine thread answers; the result reflects committed
    /// files plus the live buffer as one consistent view.
    pub fn query(
        &self,
        from: Timestamp,
        to: Timestamp,
        definition: &FilterDefinition,
    ) -> Result<QueryResult> {
        let (reply, result) = mpsc::channel();
        self.commands
            .send(Command::Query {
                from,
                to,
                definition: definition.clone(),
                reply,
            })
            .map_err(|_| StoreError::Stopped)?;
        result.recv().map_err(|_| StoreError::Stopped)
    }

    /// Name and kind of every known series.
    pub fn infos(&self) -> Result<Vec<SeriesInfo>> {
        let (reply, result) = mpsc::channel();
        self.commands
            .send(Command::Infos { reply })
            .map_err(|_| StoreError::Stopped)?;
        result.recv().map_err(|_| StoreError::Stopped)
    }

    /// Stops the engine after a final commit, so no buffered data is lost
    /// on a clean stop. Idempotent; later calls on this handle fail with
    /// [`StoreError::Stopped`].
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.shutdown();
    }
}
