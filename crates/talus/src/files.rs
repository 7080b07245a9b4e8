//! On-disk block file management: listing, append, rotation, eviction.
//!
//! Data files are named by their creation time in milliseconds, zero-padded
//! so lexical order equals temporal order:
//!
//! ```text
//! data/
//!   00000001700000000000.blk   fixed-width record stream
//!   00000001700000000000.raw   payload sidecar (only for raw series)
//!   00000001700000123456.blk
//!   meta.json
//! ```
//!
//! Files are append-until-rotated and otherwise immutable. Eviction removes
//! whole files oldest-first, never truncates, so a file is either fully
//! present or fully absent after a crash.

use crate::error::{Result, StoreError};
use crate::model::Timestamp;
use crate::record::{decode_records, Block, Record};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Extension of record stream files.
pub const BLOCK_EXTENSION: &str = "blk";

/// Extension of raw payload sidecar files.
pub const RAW_EXTENSION: &str = "raw";

/// Descriptor of one committed data file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    /// Creation time in milliseconds, also the file name stem.
    pub created: i64,
    /// Size of the record stream in bytes.
    pub block_bytes: u64,
    /// Size of the payload sidecar in bytes.
    pub raw_bytes: u64,
    /// Smallest record timestamp in the file.
    pub oldest_ts: Timestamp,
    /// Largest record timestamp in the file.
    pub latest_ts: Timestamp,
}

impl FileMeta {
    /// Returns true if `[oldest_ts, latest_ts]` intersects `[from, to]`.
    pub fn overlaps(&self, from: Timestamp, to: Timestamp) -> bool {
        self.oldest_ts <= to && self.latest_ts >= from
    }
}

/// Lists, appends to, rotates, and evicts the data files of one directory.
///
/// The manager assumes it is the sole owner of the directory. The file list
/// is kept in memory sorted oldest to newest and rebuilt once at startup.
#[derive(Debug)]
pub struct FileManager {
    dir: PathBuf,
    files: Vec<FileMeta>,
    max_file_size: u64,
    max_disk_size: u64,
}

impl FileManager {
    /// Opens `dir`, creating it if needed, and scans existing data files.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DirectoryInit` if the directory cannot be
    /// created or read. Nothing can function without it.
    pub fn open(dir: &Path, max_file_size: u64, max_disk_size: u64) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|source| StoreError::DirectoryInit {
            path: dir.display().to_string(),
            source,
        })?;

        let mut manager = Self {
            dir: dir.to_path_buf(),
            files: Vec::new(),
            max_file_size,
            max_disk_size,
        };
        manager.scan()?;
        Ok(manager)
    }

    fn scan(&mut self) -> Result<()> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::DirectoryInit {
            path: self.dir.display().to_string(),
            source,
        })?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(BLOCK_EXTENSION) {
                continue;
            }
            let Some(created) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<i64>().ok())
            else {
                warn!(path = %path.display(), "ignoring unrecognized file in data directory");
                continue;
            };

            let bytes = fs::read(&path)?;
            let records = decode_records(&bytes);
            let (oldest_ts, latest_ts) = timestamp_bounds(&records);
            let raw_bytes = fs::metadata(self.raw_path(created))
                .map(|meta| meta.len())
                .unwrap_or(0);

            self.files.push(FileMeta {
                created,
                block_bytes: bytes.len() as u64,
                raw_bytes,
                oldest_ts,
                latest_ts,
            });
        }

        self.files.sort_by_key(|meta| meta.created);
        debug!(files = self.files.len(), dir = %self.dir.display(), "scanned data directory");
        Ok(())
    }

    /// All known files, oldest to newest.
    pub fn list(&self) -> &[FileMeta] {
        &self.files
    }

    /// Total on-disk size in bytes, record streams plus sidecars.
    pub fn total_size(&self) -> u64 {
        self.files
            .iter()
            .map(|meta| meta.block_bytes + meta.raw_bytes)
            .sum()
    }

    /// Files whose timestamp span intersects `[from, to]`, oldest to newest.
    pub fn files_overlapping(&self, from: Timestamp, to: Timestamp) -> Vec<FileMeta> {
        self.files
            .iter()
            .filter(|meta| meta.overlaps(from, to))
            .cloned()
            .collect()
    }

    /// Writes a block to disk, appending or rotating, then enforces the
    /// disk budget.
    ///
    /// The block is appended to the newest file while that file is below
    /// `max_file_size`; otherwise a new file is created. If the total size
    /// afterwards exceeds `max_disk_size`, the single oldest file is
    /// deleted. One eviction per commit is enough: files are bounded in
    /// size, so the budget cannot jump arbitrarily far in one step.
    ///
    /// On failure any partial append is rolled back and the file list is
    /// unchanged, so committing the same block again does not duplicate
    /// records.
    pub fn commit_block(&mut self, block: &Block) -> Result<()> {
        if block.is_empty() {
            return Ok(());
        }

        let append = self
            .files
            .last()
            .is_some_and(|meta| meta.block_bytes < self.max_file_size);
        if !append {
            let created = self.next_created();
            self.files.push(FileMeta {
                created,
                block_bytes: 0,
                raw_bytes: 0,
                oldest_ts: Timestamp::MAX,
                latest_ts: Timestamp::MIN,
            });
        }

        let target = self.files.last().expect("target file exists");
        let created = target.created;
        let block_base = target.block_bytes;
        let raw_base = target.raw_bytes;
        let records = block.encode_records(raw_base);

        let block_path = self.block_path(created);
        let raw_path = self.raw_path(created);
        let written = append_file(&block_path, &records).and_then(|()| {
            if block.arena().is_empty() {
                Ok(())
            } else {
                append_file(&raw_path, block.arena())
            }
        });
        if let Err(err) = written {
            // The engine keeps the buffer on failure and retries the whole
            // block, so anything half-appended must go before returning.
            truncate_to(&block_path, block_base);
            truncate_to(&raw_path, raw_base);
            if !append {
                self.files.pop();
            }
            return Err(err);
        }

        let (block_oldest, block_latest) = timestamp_bounds(block.records());
        let target = self.files.last_mut().expect("target file exists");
        target.block_bytes += records.len() as u64;
        target.raw_bytes += block.arena().len() as u64;
        target.oldest_ts = target.oldest_ts.min(block_oldest);
        target.latest_ts = target.latest_ts.max(block_latest);

        if self.total_size() > self.max_disk_size && self.files.len() > 1 {
            self.evict_oldest()?;
        }
        Ok(())
    }

    /// Reads one file back as decoded records plus its sidecar bytes.
    pub fn read_block(&self, meta: &FileMeta) -> Result<(Vec<Record>, Vec<u8>)> {
        let bytes = fs::read(self.block_path(meta.created))?;
        let raw = match fs::read(self.raw_path(meta.created)) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok((decode_records(&bytes), raw))
    }

    fn evict_oldest(&mut self) -> Result<()> {
        let oldest = self.files.remove(0);
        warn!(
            created = oldest.created,
            total = self.total_size(),
            budget = self.max_disk_size,
            "disk budget exceeded, evicting oldest file"
        );
        fs::remove_file(self.block_path(oldest.created))?;
        match fs::remove_file(self.raw_path(oldest.created)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Picks a creation stamp that sorts strictly after every existing file,
    /// even when two rotations land in the same millisecond.
    fn next_created(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);
        match self.files.last() {
            Some(meta) => now.max(meta.created + 1),
            None => now,
        }
    }

    fn block_path(&self, created: i64) -> PathBuf {
        self.dir
            .join(format!("{:020}.{}", created, BLOCK_EXTENSION))
    }

    fn raw_path(&self, created: i64) -> PathBuf {
        self.dir.join(format!("{:020}.{}", created, RAW_EXTENSION))
    }
}

fn timestamp_bounds(records: &[Record]) -> (Timestamp, Timestamp) {
    let mut oldest = Timestamp::MAX;
    let mut latest = Timestamp::MIN;
    for record in records {
        oldest = oldest.min(record.ts);
        latest = latest.max(record.ts);
    }
    (oldest, latest)
}

fn append_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Rolls a file back to `len` bytes after a partial append. Best effort: a
/// leftover partial write is also repaired by the startup rescan.
fn truncate_to(path: &Path, len: u64) {
    let result = OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(len));
    if let Err(err) = result {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), %err, "could not roll back partial append");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RECORD_SIZE;
    use tempfile::TempDir;

    fn block_of(entries: &[(i64, i64, f64)]) -> Block {
        let mut block = Block::new();
        for &(series_id, ts, value) in entries {
            block.push(Record {
                series_id,
                ts,
                value,
            });
        }
        block
    }

    #[test]
    fn test_append_below_threshold() {
        let dir = TempDir::new().unwrap();
        let mut files = FileManager::open(dir.path(), 1024, 1 << 20).unwrap();

        files
            .commit_block(&block_of(&[(1, 1000, 1.0), (1, 1010, 2.0)]))
            .unwrap();
        files.commit_block(&block_of(&[(1, 1020, 3.0)])).unwrap();

        assert_eq!(files.list().len(), 1);
        let meta = &files.list()[0];
        assert_eq!(meta.block_bytes, 3 * RECORD_SIZE as u64);
        assert_eq!(meta.oldest_ts, 1000);
        assert_eq!(meta.latest_ts, 1020);
    }

    #[test]
    fn test_rotation_at_threshold() {
        let dir = TempDir::new().unwrap();
        // A single record fills the file, so every commit rotates.
        let mut files = FileManager::open(dir.path(), RECORD_SIZE as u64, 1 << 20).unwrap();

        files.commit_block(&block_of(&[(1, 1000, 1.0)])).unwrap();
        files.commit_block(&block_of(&[(1, 1010, 2.0)])).unwrap();

        assert_eq!(files.list().len(), 2);
        assert!(files.list()[0].created < files.list()[1].created);
    }

    #[test]
    fn test_eviction_removes_single_oldest() {
        let dir = TempDir::new().unwrap();
        let budget = 2 * RECORD_SIZE as u64;
        let mut files = FileManager::open(dir.path(), RECORD_SIZE as u64, budget).unwrap();

        files.commit_block(&block_of(&[(1, 1000, 1.0)])).unwrap();
        files.commit_block(&block_of(&[(1, 1010, 2.0)])).unwrap();
        assert_eq!(files.list().len(), 2);
        assert_eq!(files.total_size(), budget);

        // Third commit pushes past the budget; exactly the oldest goes.
        files.commit_block(&block_of(&[(1, 1020, 3.0)])).unwrap();
        assert_eq!(files.list().len(), 2);
        assert_eq!(files.total_size(), budget);
        assert_eq!(files.list()[0].oldest_ts, 1010);
        assert_eq!(files.list()[1].oldest_ts, 1020);
    }

    #[test]
    fn test_files_overlapping() {
        let dir = TempDir::new().unwrap();
        let mut files = FileManager::open(dir.path(), RECORD_SIZE as u64, 1 << 20).unwrap();

        files.commit_block(&block_of(&[(1, 1000, 1.0)])).unwrap();
        files.commit_block(&block_of(&[(1, 2000, 2.0)])).unwrap();
        files.commit_block(&block_of(&[(1, 3000, 3.0)])).unwrap();

        assert_eq!(files.files_overlapping(1500, 2500).len(), 1);
        assert_eq!(files.files_overlapping(0, 5000).len(), 3);
        assert_eq!(files.files_overlapping(3001, 5000).len(), 0);
        assert_eq!(files.files_overlapping(2000, 2000).len(), 1);
    }

    #[test]
    fn test_rescan_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut files = FileManager::open(dir.path(), 1024, 1 << 20).unwrap();
            files
                .commit_block(&block_of(&[(1, 1000, 1.0), (2, 1500, 2.0)]))
                .unwrap();
        }

        let files = FileManager::open(dir.path(), 1024, 1 << 20).unwrap();
        assert_eq!(files.list().len(), 1);
        let meta = &files.list()[0];
        assert_eq!(meta.oldest_ts, 1000);
        assert_eq!(meta.latest_ts, 1500);
        let (records, raw) = files.read_block(meta).unwrap();
        assert_eq!(records.len(), 2);
        assert!(raw.is_empty());
    }

    #[test]
    fn test_raw_sidecar_rebased_across_appends() {
        let dir = TempDir::new().unwrap();
        let mut files = FileManager::open(dir.path(), 1 << 20, 1 << 20).unwrap();

        let mut first = Block::new();
        first.push_raw(1, 1000, b"alpha");
        files.commit_block(&first).unwrap();

        let mut second = Block::new();
        second.push_raw(1, 1010, b"beta");
        files.commit_block(&second).unwrap();

        let meta = files.list()[0].clone();
        let (records, raw) = files.read_block(&meta).unwrap();
        assert_eq!(records.len(), 2);
        let payloads: Vec<Vec<u8>> = records
            .iter()
            .map(|record| crate::record::decode_raw_entry(&raw, record.value as usize).unwrap())
            .collect();
        assert_eq!(payloads, vec![b"alpha".to_vec(), b"beta".to_vec()]);
    }

    #[test]
    fn test_failed_commit_rolls_back_partial_append() {
        let dir = TempDir::new().unwrap();
        let mut files = FileManager::open(dir.path(), 1 << 20, 1 << 20).unwrap();

        files
            .commit_block(&block_of(&[(1, 1000, 1.0), (1, 1010, 2.0)]))
            .unwrap();
        let created = files.list()[0].created;

        // Occupy the sidecar path so the commit fails after the record
        // stream has already been appended.
        let raw_path = dir.path().join(format!("{:020}.{}", created, RAW_EXTENSION));
        std::fs::create_dir(&raw_path).unwrap();

        let mut block = Block::new();
        block.push_raw(2, 1020, b"frame");
        assert!(files.commit_block(&block).is_err());

        assert_eq!(files.list()[0].block_bytes, 2 * RECORD_SIZE as u64);
        let block_path = dir
            .path()
            .join(format!("{:020}.{}", created, BLOCK_EXTENSION));
        assert_eq!(
            std::fs::metadata(&block_path).unwrap().len(),
            2 * RECORD_SIZE as u64
        );

        // The retried commit lands exactly once.
        std::fs::remove_dir(&raw_path).unwrap();
        files.commit_block(&block).unwrap();
        let (records, raw) = files.read_block(&files.list()[0]).unwrap();
        let timestamps: Vec<i64> = records.iter().map(|record| record.ts).collect();
        assert_eq!(timestamps, vec![1000, 1010, 1020]);
        assert_eq!(
            crate::record::decode_raw_entry(&raw, records[2].value as usize).unwrap(),
            b"frame"
        );
    }

    #[test]
    fn test_empty_block_commit_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut files = FileManager::open(dir.path(), 1024, 1 << 20).unwrap();
        files.commit_block(&Block::new()).unwrap();
        assert!(files.list().is_empty());
        assert_eq!(files.total_size(), 0);
    }
}
