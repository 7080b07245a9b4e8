//! Name and categorical-value registry, persisted write-through.
//!
//! Losing the id mapping makes every on-disk record unreadable, so the
//! registry rewrites its metadata file on each new id or new categorical
//! value, not in batches. The file is replaced atomically via a temp file
//! and rename.

use crate::error::{Result, StoreError};
use crate::model::{MeasurementKind, SeriesId, SeriesInfo, ValueId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the registry inside the data directory.
pub const META_FILE_NAME: &str = "meta.json";

#[derive(Debug, Serialize, Deserialize)]
struct SeriesEntry {
    id: SeriesId,
    name: String,
    kind: MeasurementKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    values: BTreeMap<ValueId, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetaFile {
    next_id: SeriesId,
    series: Vec<SeriesEntry>,
}

#[derive(Debug)]
struct ValueMap {
    to_id: HashMap<String, ValueId>,
    to_value: HashMap<ValueId, String>,
    next_value_id: ValueId,
}

impl ValueMap {
    fn new() -> Self {
        Self {
            to_id: HashMap::new(),
            to_value: HashMap::new(),
            next_value_id: 1,
        }
    }
}

/// The registry mapping series names to ids and interning categorical values.
///
/// Ids, once assigned, never change and are never reused for another name.
/// Categorical value maps are per-series; two series interning the same
/// string may receive different value ids.
#[derive(Debug)]
pub struct MetaRegistry {
    path: PathBuf,
    next_id: SeriesId,
    ids: HashMap<String, SeriesId>,
    names: HashMap<SeriesId, String>,
    kinds: HashMap<SeriesId, MeasurementKind>,
    values: HashMap<SeriesId, ValueMap>,
}

impl MetaRegistry {
    /// Loads the registry from `dir`, starting empty if no file exists.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(META_FILE_NAME);
        let mut registry = Self {
            path,
            next_id: 1,
            ids: HashMap::new(),
            names: HashMap::new(),
            kinds: HashMap::new(),
            values: HashMap::new(),
        };

        let bytes = match fs::read(&registry.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(registry),
            Err(err) => return Err(err.into()),
        };
        let file: MetaFile = serde_json::from_slice(&bytes)
            .map_err(|err| StoreError::CorruptMeta(err.to_string()))?;

        registry.next_id = file.next_id.max(1);
        for entry in file.series {
            registry.ids.insert(entry.name.clone(), entry.id);
            registry.names.insert(entry.id, entry.name);
            registry.kinds.insert(entry.id, entry.kind);
            registry.next_id = registry.next_id.max(entry.id + 1);
            if !entry.values.is_empty() {
                let mut map = ValueMap::new();
                for (value_id, value) in entry.values {
                    map.next_value_id = map.next_value_id.max(value_id + 1);
                    map.to_id.insert(value.clone(), value_id);
                    map.to_value.insert(value_id, value);
                }
                registry.values.insert(entry.id, map);
            }
        }
        debug!(series = registry.ids.len(), "loaded registry");
        Ok(registry)
    }

    /// Returns the id for `name`, allocating one if the name is unknown.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KindMismatch` if `name` is already bound to a
    /// different kind. The existing mapping is left untouched. A failed
    /// persist rolls the allocation back, so the registry never serves an
    /// id that is missing from disk.
    pub fn get_or_create_id(&mut self, name: &str, kind: MeasurementKind) -> Result<SeriesId> {
        if let Some(&id) = self.ids.get(name) {
            let registered = self.kinds[&id];
            if registered != kind {
                return Err(StoreError::KindMismatch {
                    name: name.to_string(),
                    registered,
                    offered: kind,
                });
            }
            return Ok(id);
        }

        let id = self.next_id;
        self.next_id = id + 1;
        self.ids.insert(name.to_string(), id);
        self.names.insert(id, name.to_string());
        self.kinds.insert(id, kind);
        if let Err(err) = self.persist() {
            // Never serve an id that is not on disk; records written under
            // it would be unresolvable after a restart.
            self.ids.remove(name);
            self.names.remove(&id);
            self.kinds.remove(&id);
            self.next_id = id;
            return Err(err);
        }
        Ok(id)
    }

    /// Interns `value` for series `id`, creating the mapping on first sight.
    /// As with ids, a mapping that fails to persist is rolled back.
    pub fn intern_value(&mut self, id: SeriesId, value: &str) -> Result<ValueId> {
        let map = self.values.entry(id).or_insert_with(ValueMap::new);
        if let Some(&value_id) = map.to_id.get(value) {
            return Ok(value_id);
        }
        let value_id = map.next_value_id;
        map.next_value_id = value_id + 1;
        map.to_id.insert(value.to_string(), value_id);
        map.to_value.insert(value_id, value.to_string());
        if let Err(err) = self.persist() {
            if let Some(map) = self.values.get_mut(&id) {
                map.to_id.remove(value);
                map.to_value.remove(&value_id);
                map.next_value_id = value_id;
            }
            return Err(err);
        }
        Ok(value_id)
    }

    /// Looks up the name for `id`. Stale ids yield `None`.
    pub fn resolve_name(&self, id: SeriesId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Looks up the kind for `id`. Stale ids yield `None`.
    pub fn resolve_kind(&self, id: SeriesId) -> Option<MeasurementKind> {
        self.kinds.get(&id).copied()
    }

    /// Resolves a categorical value id back to its string.
    pub fn resolve_value(&self, id: SeriesId, value_id: ValueId) -> Option<&str> {
        self.values
            .get(&id)?
            .to_value
            .get(&value_id)
            .map(String::as_str)
    }

    /// Name and kind of every known series.
    pub fn infos(&self) -> Vec<SeriesInfo> {
        let mut infos: Vec<SeriesInfo> = self
            .ids
            .iter()
            .map(|(name, id)| SeriesInfo {
                name: name.clone(),
                kind: self.kinds[id],
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    fn persist(&self) -> Result<()> {
        let mut series: Vec<SeriesEntry> = self
            .names
            .iter()
            .map(|(&id, name)| SeriesEntry {
                id,
                name: name.clone(),
                kind: self.kinds[&id],
                values: self
                    .values
                    .get(&id)
                    .map(|map| {
                        map.to_value
                            .iter()
                            .map(|(&value_id, value)| (value_id, value.clone()))
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();
        series.sort_by_key(|entry| entry.id);

        let file = MetaFile {
            next_id: self.next_id,
            series,
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|err| StoreError::CorruptMeta(err.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
