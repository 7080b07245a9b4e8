//! Declarative per-series filters applied during range queries.

use crate::model::{Measurement, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Externally supplied filter configuration.
///
/// An empty definition passes everything. `granularity` thins each series to
/// at most one measurement per window, keeping the first one encountered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefinition {
    /// Series names to include; empty means all series.
    #[serde(default)]
    pub names: Vec<String>,
    /// Minimum spacing in milliseconds between accepted measurements of the
    /// same series.
    #[serde(default)]
    pub granularity: Option<i64>,
}

/// Stateful evaluator for one query, built from a [`FilterDefinition`].
#[derive(Debug)]
pub struct FilterCollection {
    names: Option<HashSet<String>>,
    granularity: Option<i64>,
    last_accepted: HashMap<String, Timestamp>,
}

impl FilterCollection {
    /// Builds the evaluator. State (granularity bookkeeping) is per query.
    pub fn new(definition: &FilterDefinition) -> Self {
        let names = if definition.names.is_empty() {
            None
        } else {
            Some(definition.names.iter().cloned().collect())
        };
        Self {
            names,
            granularity: definition.granularity.filter(|&g| g > 0),
            last_accepted: HashMap::new(),
        }
    }

    /// Returns true if the measurement should appear in the result.
    pub fn passes(&mut self, name: &str, measurement: &Measurement) -> bool {
        if let Some(names) = &self.names {
            if !names.contains(name) {
                return false;
            }
        }
        if let Some(granularity) = self.granularity {
            let ts = measurement.ts();
            if let Some(&last) = self.last_accepted.get(name) {
                if ts - last < granularity {
                    return false;
                }
            }
            self.last_accepted.insert(name.to_string(), ts);
        }
        true
    }
}
