//! Static day-of-year table
//!
//! Loaded once at startup from a JSON object mapping `"1"`..`"365"` to entries.
//! A failed load is kept as an explicit `Unloaded` state rather than an empty
//! table, and `reload()` lets an operator recover without a restart.

use crate::error::{DayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};

/// One day's entry. Fields beyond name/color/types (e.g. image URLs) are
/// passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayEntry {
    pub name: String,
    pub color: String,
    pub types: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub type DayTable = HashMap<String, DayEntry>;

#[derive(Debug, Clone, PartialEq)]
pub enum DatasetState {
    Unloaded { reason: String },
    Loaded(DayTable),
}

/// Process-wide dataset handle
#[derive(Debug)]
pub struct Dataset {
    path: PathBuf,
    state: RwLock<DatasetState>,
}

/// Read and validate the table file. An empty table counts as a failure.
pub fn read_table(path: &Path) -> Result<DayTable> {
    let load_err = |reason: String| DayError::Load {
        path: path.display().to_string(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
    let table: DayTable = serde_json::from_str(&content).map_err(|e| load_err(e.to_string()))?;
    if table.is_empty() {
        return Err(load_err("file contains no entries".to_string()));
    }
    Ok(table)
}

impl Dataset {
    /// Load the dataset; failures leave it `Unloaded` instead of erroring
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = match read_table(&path) {
            Ok(table) => {
                log::info!(
                    "Successfully loaded {} entries from '{}'",
                    table.len(),
                    path.display()
                );
                DatasetState::Loaded(table)
            }
            Err(e) => {
                log::error!("{}", e);
                log::error!("Serving 503 until the dataset is reloaded");
                DatasetState::Unloaded {
                    reason: e.to_string(),
                }
            }
        };
        Self {
            path,
            state: RwLock::new(state),
        }
    }

    /// Build a loaded dataset directly from entries
    pub fn from_table(path: impl AsRef<Path>, table: DayTable) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: RwLock::new(DatasetState::Loaded(table)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_state(&self) -> RwLockReadGuard<'_, DatasetState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.read_state(), DatasetState::Loaded(_))
    }

    /// Number of entries, 0 when unloaded
    pub fn len(&self) -> usize {
        match &*self.read_state() {
            DatasetState::Loaded(table) => table.len(),
            DatasetState::Unloaded { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-read the file. On failure a previously loaded table stays in
    /// service; an unloaded dataset stays unloaded.
    pub fn reload(&self) -> Result<usize> {
        match read_table(&self.path) {
            Ok(table) => {
                let count = table.len();
                *self.state.write().unwrap_or_else(|e| e.into_inner()) =
                    DatasetState::Loaded(table);
                log::info!("Reloaded {} entries from '{}'", count, self.path.display());
                Ok(count)
            }
            Err(e) => {
                log::error!("Reload failed: {}", e);
                if let DatasetState::Unloaded { reason } =
                    &mut *self.state.write().unwrap_or_else(|e| e.into_inner())
                {
                    *reason = e.to_string();
                }
                Err(e)
            }
        }
    }

    fn unavailable(&self) -> DayError {
        DayError::ServiceUnavailable {
            path: self.path.display().to_string(),
        }
    }

    /// Whether a loaded table has `key`. Unloaded datasets report unavailable.
    pub fn contains(&self, key: &str) -> Result<bool> {
        match &*self.read_state() {
            DatasetState::Loaded(table) => Ok(table.contains_key(key)),
            DatasetState::Unloaded { .. } => Err(self.unavailable()),
        }
    }

    pub fn lookup(&self, key: &str) -> Result<DayEntry> {
        match &*self.read_state() {
            DatasetState::Loaded(table) => table
                .get(key)
                .cloned()
                .ok_or_else(|| DayError::NotFound(key.to_string())),
            DatasetState::Unloaded { .. } => Err(self.unavailable()),
        }
    }
}
