//! Per-asset session records.
//!
//! A session record is the serializable form of the Layer Manager: both
//! sides' layers, selection/opacity/mask tables, the active side and the
//! show-original flag. Records are keyed by asset id and kept by a
//! [`SessionStore`]; the file-backed store writes one JSON document per
//! asset.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::ErrorCode;
use crate::geometry::Bounds;
use crate::layers::{LayerId, LayerType, Selection, Side};

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session record malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid asset id: {0:?}")]
    InvalidAssetId(String),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_SESSION_IO",
            Self::Json(_) => "E_SESSION_JSON",
            Self::InvalidAssetId(_) => "E_SESSION_ASSET_ID",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

// =============================================================================
// RECORDS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub id: LayerId,
    pub name: String,
    /// Remote URL or `blob:<id>`.
    pub image_ref: String,
    pub z_index: usize,
    pub side: Side,
    pub bounds: Bounds,
    #[serde(default)]
    pub layer_type: LayerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_element_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRecord {
    pub layer_id: LayerId,
    pub payload_base64: String,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub asset_id: String,
    #[serde(default)]
    pub front: Vec<LayerRecord>,
    #[serde(default)]
    pub back: Vec<LayerRecord>,
    #[serde(default)]
    pub selections: Vec<Selection>,
    #[serde(default)]
    pub opacity: BTreeMap<LayerId, f32>,
    #[serde(default)]
    pub masks: Vec<MaskRecord>,
    #[serde(default)]
    pub active_side: Side,
    #[serde(default)]
    pub show_original: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub saved_at: OffsetDateTime,
}

// =============================================================================
// STORES
// =============================================================================

pub trait SessionStore: Send + Sync {
    fn save(&self, record: &SessionRecord) -> Result<(), SessionError>;
    fn load(&self, asset_id: &str) -> Result<Option<SessionRecord>, SessionError>;
    fn clear(&self, asset_id: &str) -> Result<(), SessionError>;
}

/// One `<asset_id>.json` file per asset under a directory.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, asset_id: &str) -> Result<PathBuf, SessionError> {
        let valid = !asset_id.is_empty()
            && asset_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SessionError::InvalidAssetId(asset_id.to_string()));
        }
        Ok(self.dir.join(format!("{asset_id}.json")))
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let path = self.path_for(&record.asset_id)?;
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(record)?;
        // Atomic replace via rename.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        debug!(asset_id = %record.asset_id, path = %path.display(), "session: saved");
        Ok(())
    }

    fn load(&self, asset_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        let path = self.path_for(asset_id)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn clear(&self, asset_id: &str) -> Result<(), SessionError> {
        let path = self.path_for(asset_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-process store, for tests and headless runs.
#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, record: &SessionRecord) -> Result<(), SessionError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.asset_id.clone(), record.clone());
        Ok(())
    }

    fn load(&self, asset_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.records.lock().unwrap_or_else(PoisonError::into_inner).get(asset_id).cloned())
    }

    fn clear(&self, asset_id: &str) -> Result<(), SessionError> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).remove(asset_id);
        Ok(())
    }
}
