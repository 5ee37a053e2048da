use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Result, TrackerError};
use crate::types::{FeatureVector, Window};

/// Window contents persisted by the foreground session for the background runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub saved_at: DateTime<Utc>,
    pub vectors: Vec<FeatureVector>,
}

impl WindowSnapshot {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Single-slot file hand-off between the foreground session and a background run.
#[derive(Debug, Clone)]
pub struct HandoffStore {
    path: PathBuf,
}

impl HandoffStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored snapshot. Readers never see a half-written file.
    pub fn save(&self, window: &Window) -> Result<()> {
        let snapshot = WindowSnapshot {
            saved_at: Utc::now(),
            vectors: window.clone(),
        };
        let json = serde_json::to_vec(&snapshot)?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| TrackerError::Storage(format!("{}: {}", self.path.display(), e)))
    }

    /// `Ok(None)` when nothing has been saved (or it was cleared).
    pub fn load(&self) -> Result<Option<WindowSnapshot>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = serde_json::from_str(&text)
            .map_err(|e| TrackerError::Storage(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(snapshot))
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::new(dir.path().join("window.json"));
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::new(dir.path().join("window.json"));
        let window: Window = (0..130).map(|i| [i as f64; 9]).collect();

        store.save(&window).unwrap();
        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.len(), 130);
        assert_eq!(snapshot.vectors[129][0], 129.0);
        assert!(!dir.path().join("window.tmp").exists());

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::new(dir.path().join("window.json"));
        store.save(&vec![[1.0; 9]; 10]).unwrap();
        store.save(&vec![[2.0; 9]; 3]).unwrap();

        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.vectors[0][0], 2.0);
    }

    #[test]
    fn test_garbage_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("window.json");
        std::fs::write(&path, b"\x00\x01garbage").unwrap();
        let store = HandoffStore::new(path);
        assert!(matches!(store.load(), Err(TrackerError::Storage(_))));
    }
}
