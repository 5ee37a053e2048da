use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{lock_poisoned, Result, TrackerError};
use crate::types::GestureLabel;

/// One stored prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureRecord {
    pub id: u64,
    pub label: GestureLabel,
    pub timestamp: DateTime<Utc>,
}

/// One stored position fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

/// Persistent record store for predictions and positions.
///
/// Timestamps default to "now" when not supplied.
pub trait GestureStore: Send + Sync {
    fn add_gesture(&self, label: GestureLabel, timestamp: Option<DateTime<Utc>>) -> Result<GestureRecord>;
    fn get_gestures(&self) -> Result<Vec<GestureRecord>>;
    fn clear_gestures(&self) -> Result<()>;
    fn add_position(
        &self,
        latitude: f64,
        longitude: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<PositionRecord>;
    fn get_all_positions(&self) -> Result<Vec<PositionRecord>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    next_gesture_id: u64,
    next_position_id: u64,
    gestures: Vec<GestureRecord>,
    positions: Vec<PositionRecord>,
}

/// JSON-file backed store. Every write rewrites the file; `in_memory` never touches disk.
pub struct JsonFileStore {
    path: Option<PathBuf>,
    data: Mutex<StoreData>,
}

impl JsonFileStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str(&text)
                .map_err(|e| TrackerError::Storage(format!("{}: {}", path.display(), e)))?
        } else {
            StoreData::default()
        };
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(StoreData::default()),
        }
    }

    fn update<T>(&self, f: impl FnOnce(&mut StoreData) -> T) -> Result<T> {
        let mut data = self.data.lock().map_err(|_| lock_poisoned("store"))?;
        let out = f(&mut data);
        if let Some(path) = &self.path {
            persist(path, &data)?;
        }
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T> {
        let data = self.data.lock().map_err(|_| lock_poisoned("store"))?;
        Ok(f(&data))
    }
}

fn persist(path: &Path, data: &StoreData) -> Result<()> {
    let json = serde_json::to_vec_pretty(data)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)
        .and_then(|_| fs::rename(&tmp, path))
        .map_err(|e| TrackerError::Storage(format!("{}: {}", path.display(), e)))
}

impl GestureStore for JsonFileStore {
    fn add_gesture(&self, label: GestureLabel, timestamp: Option<DateTime<Utc>>) -> Result<GestureRecord> {
        self.update(|data| {
            data.next_gesture_id += 1;
            let record = GestureRecord {
                id: data.next_gesture_id,
                label,
                timestamp: timestamp.unwrap_or_else(Utc::now),
            };
            data.gestures.push(record.clone());
            record
        })
    }

    fn get_gestures(&self) -> Result<Vec<GestureRecord>> {
        self.read(|data| data.gestures.clone())
    }

    fn clear_gestures(&self) -> Result<()> {
        self.update(|data| data.gestures.clear())
    }

    fn add_position(
        &self,
        latitude: f64,
        longitude: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<PositionRecord> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(TrackerError::InvalidParameters(format!(
                "invalid coordinates ({}, {})",
                latitude, longitude
            )));
        }
        self.update(|data| {
            data.next_position_id += 1;
            let record = PositionRecord {
                id: data.next_position_id,
                latitude,
                longitude,
                timestamp: timestamp.unwrap_or_else(Utc::now),
            };
            data.positions.push(record.clone());
            record
        })
    }

    fn get_all_positions(&self) -> Result<Vec<PositionRecord>> {
        self.read(|data| data.positions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ids_autoincrement() {
        let store = JsonFileStore::in_memory();
        let a = store.add_gesture(GestureLabel::Walking, None).unwrap();
        let b = store.add_gesture(GestureLabel::Sitting, None).unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        let gestures = store.get_gestures().unwrap();
        assert_eq!(gestures.len(), 2);
        assert_eq!(gestures[1].label, GestureLabel::Sitting);
    }

    #[test]
    fn test_explicit_timestamp_kept() {
        let store = JsonFileStore::in_memory();
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        let record = store.add_position(48.85, 2.35, Some(ts)).unwrap();
        assert_eq!(record.timestamp, ts);
        assert_eq!(store.get_all_positions().unwrap()[0].latitude, 48.85);
    }

    #[test]
    fn test_clear_keeps_id_sequence() {
        let store = JsonFileStore::in_memory();
        store.add_gesture(GestureLabel::Laying, None).unwrap();
        store.clear_gestures().unwrap();
        assert!(store.get_gestures().unwrap().is_empty());
        assert_eq!(store.add_gesture(GestureLabel::Laying, None).unwrap().id, 2);
    }

    #[test]
    fn test_rejects_nan_coordinates() {
        let store = JsonFileStore::in_memory();
        assert!(store.add_position(f64::NAN, 2.0, None).is_err());
        assert!(store.get_all_positions().unwrap().is_empty());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = JsonFileStore::open(&path).unwrap();
            store.add_gesture(GestureLabel::Standing, None).unwrap();
            store.add_position(1.0, 2.0, None).unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get_gestures().unwrap()[0].label, GestureLabel::Standing);
        assert_eq!(reopened.get_all_positions().unwrap().len(), 1);
        assert_eq!(reopened.add_gesture(GestureLabel::Walking, None).unwrap().id, 2);
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(JsonFileStore::open(&path), Err(TrackerError::Storage(_))));
    }
}
