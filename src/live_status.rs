use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::sensors::current_timestamp;
use crate::types::GestureLabel;

/// Snapshot of the foreground session, rewritten periodically for external viewers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub running: bool,
    pub model_loaded: bool,
    // Window fill
    pub window_len: usize,
    pub window_capacity: usize,
    // Predictions
    pub predictions_emitted: u64,
    pub last_label: Option<GestureLabel>,
    pub last_prediction_at: Option<DateTime<Utc>>,
    // Positions
    pub positions_logged: u64,
}

impl LiveStatus {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0,
            running: false,
            model_loaded: false,
            window_len: 0,
            window_capacity,
            predictions_emitted: 0,
            last_label: None,
            last_prediction_at: None,
            positions_logged: 0,
        }
    }

    pub fn window_fill(&self) -> f64 {
        if self.window_capacity == 0 {
            return 0.0;
        }
        self.window_len as f64 / self.window_capacity as f64
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// `save`, logging instead of returning the error. Returns whether the file was written.
    pub fn save_or_warn(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match self.save(path) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to write live status {}: {}", path.display(), e);
                false
            }
        }
    }
}
