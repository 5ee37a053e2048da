//! Single-shot prediction for a host-scheduled background task.
//!
//! The foreground session leaves its window in a [`HandoffStore`]; a
//! background run loads the classifier if needed, classifies that snapshot
//! once and reports a [`BackgroundFetchResult`]. Every failure is reported
//! through the result, never as an error or panic.

use std::sync::Arc;

use crate::error::Result;
use crate::handoff::HandoffStore;
use crate::inference::{ClassifierLoader, InferenceAdapter, ModelDescriptor};
use crate::scheduler::ObserverSet;
use crate::types::{BackgroundFetchResult, GestureLabel, PredictionEvent};

pub struct BackgroundPredictor {
    adapter: Arc<InferenceAdapter>,
    handoff: HandoffStore,
    observers: ObserverSet,
}

impl BackgroundPredictor {
    pub fn new(adapter: Arc<InferenceAdapter>, handoff: HandoffStore) -> Self {
        Self {
            adapter,
            handoff,
            observers: ObserverSet::new(),
        }
    }

    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    /// Load the classifier unless it is already loaded or loading.
    pub fn prepare(&self, loader: &dyn ClassifierLoader, descriptor: &ModelDescriptor) -> Result<bool> {
        self.adapter.load_if_absent(loader, descriptor)
    }

    pub fn run_once(&self) -> BackgroundFetchResult {
        if !self.adapter.is_loaded() {
            log::debug!("Background run skipped: model not loaded");
            return BackgroundFetchResult::NoData;
        }

        let snapshot = match self.handoff.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                log::debug!("Background run skipped: no persisted window");
                return BackgroundFetchResult::NoData;
            }
            Err(e) => {
                log::warn!("Background run failed to read window: {}", e);
                return BackgroundFetchResult::Failed;
            }
        };

        let index = match self.adapter.try_infer(&snapshot.vectors) {
            Ok(index) => index,
            Err(e) if e.is_transient() => {
                log::debug!("Background run skipped: {}", e);
                return BackgroundFetchResult::NoData;
            }
            Err(e) => {
                log::warn!("Background prediction failed: {}", e);
                return BackgroundFetchResult::Failed;
            }
        };
        let Some(label) = GestureLabel::from_index(index) else {
            log::warn!("Background prediction failed: class index {} out of range", index);
            return BackgroundFetchResult::Failed;
        };

        let event = PredictionEvent::new(label);
        self.observers.notify(&event);
        log::info!(
            "Background prediction: {} (window saved {})",
            label,
            snapshot.saved_at.to_rfc3339()
        );

        // Consumed; the next run waits for a fresh window
        if let Err(e) = self.handoff.clear() {
            log::warn!("Failed to clear persisted window: {}", e);
        }
        BackgroundFetchResult::NewData
    }
}
