//! Normalization and inference adapter.
//!
//! Turns a window of feature vectors into a standardised `[1, T, 9]` tensor,
//! runs the classifier over it and reduces the per-class scores to a single
//! class index. Nothing in here panics or propagates classifier failures: every
//! miss comes back as an `InferenceError` (or `None` from `infer`).

use ndarray::Array3;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::PipelineConfig;
use crate::error::{lock_poisoned, InferenceError, Result, TrackerError};
use crate::types::{FeatureVector, GestureLabel, FEATURE_COUNT};

/// What a classifier hands back for one tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResult {
    /// One score per class.
    Scores(Vec<f32>),
    /// Backend exists but cannot serve requests yet.
    NotReady,
    Failure(String),
}

/// Opaque on-device classifier.
pub trait Classifier: Send + Sync {
    /// `input` has shape `[1, window, FEATURE_COUNT]`, already standardised.
    fn run(&self, input: &Array3<f32>) -> InferenceResult;
}

/// Where a model lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub path: PathBuf,
}

impl ModelDescriptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub trait ClassifierLoader: Send + Sync {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn Classifier>>;
}

enum SlotState {
    Empty,
    Loading,
    Loaded(Arc<dyn Classifier>),
}

/// Holds the classifier once loaded. Read-only afterwards.
pub struct ClassifierSlot {
    state: Mutex<SlotState>,
}

impl ClassifierSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }

    /// Load the classifier unless one is already loaded or loading.
    ///
    /// Returns `Ok(true)` when this call performed the load. Load failures are
    /// returned to the caller and leave the slot empty so a later call can retry.
    pub fn load_if_absent(
        &self,
        loader: &dyn ClassifierLoader,
        descriptor: &ModelDescriptor,
    ) -> Result<bool> {
        {
            let mut state = self.state.lock().map_err(|_| lock_poisoned("classifier"))?;
            match *state {
                SlotState::Empty => *state = SlotState::Loading,
                SlotState::Loading | SlotState::Loaded(_) => {
                    log::debug!("Classifier already loaded or loading, skipping load");
                    return Ok(false);
                }
            }
        }

        let loaded = panic::catch_unwind(AssertUnwindSafe(|| loader.load(descriptor)))
            .unwrap_or_else(|_| Err(TrackerError::ModelLoad("classifier loader panicked".to_string())));

        let mut state = self.state.lock().map_err(|_| lock_poisoned("classifier"))?;
        match loaded {
            Ok(classifier) => {
                *state = SlotState::Loaded(classifier);
                log::info!("Classifier loaded from {}", descriptor.path.display());
                Ok(true)
            }
            Err(e) => {
                *state = SlotState::Empty;
                log::error!("Classifier load failed: {}", e);
                Err(e)
            }
        }
    }

    /// Install an already constructed classifier, replacing any previous one.
    pub fn install(&self, classifier: Arc<dyn Classifier>) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned("classifier"))?;
        *state = SlotState::Loaded(classifier);
        Ok(())
    }

    pub fn get(&self) -> Option<Arc<dyn Classifier>> {
        match &*self.state.lock().ok()? {
            SlotState::Loaded(classifier) => Some(Arc::clone(classifier)),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.get().is_some()
    }
}

impl Default for ClassifierSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed per-feature standardisation: `(x - mean) / std`.
#[derive(Debug, Clone)]
pub struct Normalizer {
    mean: [f64; FEATURE_COUNT],
    std: [f64; FEATURE_COUNT],
}

impl Normalizer {
    pub fn new(mean: [f64; FEATURE_COUNT], std: [f64; FEATURE_COUNT]) -> Self {
        Self { mean, std }
    }

    pub fn apply(&self, feature: usize, value: f64) -> f64 {
        (value - self.mean[feature]) / self.std[feature]
    }

    /// Build the `[1, len, FEATURE_COUNT]` input tensor.
    pub fn tensor(&self, vectors: &[FeatureVector]) -> Array3<f32> {
        Array3::from_shape_fn((1, vectors.len(), FEATURE_COUNT), |(_, t, f)| {
            self.apply(f, vectors[t][f]) as f32
        })
    }
}

/// Index of the largest score; the first one wins on ties.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

pub struct InferenceAdapter {
    normalizer: Normalizer,
    window_size: usize,
    slot: ClassifierSlot,
}

impl InferenceAdapter {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            normalizer: Normalizer::new(config.feature_mean, config.feature_std),
            window_size: config.window_size,
            slot: ClassifierSlot::new(),
        }
    }

    pub fn with_classifier(config: &PipelineConfig, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            slot: ClassifierSlot {
                state: Mutex::new(SlotState::Loaded(classifier)),
            },
            ..Self::new(config)
        }
    }

    pub fn slot(&self) -> &ClassifierSlot {
        &self.slot
    }

    pub fn load_if_absent(
        &self,
        loader: &dyn ClassifierLoader,
        descriptor: &ModelDescriptor,
    ) -> Result<bool> {
        self.slot.load_if_absent(loader, descriptor)
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.is_loaded()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Classify the most recent `window_size` vectors of `window`.
    pub fn try_infer(&self, window: &[FeatureVector]) -> std::result::Result<usize, InferenceError> {
        let classifier = self.slot.get().ok_or(InferenceError::ModelNotLoaded)?;
        if window.len() < self.window_size {
            return Err(InferenceError::InsufficientData {
                have: window.len(),
                need: self.window_size,
            });
        }

        let recent = &window[window.len() - self.window_size..];
        let input = self.normalizer.tensor(recent);

        let output = panic::catch_unwind(AssertUnwindSafe(|| classifier.run(&input)))
            .map_err(|_| InferenceError::InferenceFailure("classifier panicked".to_string()))?;

        match output {
            InferenceResult::Scores(scores) => validate_scores(&scores),
            InferenceResult::NotReady => Err(InferenceError::ModelNotLoaded),
            InferenceResult::Failure(reason) => Err(InferenceError::InferenceFailure(reason)),
        }
    }

    /// Like `try_infer`, but every failure is logged and collapsed into `None`.
    pub fn infer(&self, window: &[FeatureVector]) -> Option<usize> {
        match self.try_infer(window) {
            Ok(index) => Some(index),
            Err(e) if e.is_transient() => {
                log::debug!("No prediction: {}", e);
                None
            }
            Err(e) => {
                log::warn!("Prediction failed: {}", e);
                None
            }
        }
    }
}

fn validate_scores(scores: &[f32]) -> std::result::Result<usize, InferenceError> {
    if scores.len() != GestureLabel::COUNT {
        return Err(InferenceError::InvalidClassifierOutput(format!(
            "expected {} scores, got {}",
            GestureLabel::COUNT,
            scores.len()
        )));
    }
    if let Some(i) = scores.iter().position(|s| !s.is_finite()) {
        return Err(InferenceError::InvalidClassifierOutput(format!(
            "score {} is not finite",
            i
        )));
    }
    argmax(scores).ok_or_else(|| InferenceError::InvalidClassifierOutput("empty scores".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedScores(Vec<f32>);

    impl Classifier for FixedScores {
        fn run(&self, _input: &Array3<f32>) -> InferenceResult {
            InferenceResult::Scores(self.0.clone())
        }
    }

    struct Failing;

    impl Classifier for Failing {
        fn run(&self, _input: &Array3<f32>) -> InferenceResult {
            InferenceResult::Failure("backend error".to_string())
        }
    }

    struct Panicking;

    impl Classifier for Panicking {
        fn run(&self, _input: &Array3<f32>) -> InferenceResult {
            panic!("forward pass exploded")
        }
    }

    /// Records the tensor it was given.
    struct Capturing(Mutex<Option<Array3<f32>>>);

    impl Classifier for Capturing {
        fn run(&self, input: &Array3<f32>) -> InferenceResult {
            *self.0.lock().unwrap() = Some(input.clone());
            InferenceResult::Scores(vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0])
        }
    }

    struct CountingLoader(AtomicUsize);

    impl ClassifierLoader for CountingLoader {
        fn load(&self, _descriptor: &ModelDescriptor) -> Result<Arc<dyn Classifier>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixedScores(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0])))
        }
    }

    struct PanickingLoader;

    impl ClassifierLoader for PanickingLoader {
        fn load(&self, _descriptor: &ModelDescriptor) -> Result<Arc<dyn Classifier>> {
            panic!("corrupt model file")
        }
    }

    struct BrokenLoader;

    impl ClassifierLoader for BrokenLoader {
        fn load(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn Classifier>> {
            Err(TrackerError::ModelLoad(format!(
                "{} missing",
                descriptor.path.display()
            )))
        }
    }

    fn full_window(n: usize) -> Vec<FeatureVector> {
        (0..n).map(|i| [i as f64; FEATURE_COUNT]).collect()
    }

    fn adapter_with(classifier: impl Classifier + 'static) -> InferenceAdapter {
        InferenceAdapter::with_classifier(&PipelineConfig::default(), Arc::new(classifier))
    }

    #[test]
    fn test_argmax_first_max_wins() {
        assert_eq!(argmax(&[0.5, 0.9, 0.9, 0.1]), Some(1));
        assert_eq!(argmax(&[1.0, 0.0, 0.0]), Some(0));
        assert_eq!(argmax(&[-3.0, -1.0, -2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_none_when_model_not_loaded() {
        let adapter = InferenceAdapter::new(&PipelineConfig::default());
        assert_eq!(
            adapter.try_infer(&full_window(128)),
            Err(InferenceError::ModelNotLoaded)
        );
        assert_eq!(adapter.infer(&full_window(128)), None);
    }

    #[test]
    fn test_none_below_window_size() {
        let adapter = adapter_with(FixedScores(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
        for n in [0, 1, 64, 127] {
            assert_eq!(adapter.infer(&full_window(n)), None);
        }
        assert_eq!(
            adapter.try_infer(&full_window(127)),
            Err(InferenceError::InsufficientData { have: 127, need: 128 })
        );
        assert_eq!(adapter.infer(&full_window(128)), Some(0));
    }

    #[test]
    fn test_classifier_failure_is_swallowed() {
        let adapter = adapter_with(Failing);
        assert_eq!(adapter.infer(&full_window(128)), None);
        assert!(matches!(
            adapter.try_infer(&full_window(128)),
            Err(InferenceError::InferenceFailure(_))
        ));
    }

    #[test]
    fn test_classifier_panic_is_swallowed() {
        let adapter = adapter_with(Panicking);
        assert_eq!(adapter.infer(&full_window(128)), None);
    }

    #[test]
    fn test_malformed_scores_rejected() {
        let adapter = adapter_with(FixedScores(vec![0.1, 0.9]));
        assert!(matches!(
            adapter.try_infer(&full_window(128)),
            Err(InferenceError::InvalidClassifierOutput(_))
        ));

        let adapter = adapter_with(FixedScores(vec![0.1, f32::NAN, 0.0, 0.0, 0.0, 0.0]));
        assert_eq!(adapter.infer(&full_window(128)), None);
    }

    #[test]
    fn test_uses_last_window_and_standardises() {
        let capture = Arc::new(Capturing(Mutex::new(None)));
        let config = PipelineConfig::default();
        let adapter = InferenceAdapter::with_classifier(&config, capture.clone());

        let window = full_window(200);
        assert_eq!(adapter.infer(&window), Some(2));

        let tensor = capture.0.lock().unwrap().take().unwrap();
        assert_eq!(tensor.shape(), &[1, 128, FEATURE_COUNT]);
        // First row of the tensor is vector #72 (200 - 128)
        let expected = ((72.0 - config.feature_mean[0]) / config.feature_std[0]) as f32;
        assert!((tensor[[0, 0, 0]] - expected).abs() < 1e-4);
        let expected = ((199.0 - config.feature_mean[8]) / config.feature_std[8]) as f32;
        assert!((tensor[[0, 127, 8]] - expected).abs() < 1e-3);
    }

    #[test]
    fn test_load_is_idempotent() {
        let adapter = InferenceAdapter::new(&PipelineConfig::default());
        let loader = CountingLoader(AtomicUsize::new(0));
        let descriptor = ModelDescriptor::new("model.json");

        assert!(adapter.load_if_absent(&loader, &descriptor).unwrap());
        assert!(!adapter.load_if_absent(&loader, &descriptor).unwrap());
        assert_eq!(loader.0.load(Ordering::SeqCst), 1);
        assert!(adapter.is_loaded());
    }

    #[test]
    fn test_failed_load_can_retry() {
        let adapter = InferenceAdapter::new(&PipelineConfig::default());
        let descriptor = ModelDescriptor::new("missing.json");

        assert!(adapter.load_if_absent(&BrokenLoader, &descriptor).is_err());
        assert!(!adapter.is_loaded());

        let loader = CountingLoader(AtomicUsize::new(0));
        assert!(adapter.load_if_absent(&loader, &descriptor).unwrap());
        assert!(adapter.is_loaded());
    }

    #[test]
    fn test_panicking_loader_leaves_slot_empty() {
        let adapter = InferenceAdapter::new(&PipelineConfig::default());
        let descriptor = ModelDescriptor::new("model.json");

        assert!(matches!(
            adapter.load_if_absent(&PanickingLoader, &descriptor),
            Err(TrackerError::ModelLoad(_))
        ));
        assert!(!adapter.is_loaded());

        let loader = CountingLoader(AtomicUsize::new(0));
        assert!(adapter.load_if_absent(&loader, &descriptor).unwrap());
        assert_eq!(loader.0.load(Ordering::SeqCst), 1);
    }
}
