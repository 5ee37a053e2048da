use ndarray::{Array1, Array2, Array3, Axis};
use serde::Deserialize;
use std::fs;
use std::sync::Arc;

use crate::error::{Result, TrackerError};
use crate::inference::{Classifier, ClassifierLoader, InferenceResult, ModelDescriptor};
use crate::types::{GestureLabel, FEATURE_COUNT};

/// Pooled inputs per window: channel means followed by channel std-devs.
pub const POOLED_FEATURES: usize = 2 * FEATURE_COUNT;

/// On-disk form of the dense model.
#[derive(Debug, Deserialize)]
struct DenseModelFile {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

/// Reference classifier: temporal mean/std pooling, one dense layer, softmax.
pub struct DenseClassifier {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl DenseClassifier {
    pub fn new(weights: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weights.dim() != (GestureLabel::COUNT, POOLED_FEATURES) {
            return Err(TrackerError::ModelLoad(format!(
                "weights must be {}x{}, got {:?}",
                GestureLabel::COUNT,
                POOLED_FEATURES,
                weights.dim()
            )));
        }
        if bias.len() != GestureLabel::COUNT {
            return Err(TrackerError::ModelLoad(format!(
                "bias must have {} entries, got {}",
                GestureLabel::COUNT,
                bias.len()
            )));
        }
        Ok(Self { weights, bias })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: DenseModelFile = serde_json::from_str(text)?;
        let rows = file.weights.len();
        let flat: Vec<f32> = file.weights.into_iter().flatten().collect();
        if rows == 0 || flat.len() % rows != 0 {
            return Err(TrackerError::ModelLoad("ragged weight matrix".to_string()));
        }
        let cols = flat.len() / rows;
        let weights = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| TrackerError::ModelLoad(format!("Failed to build weight matrix: {e}")))?;
        Self::new(weights, Array1::from_vec(file.bias))
    }

    fn pool(input: &Array3<f32>) -> Option<Array1<f32>> {
        let frames = input.index_axis(Axis(0), 0);
        let mean = frames.mean_axis(Axis(0))?;
        let std = frames.std_axis(Axis(0), 0.0);
        let mut pooled = Array1::zeros(POOLED_FEATURES);
        pooled.slice_mut(ndarray::s![..FEATURE_COUNT]).assign(&mean);
        pooled.slice_mut(ndarray::s![FEATURE_COUNT..]).assign(&std);
        Some(pooled)
    }
}

impl Classifier for DenseClassifier {
    fn run(&self, input: &Array3<f32>) -> InferenceResult {
        let shape = input.shape();
        if shape[0] != 1 || shape[2] != FEATURE_COUNT {
            return InferenceResult::Failure(format!("unexpected input shape {:?}", shape));
        }
        let pooled = match Self::pool(input) {
            Some(p) => p,
            None => return InferenceResult::Failure("empty input window".to_string()),
        };

        let logits = self.weights.dot(&pooled) + &self.bias;
        InferenceResult::Scores(softmax(logits.as_slice().unwrap_or(&[])))
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Reads a `DenseClassifier` from the JSON file named by the descriptor.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenseModelLoader;

impl ClassifierLoader for DenseModelLoader {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn Classifier>> {
        let text = fs::read_to_string(&descriptor.path).map_err(|e| {
            TrackerError::ModelLoad(format!("{}: {}", descriptor.path.display(), e))
        })?;
        let model = DenseClassifier::from_json(&text)?;
        Ok(Arc::new(model))
    }
}
