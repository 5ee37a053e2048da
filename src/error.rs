use thiserror::Error;

/// Activity tracker error types
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session not running")]
    NotRunning,

    #[error("Sensor permission denied: {0}")]
    SensorPermissionDenied(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Why a prediction cycle produced no class index.
///
/// None of these cross the inference boundary as a panic or a hard error:
/// the adapter degrades them to "no result" and the next tick retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Classifier not loaded")]
    ModelNotLoaded,

    #[error("Insufficient data: have {have} vectors, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    #[error("Invalid classifier output: {0}")]
    InvalidClassifierOutput(String),
}

impl InferenceError {
    /// "Not ready yet" conditions that are expected to clear on a later tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::ModelNotLoaded | InferenceError::InsufficientData { .. }
        )
    }
}

pub(crate) fn lock_poisoned(what: &str) -> TrackerError {
    TrackerError::Internal(format!("Failed to acquire {} lock", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(InferenceError::ModelNotLoaded.is_transient());
        assert!(InferenceError::InsufficientData { have: 3, need: 128 }.is_transient());
        assert!(!InferenceError::InferenceFailure("boom".to_string()).is_transient());
        assert!(!InferenceError::InvalidClassifierOutput("nan".to_string()).is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = InferenceError::InsufficientData { have: 10, need: 128 };
        assert_eq!(err.to_string(), "Insufficient data: have 10 vectors, need 128");

        let err = TrackerError::SensorPermissionDenied("gyroscope".to_string());
        assert_eq!(err.to_string(), "Sensor permission denied: gyroscope");
    }
}
