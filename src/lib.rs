//! Real-time activity recognition from phone motion sensors.
//!
//! Accelerometer and gyroscope readings are merged into 9-channel feature
//! vectors (raw acceleration, gravity-free body acceleration from a
//! Butterworth low-pass filter, rotation rate), buffered in a 128-vector
//! sliding window and periodically classified into one of six activities.

pub mod assembler;
pub mod background;
pub mod config;
pub mod dense_model;
pub mod error;
pub mod filters;
pub mod geolocation;
pub mod handoff;
pub mod inference;
pub mod live_status;
pub mod scheduler;
pub mod sensors;
pub mod statistics;
pub mod storage;
pub mod types;
pub mod window;

pub use assembler::SampleAssembler;
pub use background::BackgroundPredictor;
pub use config::PipelineConfig;
pub use dense_model::{DenseClassifier, DenseModelLoader};
pub use error::{InferenceError, Result, TrackerError};
pub use filters::{ButterworthLowPass, FilterState, GravityFilter};
pub use handoff::{HandoffStore, WindowSnapshot};
pub use inference::{
    argmax, Classifier, ClassifierLoader, ClassifierSlot, InferenceAdapter, InferenceResult,
    ModelDescriptor, Normalizer,
};
pub use scheduler::{
    ObserverSet, PredictionFeed, PredictionObserver, PredictionScheduler, RunState, StorageObserver,
};
pub use sensors::{MockSensorHub, SensorHub, SensorKind, Subscription, TermuxSensorHub};
pub use storage::{GestureRecord, GestureStore, JsonFileStore, PositionRecord};
pub use types::{
    AccelData, BackgroundFetchResult, FeatureVector, GestureLabel, GpsData, GyroData,
    PredictionEvent, Window, FEATURE_COUNT,
};
pub use window::{SharedWindow, SlidingWindow};
