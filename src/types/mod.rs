use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of channels in one feature vector.
pub const FEATURE_COUNT: usize = 9;

/// `[ax, ay, az, body_x, body_y, body_z, gx, gy, gz]`
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Ordered, oldest-first sequence of feature vectors.
pub type Window = Vec<FeatureVector>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccelData {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GyroData {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpsData {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub bearing: f64,
    #[serde(default)]
    pub accuracy: f64,
}

/// Activity classes, in classifier output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GestureLabel {
    Walking,
    WalkingUpstairs,
    WalkingDownstairs,
    Sitting,
    Standing,
    Laying,
}

impl GestureLabel {
    pub const COUNT: usize = 6;

    pub const ALL: [GestureLabel; GestureLabel::COUNT] = [
        GestureLabel::Walking,
        GestureLabel::WalkingUpstairs,
        GestureLabel::WalkingDownstairs,
        GestureLabel::Sitting,
        GestureLabel::Standing,
        GestureLabel::Laying,
    ];

    /// Map a classifier output index to a label. Out-of-range indices yield `None`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GestureLabel::Walking => "WALKING",
            GestureLabel::WalkingUpstairs => "WALKING_UPSTAIRS",
            GestureLabel::WalkingDownstairs => "WALKING_DOWNSTAIRS",
            GestureLabel::Sitting => "SITTING",
            GestureLabel::Standing => "STANDING",
            GestureLabel::Laying => "LAYING",
        }
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for GestureLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|label| label.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown gesture label: {}", s))
    }
}

/// One classified window, handed to observers as soon as it is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEvent {
    pub label: GestureLabel,
    pub timestamp: DateTime<Utc>,
}

impl PredictionEvent {
    pub fn new(label: GestureLabel) -> Self {
        Self {
            label,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome reported to the host's background task runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackgroundFetchResult {
    NewData,
    NoData,
    Failed,
}
