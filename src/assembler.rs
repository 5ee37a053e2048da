use nalgebra::Vector3;

use crate::error::Result;
use crate::filters::GravityFilter;
use crate::types::{AccelData, FeatureVector, GyroData};
use crate::window::SharedWindow;

/// Builds one feature vector per accelerometer tick.
///
/// Gyroscope readings arrive on their own stream and are only cached here;
/// an accelerometer tick reuses whatever gyro value was seen last (zero until
/// the first gyro reading arrives).
pub struct SampleAssembler {
    gravity: GravityFilter,
    latest_gyro: Vector3<f64>,
    accel_count: u64,
    gyro_count: u64,
}

impl SampleAssembler {
    pub fn new(cutoff_hz: f64, sample_rate_hz: f64) -> Self {
        Self {
            gravity: GravityFilter::new(cutoff_hz, sample_rate_hz),
            latest_gyro: Vector3::zeros(),
            accel_count: 0,
            gyro_count: 0,
        }
    }

    pub fn feed_gyro(&mut self, gyro: &GyroData) {
        self.latest_gyro = Vector3::new(gyro.x, gyro.y, gyro.z);
        self.gyro_count += 1;
    }

    pub fn feed_accel(&mut self, accel: &AccelData) -> FeatureVector {
        let raw = Vector3::new(accel.x, accel.y, accel.z);
        let (_, body) = self.gravity.separate(raw);
        let gyro = self.latest_gyro;
        self.accel_count += 1;

        [
            raw.x, raw.y, raw.z, body.x, body.y, body.z, gyro.x, gyro.y, gyro.z,
        ]
    }

    /// `feed_accel` plus append to the shared window.
    pub fn feed_accel_into(&mut self, accel: &AccelData, window: &SharedWindow) -> Result<FeatureVector> {
        let vector = self.feed_accel(accel);
        window.append(vector)?;
        Ok(vector)
    }

    /// Start a new listening session: filter state and cached gyro are dropped.
    pub fn reset(&mut self) {
        self.gravity.reset();
        self.latest_gyro = Vector3::zeros();
        self.accel_count = 0;
        self.gyro_count = 0;
    }

    pub fn accel_count(&self) -> u64 {
        self.accel_count
    }

    pub fn gyro_count(&self) -> u64 {
        self.gyro_count
    }
}
