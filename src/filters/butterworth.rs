use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Last two inputs and outputs of a second-order recursion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
}

/// 2nd-order Butterworth low-pass, bilinear transform with pre-warped cutoff.
///
/// One instance per axis. Used to pull the slowly varying gravity component
/// out of raw accelerometer readings (0.3 Hz cutoff @ 50 Hz).
#[derive(Clone, Debug)]
pub struct ButterworthLowPass {
    a0: f64,
    a1: f64,
    a2: f64,
    b1: f64,
    b2: f64,
    state: FilterState,
}

impl ButterworthLowPass {
    /// `cutoff_hz` must be below `sample_rate_hz / 2`; callers validate this
    /// through `PipelineConfig::validate`.
    pub fn new(cutoff_hz: f64, sample_rate_hz: f64) -> Self {
        let wc = (std::f64::consts::PI * cutoff_hz / sample_rate_hz).tan();
        let k1 = std::f64::consts::SQRT_2 * wc;
        let k2 = wc * wc;
        let norm = 1.0 + k1 + k2;

        let a0 = k2 / norm;
        Self {
            a0,
            a1: 2.0 * a0,
            a2: a0,
            b1: 2.0 * (k2 - 1.0) / norm,
            b2: (1.0 - k1 + k2) / norm,
            state: FilterState::default(),
        }
    }

    /// Filter one new reading and return the smoothed estimate for this tick.
    pub fn process(&mut self, x: f64) -> f64 {
        let s = &mut self.state;
        let y = self.a0 * x + self.a1 * s.x1 + self.a2 * s.x2 - self.b1 * s.y1 - self.b2 * s.y2;
        s.x2 = s.x1;
        s.x1 = x;
        s.y2 = s.y1;
        s.y1 = y;
        y
    }

    pub fn reset(&mut self) {
        self.state = FilterState::default();
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    /// Feed-forward coefficients `(a0, a1, a2)`.
    pub fn feedforward(&self) -> (f64, f64, f64) {
        (self.a0, self.a1, self.a2)
    }

    /// Feedback coefficients `(b1, b2)`.
    pub fn feedback(&self) -> (f64, f64) {
        (self.b1, self.b2)
    }

    /// Steady-state gain for a constant input.
    pub fn dc_gain(&self) -> f64 {
        (self.a0 + self.a1 + self.a2) / (1.0 + self.b1 + self.b2)
    }
}

/// Per-axis gravity separation. Axes share no state.
#[derive(Clone, Debug)]
pub struct GravityFilter {
    x: ButterworthLowPass,
    y: ButterworthLowPass,
    z: ButterworthLowPass,
}

impl GravityFilter {
    pub fn new(cutoff_hz: f64, sample_rate_hz: f64) -> Self {
        Self {
            x: ButterworthLowPass::new(cutoff_hz, sample_rate_hz),
            y: ButterworthLowPass::new(cutoff_hz, sample_rate_hz),
            z: ButterworthLowPass::new(cutoff_hz, sample_rate_hz),
        }
    }

    /// Returns `(gravity, body)` where `body = raw - gravity`.
    pub fn separate(&mut self, raw: Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
        let gravity = Vector3::new(
            self.x.process(raw.x),
            self.y.process(raw.y),
            self.z.process(raw.z),
        );
        (gravity, raw - gravity)
    }

    pub fn reset(&mut self) {
        self.x.reset();
        self.y.reset();
        self.z.reset();
    }

    pub fn states(&self) -> [FilterState; 3] {
        [self.x.state(), self.y.state(), self.z.state()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_coefficients() {
        let filter = ButterworthLowPass::new(0.3, 50.0);
        let (a0, a1, a2) = filter.feedforward();
        let (b1, b2) = filter.feedback();

        assert_relative_eq!(a1, 2.0 * a0);
        assert_relative_eq!(a2, a0);
        assert!(a0 > 0.0 && a0 < 1e-3);
        assert!(b1 < -1.9 && b1 > -2.0);
        assert!(b2 > 0.9 && b2 < 1.0);
    }

    #[test]
    fn test_unity_dc_gain() {
        for &(cutoff, rate) in &[(0.3, 50.0), (1.0, 50.0), (4.0, 100.0), (10.0, 25.0), (20.0, 50.0)] {
            let filter = ButterworthLowPass::new(cutoff, rate);
            let (a0, a1, a2) = filter.feedforward();
            let (b1, b2) = filter.feedback();
            assert_relative_eq!(a0 + a1 + a2, 1.0 + b1 + b2, epsilon = 1e-12);
            assert_relative_eq!(filter.dc_gain(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_constant_input_converges() {
        let mut filter = ButterworthLowPass::new(0.3, 50.0);
        let target = 9.81;
        let mut peak = 0.0_f64;
        let mut last = 0.0;

        for _ in 0..1500 {
            last = filter.process(target);
            peak = peak.max(last);
        }

        assert!((last - target).abs() < 1e-6 * target);
        // Butterworth step response: a single small overshoot, no ringing
        assert!(peak < target * 1.05);
    }

    #[test]
    fn test_first_output_from_zero_state() {
        let mut filter = ButterworthLowPass::new(0.3, 50.0);
        let (a0, _, _) = filter.feedforward();
        assert_relative_eq!(filter.process(2.0), 2.0 * a0);

        let state = filter.state();
        assert_eq!(state.x1, 2.0);
        assert_eq!(state.x2, 0.0);
        assert_relative_eq!(state.y1, 2.0 * a0);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut filter = ButterworthLowPass::new(0.3, 50.0);
        for _ in 0..10 {
            filter.process(1.0);
        }
        filter.reset();
        assert_eq!(filter.state(), FilterState::default());
    }

    #[test]
    fn test_axes_are_independent() {
        let mut gravity = GravityFilter::new(0.3, 50.0);
        for _ in 0..50 {
            gravity.separate(Vector3::new(0.0, 0.0, 9.81));
        }
        let [sx, sy, sz] = gravity.states();
        assert_eq!(sx, FilterState::default());
        assert_eq!(sy, FilterState::default());
        assert!(sz.y1 > 0.0);
    }

    #[test]
    fn test_body_is_raw_minus_gravity() {
        let mut gravity = GravityFilter::new(0.3, 50.0);
        let raw = Vector3::new(0.2, -0.1, 9.7);
        let (g, body) = gravity.separate(raw);
        assert_relative_eq!(g + body, raw, epsilon = 1e-12);
    }
}
