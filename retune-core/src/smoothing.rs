//! Per-sample parameter ramp.
//!
//! Block-rate parameters (wet mix, bypass) would click if applied as a step
//! at a block boundary. `SmoothedValue` glides toward its target with a
//! one-pole exponential curve, one step per sample.

/// Default ramp time constant.
pub const DEFAULT_RAMP_MS: f32 = 20.0;

/// Difference under which the ramp snaps to its target.
const SNAP_EPSILON: f32 = 1e-5;

#[derive(Debug, Clone)]
pub struct SmoothedValue {
    current: f32,
    target: f32,
    coefficient: f32,
}

impl SmoothedValue {
    /// Creates a value resting at `initial`, ramping with a time constant of
    /// `ramp_ms` at `sample_rate`.
    pub fn new(initial: f32, ramp_ms: f32, sample_rate: u32) -> Self {
        let mut value = Self {
            current: initial,
            target: initial,
            coefficient: 0.0,
        };
        value.set_ramp(ramp_ms, sample_rate);
        value
    }

    /// Recomputes the per-sample coefficient, e.g. after a sample-rate change.
    pub fn set_ramp(&mut self, ramp_ms: f32, sample_rate: u32) {
        let samples = ramp_ms * 0.001 * sample_rate as f32;
        self.coefficient = if samples > 1.0 {
            (-1.0 / samples).exp()
        } else {
            0.0
        };
    }

    pub fn set_target(&mut self, target: f32) {
        if target.is_finite() {
            self.target = target;
        }
    }

    /// Jumps straight to `value` with no ramp.
    pub fn set_immediate(&mut self, value: f32) {
        if value.is_finite() {
            self.current = value;
            self.target = value;
        }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// Advances one sample and returns the new value.
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        let diff = self.target - self.current;
        let next = self.target - diff * self.coefficient;
        // Close to the target an f32 step can round to no movement at all.
        if diff.abs() < SNAP_EPSILON || next == self.current {
            self.current = self.target;
        } else {
            self.current = next;
        }
        self.current
    }
}
