//! Time-domain granular pitch shifter.
//!
//! Two read taps trail the write head through a circular history. Each tap's
//! delay sweeps across one grain at `1 - ratio` samples per sample, so the
//! read position advances by `ratio`. The taps sit half a grain apart and are
//! crossfaded with complementary `sin²` weights; a tap's weight is zero
//! exactly when its delay wraps, so the wrap is never heard.

use std::f32::consts::PI;

/// History capacity in samples (power of two).
pub const HISTORY_LEN: usize = 8192;
const HISTORY_MASK: usize = HISTORY_LEN - 1;

/// Minimum distance between the write head and the nearest read position.
pub const BASE_DELAY: usize = 64;

/// Ratios closer to unity than this count as "no shift".
const UNITY_TOLERANCE: f32 = 1e-4;

/// Per-sample drift of the grain phase back to a resting point at unity.
const RECENTER_RATE: f32 = 0.002;

#[derive(Debug, Clone)]
pub struct GranularShifter {
    history: Vec<f32>,
    write_pos: usize,
    grain_size: usize,
    /// Delay of tap A beyond `BASE_DELAY`, in [0, grain_size).
    phase: f32,
}

impl GranularShifter {
    /// Creates a shifter with grains of `grain_size` samples.
    ///
    /// The grain is clamped so both taps always fit in the history.
    pub fn new(grain_size: usize) -> Self {
        let grain_size = grain_size.clamp(16, HISTORY_LEN / 2);
        Self {
            history: vec![0.0; HISTORY_LEN],
            write_pos: 0,
            grain_size,
            phase: grain_size as f32 / 2.0,
        }
    }

    pub fn grain_size(&self) -> usize {
        self.grain_size
    }

    /// Delay of the fully weighted tap at rest.
    pub fn latency(&self) -> usize {
        BASE_DELAY + self.grain_size / 2
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.write_pos = 0;
        self.phase = self.grain_size as f32 / 2.0;
    }

    /// Shifts one block.
    ///
    /// `wet` receives the shifted signal and `dry` the input delayed by
    /// [`latency`](Self::latency); both must be as long as `input`.
    pub fn process(&mut self, input: &[f32], ratio: f32, wet: &mut [f32], dry: &mut [f32]) {
        let grain = self.grain_size as f32;
        let half = grain / 2.0;
        let latency = self.latency();
        let unity = (ratio - 1.0).abs() < UNITY_TOLERANCE;
        let advance = if unity { 0.0 } else { 1.0 - ratio };

        for ((&x, wet), dry) in input.iter().zip(wet.iter_mut()).zip(dry.iter_mut()) {
            self.history[self.write_pos] = x;

            let phase_b = (self.phase + half) % grain;
            let weight_a = (PI * self.phase / grain).sin().powi(2);
            let tap_a = self.read_delayed(BASE_DELAY as f32 + self.phase);
            let tap_b = self.read_delayed(BASE_DELAY as f32 + phase_b);

            *wet = tap_a * weight_a + tap_b * (1.0 - weight_a);
            *dry = self.history[(self.write_pos + HISTORY_LEN - latency) & HISTORY_MASK];

            if unity {
                self.recenter(half);
            } else {
                self.phase = (self.phase + advance).rem_euclid(grain);
            }
            self.write_pos = (self.write_pos + 1) & HISTORY_MASK;
        }
    }

    /// Moves the phase toward the nearest point where one tap sits alone at
    /// the rest delay (0, half or a full grain).
    fn recenter(&mut self, half: f32) {
        let rest = (self.phase / half).round() * half;
        let diff = rest - self.phase;
        self.phase = if diff.abs() <= RECENTER_RATE {
            rest
        } else {
            self.phase + RECENTER_RATE.copysign(diff)
        };
        self.phase = self.phase.rem_euclid(2.0 * half);
    }

    /// Linearly interpolated sample `delay` samples behind the write head.
    #[inline]
    fn read_delayed(&self, delay: f32) -> f32 {
        let whole = delay.floor();
        let frac = delay - whole;
        let newer = (self.write_pos + HISTORY_LEN - whole as usize) & HISTORY_MASK;
        let older = (newer + HISTORY_LEN - 1) & HISTORY_MASK;
        if frac == 0.0 {
            self.history[newer]
        } else {
            self.history[newer] * (1.0 - frac) + self.history[older] * frac
        }
    }
}
