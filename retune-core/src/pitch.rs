//! # Pitch Detection Module
//!
//! This module implements the fundamental frequency estimator that drives
//! pitch correction. It uses the YIN difference method, tuned for a live
//! singing voice.
//!
//! ## Features
//! - YIN cumulative-mean-normalized difference function
//! - Octave error prevention by following the first dip to its true minimum
//! - Silence gate so quiet windows skip the O(N²) search entirely
//! - Parabolic interpolation for sub-sample accuracy
//! - Pre-allocated working buffer: estimation never allocates
//!
//! Implausible frequencies are *not* rejected here; the scale quantizer owns
//! the vocal range guard.

/// Absolute threshold on the normalized difference for a candidate period.
pub const YIN_THRESHOLD: f32 = 0.1;

/// RMS below which a window is treated as silence.
pub const DEFAULT_SILENCE_GATE: f32 = 1e-4;

/// YIN fundamental frequency estimator.
///
/// One estimator serves one analysis window size; the difference buffer is
/// sized for it at construction so [`PitchEstimator::estimate`] is safe to call
/// from the audio callback.
#[derive(Debug, Clone)]
pub struct PitchEstimator {
    yin_buffer: Vec<f32>,
    silence_gate: f32,
}

impl PitchEstimator {
    /// Creates an estimator for windows of `window_size` samples.
    pub fn new(window_size: usize) -> Self {
        Self {
            yin_buffer: vec![0.0; window_size / 2],
            silence_gate: DEFAULT_SILENCE_GATE,
        }
    }

    /// Overrides the RMS silence gate. A gate of 0 disables it.
    pub fn with_silence_gate(mut self, silence_gate: f32) -> Self {
        self.silence_gate = silence_gate.max(0.0);
        self
    }

    /// Window size this estimator was built for.
    pub fn window_size(&self) -> usize {
        self.yin_buffer.len() * 2
    }

    /// Estimates the fundamental frequency of `window`.
    ///
    /// # Arguments
    /// * `window` - The analysis window, oldest sample first
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Returns
    /// * The frequency in Hz, or `0.0` when no pitch is detected (silence,
    ///   noise, or a window too short to hold a period)
    pub fn estimate(&mut self, window: &[f32], sample_rate: u32) -> f32 {
        let half = (window.len() / 2).min(self.yin_buffer.len());
        if half < 3 || sample_rate == 0 {
            return 0.0;
        }

        // --- Silence gate (also rejects NaN input) ---
        let rms = (window.iter().map(|&s| s * s).sum::<f32>() / window.len() as f32).sqrt();
        if !(rms >= self.silence_gate) {
            return 0.0;
        }

        let yin = &mut self.yin_buffer[..half];

        // --- Step 1: Squared difference function ---
        yin[0] = 0.0;
        for tau in 1..half {
            let mut diff = 0.0;
            for j in 0..half {
                let delta = window[j] - window[j + tau];
                diff += delta * delta;
            }
            yin[tau] = diff;
        }

        // --- Step 2: Cumulative mean normalized difference ---
        let mut running_sum = 0.0;
        yin[0] = 1.0;
        for (tau, value) in yin.iter_mut().enumerate().skip(1) {
            running_sum += *value;
            if running_sum > 0.0 {
                *value *= tau as f32 / running_sum;
            } else {
                *value = 1.0;
            }
        }

        // --- Step 3: First sub-threshold dip, followed down to its minimum ---
        let Some(period) = first_minimum_below(yin, YIN_THRESHOLD) else {
            return 0.0;
        };

        // --- Step 4: Parabolic interpolation ---
        let refined = if period + 1 < half {
            parabolic_offset(yin[period - 1], yin[period], yin[period + 1])
                .map_or(period as f32, |shift| period as f32 + shift)
        } else {
            period as f32
        };

        let frequency = sample_rate as f32 / refined;
        if frequency.is_finite() && frequency > 0.0 {
            frequency
        } else {
            0.0
        }
    }
}

/// Scans upward from lag 2 for the first value under `threshold`, then keeps
/// walking while the curve is still decreasing.
fn first_minimum_below(yin: &[f32], threshold: f32) -> Option<usize> {
    let mut tau = 2;
    while tau < yin.len() {
        if yin[tau] < threshold {
            while tau + 1 < yin.len() && yin[tau + 1] < yin[tau] {
                tau += 1;
            }
            return Some(tau);
        }
        tau += 1;
    }
    None
}

/// Vertex offset of the parabola through three equally spaced points.
fn parabolic_offset(y1: f32, y2: f32, y3: f32) -> Option<f32> {
    let curvature = y1 - 2.0 * y2 + y3;
    if curvature.abs() <= f32::EPSILON {
        return None;
    }
    let shift = (y1 - y3) / (2.0 * curvature);
    shift.is_finite().then(|| shift.clamp(-1.0, 1.0))
}
