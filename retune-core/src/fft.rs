//! # Fast Fourier Transform (FFT) Module
//!
//! FFT plumbing shared by the phase vocoder: window generation, a planned
//! forward/inverse transform pair with its own scratch space, and the
//! cepstral spectral-envelope estimator used for formant preservation.
//!
//! ## Features
//! - High-performance FFT using RustFFT, planned once per size
//! - Periodic Hann windows for overlap-add reconstruction
//! - In-place transforms with pre-allocated scratch (no per-frame allocation)
//! - Real-cepstrum envelope with a configurable lifter

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// Floor added to magnitudes before taking logs.
const LOG_FLOOR: f32 = 1e-9;

/// Periodic Hann window of `size` samples.
///
/// The periodic form (denominator `size`, not `size - 1`) sums to a constant
/// under overlap-add at any hop that divides `size / 4`.
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Sum of `w[n + m·hop]²` over all frames for a periodic Hann window.
///
/// This is the gain a Hann-analysis/Hann-synthesis overlap-add applies, and
/// holds whenever `size / hop` is an integer of at least 4.
pub fn hann_overlap_gain(size: usize, hop: usize) -> f32 {
    0.375 * size as f32 / hop as f32
}

/// Restores Hermitian symmetry so the inverse transform is real.
///
/// Bins `0..=len/2` are the source of truth; the upper half is overwritten
/// with their conjugates.
pub fn mirror_spectrum(spectrum: &mut [Complex<f32>]) {
    let len = spectrum.len();
    let half = len / 2;
    spectrum[0].im = 0.0;
    spectrum[half].im = 0.0;
    for bin in 1..half {
        spectrum[len - bin] = spectrum[bin].conj();
    }
}

/// A planned forward/inverse FFT pair of one size.
///
/// Transforms are unnormalized, like RustFFT's: a forward followed by an
/// inverse scales the signal by `size`.
pub struct FftPair {
    size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl FftPair {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Self {
            size,
            forward,
            inverse,
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn forward(&mut self, buffer: &mut [Complex<f32>]) {
        self.forward.process_with_scratch(buffer, &mut self.scratch);
    }

    pub fn inverse(&mut self, buffer: &mut [Complex<f32>]) {
        self.inverse.process_with_scratch(buffer, &mut self.scratch);
    }
}

impl std::fmt::Debug for FftPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftPair").field("size", &self.size).finish()
    }
}

/// Smoothed spectral envelope estimator (real cepstrum, low-time lifter).
///
/// The log magnitude spectrum is taken to the quefrency domain, every
/// coefficient beyond `lifter` is zeroed, and the result is transformed back.
/// Keeping only the low quefrencies removes the harmonic comb of the voice
/// and leaves the resonances: the formant shape.
#[derive(Debug)]
pub struct SpectralEnvelope {
    fft: FftPair,
    cepstrum: Vec<Complex<f32>>,
    lifter: usize,
}

impl SpectralEnvelope {
    /// # Arguments
    /// * `fft_size` - Transform size; magnitudes have `fft_size / 2 + 1` bins
    /// * `lifter` - Number of cepstral coefficients kept (clamped to the
    ///   valid range). It must stay below the shortest pitch period in
    ///   samples or the envelope starts tracing individual harmonics.
    pub fn new(fft_size: usize, lifter: usize) -> Self {
        Self {
            fft: FftPair::new(fft_size),
            cepstrum: vec![Complex::new(0.0, 0.0); fft_size],
            lifter: lifter.clamp(1, fft_size / 2),
        }
    }

    pub fn lifter(&self) -> usize {
        self.lifter
    }

    /// Estimates the envelope of `magnitudes` into `envelope`.
    ///
    /// Both slices hold `fft_size / 2 + 1` bins.
    pub fn estimate(&mut self, magnitudes: &[f32], envelope: &mut [f32]) {
        let size = self.fft.size();
        let half = size / 2;

        for (bin, &mag) in magnitudes.iter().enumerate().take(half + 1) {
            self.cepstrum[bin] = Complex::new((mag + LOG_FLOOR).ln(), 0.0);
        }
        mirror_spectrum(&mut self.cepstrum);

        self.fft.inverse(&mut self.cepstrum);

        // Low-time lifter, symmetric around zero quefrency.
        for q in self.lifter..=size - self.lifter {
            self.cepstrum[q] = Complex::new(0.0, 0.0);
        }

        self.fft.forward(&mut self.cepstrum);

        let norm = 1.0 / size as f32;
        for (bin, env) in envelope.iter_mut().enumerate().take(half + 1) {
            *env = (self.cepstrum[bin].re * norm).exp();
        }
    }
}
