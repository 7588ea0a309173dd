//! Phase-vocoder pitch shifter with formant preservation.
//!
//! Streaming STFT with a periodic Hann window on both analysis and synthesis
//! and a hop of an eighth of the frame. Every hop the newest frame is:
//!
//! 1. analysed into magnitude and true frequency (phase difference against
//!    the previous frame, unwrapped around the bin's expected advance),
//! 2. divided by its cepstral envelope, leaving only the harmonic fine
//!    structure,
//! 3. remapped bin `k → round(k·ratio)`,
//! 4. multiplied by the envelope again, read at the *output* bin (moved by the
//!    formant ratio), so resonances stay where they were,
//! 5. resynthesised with accumulated phases and overlap-added into the output
//!    ring.
//!
//! With no pitch or formant shift the analysed spectrum is inverted untouched
//! and the synthesis phases follow the analysis phases, so unity is an exact
//! delay of one frame.

use std::f32::consts::TAU;

use rustfft::num_complex::Complex;

use crate::fft::{FftPair, SpectralEnvelope, hann_overlap_gain, hann_window, mirror_spectrum};

/// Ratios closer to unity than this count as "no shift".
const UNITY_TOLERANCE: f32 = 1e-4;

/// Lower bound on the envelope when flattening, avoids dividing by ~0.
const ENVELOPE_FLOOR: f32 = 1e-9;

/// Highest fundamental the envelope must not resolve, in Hz.
const MAX_FUNDAMENTAL: f32 = 1500.0;

pub struct PhaseVocoder {
    fft_size: usize,
    hop_size: usize,
    fft: FftPair,
    envelope: SpectralEnvelope,
    window: Vec<f32>,
    norm: f32,

    input_ring: Vec<f32>,
    output_ring: Vec<f32>,
    pos: usize,
    hop_counter: usize,

    frame: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    true_bins: Vec<f32>,
    last_phase: Vec<f32>,
    synth_phase: Vec<f32>,
    spectral_envelope: Vec<f32>,
    synth_magnitudes: Vec<f32>,
    synth_bins: Vec<f32>,
    strongest: Vec<f32>,

    formant_ratio: f32,
}

impl PhaseVocoder {
    /// # Arguments
    /// * `fft_size` - Frame length, a power of two
    /// * `hop_size` - Frame advance; `fft_size / hop_size` must be at least 4
    /// * `sample_rate` - Used to keep the envelope lifter below the shortest
    ///   vocal pitch period
    pub fn new(fft_size: usize, hop_size: usize, sample_rate: u32) -> Self {
        let bins = fft_size / 2 + 1;
        Self {
            fft_size,
            hop_size,
            fft: FftPair::new(fft_size),
            envelope: SpectralEnvelope::new(fft_size, lifter_for(fft_size, sample_rate)),
            window: hann_window(fft_size),
            norm: 1.0 / (fft_size as f32 * hann_overlap_gain(fft_size, hop_size)),
            input_ring: vec![0.0; fft_size],
            output_ring: vec![0.0; fft_size],
            pos: 0,
            hop_counter: 0,
            frame: vec![Complex::new(0.0, 0.0); fft_size],
            magnitudes: vec![0.0; bins],
            true_bins: vec![0.0; bins],
            last_phase: vec![0.0; bins],
            synth_phase: vec![0.0; bins],
            spectral_envelope: vec![1.0; bins],
            synth_magnitudes: vec![0.0; bins],
            synth_bins: vec![0.0; bins],
            strongest: vec![0.0; bins],
            formant_ratio: 1.0,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn latency(&self) -> usize {
        self.fft_size
    }

    /// Moves the re-imposed envelope by `semitones` (clamped to ±12).
    pub fn set_formant_shift(&mut self, semitones: f32) {
        let semitones = if semitones.is_finite() { semitones.clamp(-12.0, 12.0) } else { 0.0 };
        self.formant_ratio = 2.0_f32.powf(semitones / 12.0);
    }

    pub fn formant_ratio(&self) -> f32 {
        self.formant_ratio
    }

    pub fn reset(&mut self) {
        self.input_ring.fill(0.0);
        self.output_ring.fill(0.0);
        self.pos = 0;
        self.hop_counter = 0;
        self.last_phase.fill(0.0);
        self.synth_phase.fill(0.0);
    }

    /// Shifts one block.
    ///
    /// `wet` receives the shifted signal and `dry` the input delayed by one
    /// frame; both must be as long as `input`.
    pub fn process(&mut self, input: &[f32], ratio: f32, wet: &mut [f32], dry: &mut [f32]) {
        for ((&x, wet), dry) in input.iter().zip(wet.iter_mut()).zip(dry.iter_mut()) {
            *dry = self.input_ring[self.pos];
            self.input_ring[self.pos] = x;
            *wet = self.output_ring[self.pos];
            self.output_ring[self.pos] = 0.0;
            self.pos = (self.pos + 1) % self.fft_size;

            self.hop_counter += 1;
            if self.hop_counter == self.hop_size {
                self.hop_counter = 0;
                self.process_frame(ratio);
            }
        }
    }

    fn process_frame(&mut self, ratio: f32) {
        let n = self.fft_size;
        let half = n / 2;

        // `pos` now points at the oldest sample.
        for (i, (bin, &w)) in self.frame.iter_mut().zip(&self.window).enumerate() {
            *bin = Complex::new(self.input_ring[(self.pos + i) % n] * w, 0.0);
        }
        self.fft.forward(&mut self.frame);

        let expected = TAU * self.hop_size as f32 / n as f32;
        for k in 0..=half {
            let (magnitude, phase) = self.frame[k].to_polar();
            let deviation = wrap_phase(phase - self.last_phase[k] - k as f32 * expected);
            self.last_phase[k] = phase;
            self.magnitudes[k] = magnitude;
            self.true_bins[k] = k as f32 + deviation / expected;
        }

        if self.is_identity(ratio) {
            self.synth_phase.copy_from_slice(&self.last_phase);
        } else {
            self.shift_spectrum(ratio, expected);
        }

        self.fft.inverse(&mut self.frame);
        for (i, (bin, &w)) in self.frame.iter().zip(&self.window).enumerate() {
            self.output_ring[(self.pos + i) % n] += bin.re * w * self.norm;
        }
    }

    fn is_identity(&self, ratio: f32) -> bool {
        (ratio - 1.0).abs() < UNITY_TOLERANCE && (self.formant_ratio - 1.0).abs() < UNITY_TOLERANCE
    }

    fn shift_spectrum(&mut self, ratio: f32, expected: f32) {
        let half = self.fft_size / 2;

        self.envelope.estimate(&self.magnitudes, &mut self.spectral_envelope);

        self.synth_magnitudes.fill(0.0);
        self.strongest.fill(0.0);
        for (j, bin) in self.synth_bins.iter_mut().enumerate() {
            *bin = j as f32;
        }

        for k in 0..=half {
            let j = (k as f32 * ratio).round() as usize;
            if j > half {
                break;
            }
            let flat = self.magnitudes[k] / self.spectral_envelope[k].max(ENVELOPE_FLOOR);
            self.synth_magnitudes[j] += flat;
            if flat > self.strongest[j] {
                self.strongest[j] = flat;
                self.synth_bins[j] = self.true_bins[k] * ratio;
            }
        }

        for j in 0..=half {
            let envelope = sample_envelope(&self.spectral_envelope, j as f32 / self.formant_ratio);
            let magnitude = self.synth_magnitudes[j] * envelope;
            self.synth_phase[j] = wrap_phase(self.synth_phase[j] + expected * self.synth_bins[j]);
            self.frame[j] = Complex::from_polar(magnitude, self.synth_phase[j]);
        }
        mirror_spectrum(&mut self.frame);
    }
}

impl std::fmt::Debug for PhaseVocoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseVocoder")
            .field("fft_size", &self.fft_size)
            .field("hop_size", &self.hop_size)
            .field("formant_ratio", &self.formant_ratio)
            .finish()
    }
}

/// Cepstral coefficients kept: about `fft_size / 40`, and never as many as
/// the shortest vocal period in samples.
fn lifter_for(fft_size: usize, sample_rate: u32) -> usize {
    let by_size = fft_size / 40;
    let by_pitch = (0.8 * sample_rate as f32 / MAX_FUNDAMENTAL) as usize;
    by_size.min(by_pitch).max(4)
}

/// Linear interpolation into the envelope; positions past Nyquist hold the
/// last bin.
fn sample_envelope(envelope: &[f32], position: f32) -> f32 {
    let last = envelope.len() - 1;
    if position >= last as f32 {
        return envelope[last];
    }
    let index = position.max(0.0);
    let lower = index.floor() as usize;
    let frac = index - lower as f32;
    envelope[lower] * (1.0 - frac) + envelope[lower + 1] * frac
}

/// Wraps a phase into [-π, π].
fn wrap_phase(phase: f32) -> f32 {
    phase - TAU * (phase / TAU).round()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::PitchEstimator;

    const SAMPLE_RATE: u32 = 44_100;

    fn run(vocoder: &mut PhaseVocoder, input: &[f32], ratio: f32) -> (Vec<f32>, Vec<f32>) {
        let mut wet = vec![0.0; input.len()];
        let mut dry = vec![0.0; input.len()];
        for ((block, w), d) in input
            .chunks(256)
            .zip(wet.chunks_mut(256))
            .zip(dry.chunks_mut(256))
        {
            vocoder.process(block, ratio, w, d);
        }
        (wet, dry)
    }

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (TAU * freq * i as f32 / SAMPLE_RATE as f32).sin())
            .collect()
    }

    /// 200 Hz harmonic tone under a single formant peak at 1200 Hz.
    fn formant_voice(len: usize) -> Vec<f32> {
        let f0 = 200.0;
        let harmonics: Vec<(f32, f32, f32)> = (1..=20)
            .map(|h| {
                let freq = f0 * h as f32;
                let amplitude = (-((freq - 1200.0) / 600.0).powi(2)).exp() + 0.05;
                (freq, amplitude, 0.7 * (h * h) as f32)
            })
            .collect();
        (0..len)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                0.1 * harmonics
                    .iter()
                    .map(|&(f, a, p)| a * (TAU * f * t + p).sin())
                    .sum::<f32>()
            })
            .collect()
    }

    /// Energy centroid (Hz) of `signal` between 300 and 3500 Hz.
    fn spectral_centroid(signal: &[f32]) -> f32 {
        let size = 8192;
        let window = hann_window(size);
        let mut fft = FftPair::new(size);
        let mut buffer: Vec<Complex<f32>> = signal[..size]
            .iter()
            .zip(&window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        fft.forward(&mut buffer);

        let hz_per_bin = SAMPLE_RATE as f32 / size as f32;
        let (mut weighted, mut total) = (0.0, 0.0);
        for (bin, c) in buffer.iter().enumerate().take(size / 2) {
            let freq = bin as f32 * hz_per_bin;
            if (300.0..=3500.0).contains(&freq) {
                let energy = c.norm_sqr();
                weighted += freq * energy;
                total += energy;
            }
        }
        weighted / total
    }

    #[test]
    fn unity_is_an_exact_frame_delay() {
        let mut vocoder = PhaseVocoder::new(1024, 128, SAMPLE_RATE);
        let input: Vec<f32> = (0..8192)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                0.4 * (TAU * 233.0 * t).sin() + 0.2 * (TAU * 1711.3 * t).sin()
            })
            .collect();
        let (wet, dry) = run(&mut vocoder, &input, 1.0);

        let latency = vocoder.latency();
        assert_eq!(latency, 1024);
        for n in latency..input.len() {
            assert!((wet[n] - input[n - latency]).abs() < 1e-4, "sample {n}");
            assert_eq!(dry[n], input[n - latency]);
        }
    }

    #[test]
    fn shifts_a_sine() {
        for &(freq, ratio) in &[(220.0, 1.5), (440.0, 0.8), (300.0, 1.0595)] {
            let mut vocoder = PhaseVocoder::new(1024, 128, SAMPLE_RATE);
            let (wet, _) = run(&mut vocoder, &sine(freq, 16_384), ratio);

            let detected = PitchEstimator::new(2048).estimate(&wet[8192..10_240], SAMPLE_RATE);
            let expected = freq * ratio;
            assert!(
                (detected - expected).abs() / expected < 0.02,
                "ratio {ratio}: expected {expected} Hz, got {detected} Hz"
            );
        }
    }

    #[test]
    fn pitch_shift_keeps_the_formant_in_place() {
        let input = formant_voice(32_768);
        let original = spectral_centroid(&input[16_384..]);

        let mut vocoder = PhaseVocoder::new(1024, 128, SAMPLE_RATE);
        let (shifted, _) = run(&mut vocoder, &input, 1.25);
        let centroid = spectral_centroid(&shifted[16_384..]);

        // Without envelope correction the centroid would move by 25%.
        let drift = (centroid - original).abs() / original;
        assert!(drift < 0.10, "centroid {original} Hz -> {centroid} Hz");
    }

    #[test]
    fn formant_round_trip_restores_the_envelope() {
        let input = formant_voice(40_960);
        let original = spectral_centroid(&input[24_576..]);

        let mut up = PhaseVocoder::new(1024, 128, SAMPLE_RATE);
        let mut down = PhaseVocoder::new(1024, 128, SAMPLE_RATE);
        let (shifted, _) = run(&mut up, &input, 1.25);
        let (restored, _) = run(&mut down, &shifted, 0.8);
        let centroid = spectral_centroid(&restored[24_576..]);

        let drift = (centroid - original).abs() / original;
        assert!(drift < 0.10, "centroid {original} Hz -> {centroid} Hz");
    }

    #[test]
    fn formant_shift_moves_the_envelope() {
        let input = formant_voice(32_768);
        let original = spectral_centroid(&input[16_384..]);

        let mut vocoder = PhaseVocoder::new(1024, 128, SAMPLE_RATE);
        vocoder.set_formant_shift(5.0);
        let (shifted, _) = run(&mut vocoder, &input, 1.0);
        let centroid = spectral_centroid(&shifted[16_384..]);

        assert!(centroid > original * 1.12, "centroid {original} Hz -> {centroid} Hz");
    }

    #[test]
    fn silence_stays_silent() {
        let mut vocoder = PhaseVocoder::new(1024, 128, SAMPLE_RATE);
        vocoder.set_formant_shift(-3.0);
        let (wet, dry) = run(&mut vocoder, &vec![0.0; 4096], 1.3);
        assert!(wet.iter().chain(&dry).all(|&s| s == 0.0));
    }

    #[test]
    fn formant_shift_is_clamped() {
        let mut vocoder = PhaseVocoder::new(1024, 128, SAMPLE_RATE);
        vocoder.set_formant_shift(30.0);
        assert!((vocoder.formant_ratio() - 2.0).abs() < 1e-6);
        vocoder.set_formant_shift(f32::NAN);
        assert_eq!(vocoder.formant_ratio(), 1.0);
    }

    #[test]
    fn lifter_stays_below_vocal_periods() {
        assert_eq!(lifter_for(1024, 44_100), 23);
        assert_eq!(lifter_for(1024, 96_000), 25);
        assert_eq!(lifter_for(64, 8_000), 4);
    }

    #[test]
    fn wrap_phase_stays_in_range() {
        for &p in &[0.0, 3.0, -3.0, 7.0, -7.0, 100.0] {
            let w = wrap_phase(p);
            assert!(w.abs() <= std::f32::consts::PI + 1e-5);
            assert!(((p - w) / TAU - ((p - w) / TAU).round()).abs() < 1e-4);
        }
    }
}
