//! # Pitch-Shifting Resynthesis
//!
//! Two interchangeable strategies behind one block contract:
//!
//! - [`PhaseVocoder`] (default): STFT bin remapping with cepstral formant
//!   preservation. One frame of latency, no "chipmunk" timbre.
//! - [`GranularShifter`]: two crossfaded delay taps. Lower latency and cost,
//!   but formants move with the pitch and the formant control is ignored.
//!
//! Both report their latency and hand back a dry signal delayed by exactly
//! that latency, so partial wet/dry mixes stay phase-aligned.

pub mod granular;
pub mod vocoder;

use serde::{Deserialize, Serialize};

pub use granular::GranularShifter;
pub use vocoder::PhaseVocoder;

use crate::config::EngineConfig;
use crate::smoothing::SmoothedValue;

/// Magnitude above which the soft clipper starts bending. Anything within
/// full scale passes untouched.
pub const SOFT_CLIP_KNEE: f32 = 1.0;

/// How far past the knee the clipped output may reach.
pub const SOFT_CLIP_HEADROOM: f32 = 0.1;

/// Which resynthesis strategy the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResynthesisMode {
    #[default]
    PhaseVocoder,
    Granular,
}

#[derive(Debug)]
pub enum Resynthesizer {
    PhaseVocoder(PhaseVocoder),
    Granular(GranularShifter),
}

impl Resynthesizer {
    pub fn new(config: &EngineConfig, sample_rate: u32) -> Self {
        match config.resynthesis {
            ResynthesisMode::PhaseVocoder => Resynthesizer::PhaseVocoder(PhaseVocoder::new(
                config.fft_size,
                config.hop_size,
                sample_rate,
            )),
            ResynthesisMode::Granular => {
                Resynthesizer::Granular(GranularShifter::new(config.grain_size))
            }
        }
    }

    pub fn mode(&self) -> ResynthesisMode {
        match self {
            Resynthesizer::PhaseVocoder(_) => ResynthesisMode::PhaseVocoder,
            Resynthesizer::Granular(_) => ResynthesisMode::Granular,
        }
    }

    /// Added latency in samples, for both the wet and the dry path.
    pub fn latency(&self) -> usize {
        match self {
            Resynthesizer::PhaseVocoder(v) => v.latency(),
            Resynthesizer::Granular(g) => g.latency(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Resynthesizer::PhaseVocoder(v) => v.reset(),
            Resynthesizer::Granular(g) => g.reset(),
        }
    }

    pub fn set_formant_shift(&mut self, semitones: f32) {
        if let Resynthesizer::PhaseVocoder(v) = self {
            v.set_formant_shift(semitones);
        }
    }

    /// Shifts `input` by `ratio` into `wet`, writing the latency-aligned
    /// input to `dry`.
    pub fn process(&mut self, input: &[f32], ratio: f32, wet: &mut [f32], dry: &mut [f32]) {
        match self {
            Resynthesizer::PhaseVocoder(v) => v.process(input, ratio, wet, dry),
            Resynthesizer::Granular(g) => g.process(input, ratio, wet, dry),
        }
    }
}

/// Tanh soft clipper: transparent up to full scale, asymptotic to
/// `±(SOFT_CLIP_KNEE + SOFT_CLIP_HEADROOM)` above it.
#[inline]
pub fn soft_clip(sample: f32) -> f32 {
    let magnitude = sample.abs();
    if !(magnitude > SOFT_CLIP_KNEE) {
        return sample;
    }
    let over = (magnitude - SOFT_CLIP_KNEE) / SOFT_CLIP_HEADROOM;
    let bent = SOFT_CLIP_KNEE + SOFT_CLIP_HEADROOM * over.tanh();
    bent.copysign(sample)
}

/// `output = wet·mix + dry·(1 − mix)`, with `mix` ramped per sample, then
/// soft-clipped.
pub fn mix_block(output: &mut [f32], wet: &[f32], dry: &[f32], mix: &mut SmoothedValue) {
    for ((out, &w), &d) in output.iter_mut().zip(wet).zip(dry) {
        let m = mix.next_value();
        *out = soft_clip(w * m + d * (1.0 - m));
    }
}
