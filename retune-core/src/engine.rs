//! # Engine
//!
//! The real-time pitch correction pipeline and its control handle.
//!
//! [`Engine::new`] returns two halves:
//!
//! - [`Engine`] lives on the audio thread. `process_block` runs frame buffer
//!   → pitch estimate → scale quantizer → correction controller →
//!   resynthesizer → wet/dry mix, all on pre-allocated buffers.
//! - [`EngineHandle`] lives on the control (UI) thread. Its setters store
//!   into shared atomics that the engine reads once per block; its getters
//!   read the meters and the pitch history the engine publishes.
//!
//! No panic crosses `process_block`: a panic or a non-finite output sample
//! restores the dry input for that block, counts a fault and resets the DSP.

use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::correction::{CorrectionController, CorrectionMode};
use crate::error::{Error, Result};
use crate::frame::FrameBuffer;
use crate::params::{EngineParams, SharedParams};
use crate::pitch::PitchEstimator;
use crate::resynth::{Resynthesizer, mix_block};
use crate::smoothing::{DEFAULT_RAMP_MS, SmoothedValue};
use crate::telemetry::{
    BlockReport, Meters, TelemetryReader, TelemetrySample, TelemetryWriter, display_level, rms,
    telemetry_channel,
};
use crate::tuning::{
    Key, MIN_VOCAL_FREQUENCY, NoteLabel, Scale, calculate_cents_deviation, frequency_to_midi,
};

/// Audio-thread half of the engine.
pub struct Engine {
    config: EngineConfig,
    sample_rate: u32,
    params: Arc<SharedParams>,
    meters: Arc<Meters>,
    telemetry: TelemetryWriter,

    frame: FrameBuffer,
    window: Vec<f32>,
    estimator: PitchEstimator,
    controller: CorrectionController,
    resynth: Resynthesizer,
    mix: SmoothedValue,
    formant_shift: f32,

    scratch_in: Vec<f32>,
    wet: Vec<f32>,
    dry: Vec<f32>,
    samples_processed: u64,
}

/// Control-thread half of the engine.
pub struct EngineHandle {
    params: Arc<SharedParams>,
    meters: Arc<Meters>,
    telemetry: TelemetryReader,
}

impl Engine {
    /// Builds an engine with default parameters.
    ///
    /// # Errors
    /// * [`Error::InvalidConfig`] when the config fails validation or the
    ///   sample rate is zero
    pub fn new(sample_rate: u32, config: EngineConfig) -> Result<(Engine, EngineHandle)> {
        Self::with_params(sample_rate, config, &EngineParams::default())
    }

    /// Builds an engine starting from `params` (e.g. a loaded preset).
    pub fn with_params(
        sample_rate: u32,
        config: EngineConfig,
        params: &EngineParams,
    ) -> Result<(Engine, EngineHandle)> {
        config.validate()?;
        if sample_rate == 0 {
            return Err(Error::InvalidConfig("sample rate must be non-zero".into()));
        }

        let shared = Arc::new(SharedParams::new(params));
        let meters = Arc::new(Meters::new());
        let (writer, reader) = telemetry_channel(config.history_window_ms, config.history_capacity);

        let initial = shared.snapshot();
        let window_size = analysis_window_for(config.analysis_window, sample_rate);
        let mut resynth = Resynthesizer::new(&config, sample_rate);
        resynth.set_formant_shift(initial.formant_shift);

        log::info!(
            "engine ready: {} Hz, {:?} resynthesis, {} samples latency",
            sample_rate,
            resynth.mode(),
            resynth.latency()
        );

        let engine = Engine {
            sample_rate,
            params: Arc::clone(&shared),
            meters: Arc::clone(&meters),
            telemetry: writer,
            frame: FrameBuffer::new(window_size),
            window: vec![0.0; window_size],
            estimator: PitchEstimator::new(window_size),
            controller: CorrectionController::new(),
            resynth,
            mix: SmoothedValue::new(initial.mix, DEFAULT_RAMP_MS, sample_rate),
            formant_shift: initial.formant_shift,
            scratch_in: vec![0.0; config.max_block_size],
            wet: vec![0.0; config.max_block_size],
            dry: vec![0.0; config.max_block_size],
            samples_processed: 0,
            config,
        };
        let handle = EngineHandle {
            params: shared,
            meters,
            telemetry: reader,
        };
        Ok((engine, handle))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples in the pitch analysis window actually in use. This is the
    /// configured size, grown if needed to reach the lowest vocal pitch.
    pub fn analysis_window(&self) -> usize {
        self.frame.capacity()
    }

    /// Delay between input and output, in samples.
    pub fn latency(&self) -> usize {
        self.resynth.latency()
    }

    /// Processes `block` in place.
    ///
    /// Blocks longer than `max_block_size` are processed in consecutive
    /// chunks. A `sample_rate` different from the current one rebuilds the
    /// rate-dependent state first; that is the only path that allocates.
    pub fn process_block(&mut self, block: &mut [f32], sample_rate: u32) {
        if sample_rate != self.sample_rate && sample_rate > 0 {
            self.reconfigure(sample_rate);
        }
        for chunk in block.chunks_mut(self.config.max_block_size) {
            self.process_chunk(chunk);
        }
    }

    /// Processes `input` into `output`. Only the common length is written.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], sample_rate: u32) {
        let len = input.len().min(output.len());
        output[..len].copy_from_slice(&input[..len]);
        self.process_block(&mut output[..len], sample_rate);
    }

    /// Clears all signal history and correction state.
    pub fn reset(&mut self) {
        self.frame.reset();
        self.controller.reset();
        self.resynth.reset();
        self.mix.set_immediate(self.params.snapshot().mix);
    }

    fn reconfigure(&mut self, sample_rate: u32) {
        log::info!(
            "sample rate changed from {} Hz to {} Hz, rebuilding resynthesizer",
            self.sample_rate,
            sample_rate
        );
        self.sample_rate = sample_rate;
        self.resynth = Resynthesizer::new(&self.config, sample_rate);
        self.resynth.set_formant_shift(self.formant_shift);
        self.mix.set_ramp(DEFAULT_RAMP_MS, sample_rate);

        let window_size = analysis_window_for(self.config.analysis_window, sample_rate);
        if window_size != self.frame.capacity() {
            self.frame = FrameBuffer::new(window_size);
            self.window = vec![0.0; window_size];
            self.estimator = PitchEstimator::new(window_size);
        }
        self.frame.reset();
        self.controller.reset();
    }

    fn process_chunk(&mut self, chunk: &mut [f32]) {
        let len = chunk.len();
        self.scratch_in[..len].copy_from_slice(chunk);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_pipeline(chunk)));
        let healthy = outcome.is_ok() && chunk.iter().all(|s| s.is_finite());

        if !healthy {
            for (out, &dry) in chunk.iter_mut().zip(&self.scratch_in[..len]) {
                *out = if dry.is_finite() { dry } else { 0.0 };
            }
            self.meters.record_fault();
            self.reset();
        }
        self.samples_processed += len as u64;
    }

    fn run_pipeline(&mut self, block: &mut [f32]) {
        let len = block.len();
        let params = self.params.snapshot();

        // --- Analysis ---
        self.frame.push_slice(block);
        self.frame.copy_window(&mut self.window);
        // A half-filled window is mostly zeros and gives spurious periods.
        let detected = if self.frame.is_full() {
            self.estimator.estimate(&self.window, self.sample_rate)
        } else {
            0.0
        };
        let note = params.scale_table.quantize(detected);

        // --- Correction ---
        let ratio = self.controller.update(note.as_ref(), &params.correction);

        // --- Resynthesis ---
        if params.formant_shift != self.formant_shift {
            self.formant_shift = params.formant_shift;
            self.resynth.set_formant_shift(self.formant_shift);
        }
        self.resynth
            .process(block, ratio, &mut self.wet[..len], &mut self.dry[..len]);
        self.mix.set_target(params.mix);
        mix_block(block, &self.wet[..len], &self.dry[..len], &mut self.mix);

        // --- Telemetry ---
        let corrected = if detected > 0.0 { detected * ratio } else { 0.0 };
        let report = BlockReport {
            detected_frequency: detected,
            corrected_frequency: corrected,
            detected_note: frequency_to_midi(detected).map(NoteLabel::from_midi),
            corrected_note: note.map(|n| NoteLabel {
                name: n.note_name,
                octave: n.octave,
            }),
            pitch_error_cents: note
                .map_or(0.0, |n| calculate_cents_deviation(corrected, n.target_frequency)),
            input_level: display_level(rms(&self.window)),
            output_level: display_level(rms(block)),
            current_ratio: ratio,
        };
        self.meters.publish(&report);

        let end = self.samples_processed + len as u64;
        self.telemetry.push(TelemetrySample {
            input_hz: detected,
            corrected_hz: corrected,
            timestamp_ms: end as f64 * 1000.0 / self.sample_rate as f64,
        });
    }
}

/// Grows `configured` until the lag search (half the window, plus one lag
/// for interpolation) covers the period of the lowest vocal frequency.
fn analysis_window_for(configured: usize, sample_rate: u32) -> usize {
    let longest_period = (sample_rate as f32 / MIN_VOCAL_FREQUENCY).ceil() as usize;
    let required = 2 * (longest_period + 2);
    if required > configured {
        log::info!(
            "analysis window grown from {configured} to {required} samples for {sample_rate} Hz"
        );
    }
    configured.max(required)
}

impl EngineHandle {
    pub fn set_correction_mode(&self, mode: CorrectionMode) {
        self.params.set_mode(mode);
    }

    /// 0 (instant) to 100 (slow).
    pub fn set_retune_speed(&self, value: f32) {
        self.params.set_retune_speed(value);
    }

    /// 0 to 100.
    pub fn set_humanize(&self, value: f32) {
        self.params.set_humanize(value);
    }

    /// Semitones, -12 to 12.
    pub fn set_formant_shift(&self, semitones: f32) {
        self.params.set_formant_shift(semitones);
    }

    /// Wet percentage, 0 to 100.
    pub fn set_mix(&self, value: f32) {
        self.params.set_mix(value);
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.params.set_bypass(bypass);
    }

    /// Rebuilds the scale table on this thread and swaps it in.
    pub fn set_key_and_scale(&self, key: Key, scale: Scale) {
        self.params.set_key_and_scale(key, scale);
    }

    /// Parses `key` and `scale` names and applies them.
    ///
    /// An unparsable key falls back to C and an unknown scale to chromatic;
    /// the fallback is applied either way and the first parse error returned.
    pub fn set_key_and_scale_by_name(&self, key: &str, scale: &str) -> Result<()> {
        let mut first_error = None;

        let key = Key::from_str(key).unwrap_or_else(|err| {
            log::warn!("{err}, falling back to C");
            first_error.get_or_insert(err);
            Key::C
        });
        let scale = Scale::from_name(scale).unwrap_or_else(|err| {
            log::warn!("{err}, falling back to chromatic");
            first_error.get_or_insert(err);
            Scale::Chromatic
        });

        self.set_key_and_scale(key, scale);
        first_error.map_or(Ok(()), Err)
    }

    pub fn apply_params(&self, params: &EngineParams) {
        self.params.apply(params);
    }

    pub fn params(&self) -> EngineParams {
        self.params.params()
    }

    pub fn detected_frequency(&self) -> f32 {
        self.meters.detected_frequency()
    }

    pub fn detected_note(&self) -> Option<NoteLabel> {
        self.meters.detected_note()
    }

    pub fn corrected_frequency(&self) -> f32 {
        self.meters.corrected_frequency()
    }

    /// The scale note the engine is correcting toward, if any.
    pub fn corrected_note(&self) -> Option<NoteLabel> {
        self.meters.corrected_note()
    }

    /// Residual error of the corrected pitch against its target note.
    pub fn pitch_error_cents(&self) -> f32 {
        self.meters.pitch_error_cents()
    }

    pub fn input_level(&self) -> f32 {
        self.meters.input_level()
    }

    pub fn output_level(&self) -> f32 {
        self.meters.output_level()
    }

    pub fn current_ratio(&self) -> f32 {
        self.meters.current_ratio()
    }

    /// Blocks that faulted and were passed through dry.
    pub fn fault_count(&self) -> u64 {
        self.meters.fault_count()
    }

    /// Recent (input, corrected) pitch samples, oldest first.
    pub fn pitch_history_snapshot(&mut self) -> Vec<TelemetrySample> {
        self.telemetry.snapshot()
    }
}
