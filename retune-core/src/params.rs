//! User-facing parameters and their lock-free hand-off to the audio thread.
//!
//! [`EngineParams`] is the plain, serializable bundle presets store.
//! [`SharedParams`] is what actually sits between the threads: one atomic per
//! scalar and an [`ArcSwap`] holding the prebuilt scale table. The control
//! side stores, the audio side loads everything once per block through
//! [`SharedParams::snapshot`]; latest value wins and nothing ever blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use arc_swap::{ArcSwap, Guard};
use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};

use crate::correction::{CorrectionMode, CorrectionSettings};
use crate::tuning::{Key, Scale, ScaleContext, ScaleTable};

pub const MAX_FORMANT_SHIFT: f32 = 12.0;

/// The full parameter set, in user units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    pub mode: CorrectionMode,
    /// 0 (instant) to 100 (slow).
    pub retune_speed: f32,
    /// 0 to 100.
    pub humanize: f32,
    /// Semitones, -12 to 12.
    pub formant_shift: f32,
    /// Wet percentage, 0 to 100.
    pub mix: f32,
    pub key: Key,
    pub scale: Scale,
    pub bypass: bool,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            mode: CorrectionMode::Classic,
            retune_speed: 25.0,
            humanize: 0.0,
            formant_shift: 0.0,
            mix: 100.0,
            key: Key::C,
            scale: Scale::Chromatic,
            bypass: false,
        }
    }
}

impl EngineParams {
    /// Returns a copy with every scalar forced into range. Non-finite values
    /// fall back to the defaults.
    pub fn clamped(&self) -> Self {
        let defaults = Self::default();
        Self {
            retune_speed: clamp_or(self.retune_speed, 0.0, 100.0, defaults.retune_speed),
            humanize: clamp_or(self.humanize, 0.0, 100.0, defaults.humanize),
            formant_shift: clamp_or(
                self.formant_shift,
                -MAX_FORMANT_SHIFT,
                MAX_FORMANT_SHIFT,
                defaults.formant_shift,
            ),
            mix: clamp_or(self.mix, 0.0, 100.0, defaults.mix),
            scale: match &self.scale {
                Scale::Custom(pattern) => Scale::custom(pattern),
                named => named.clone(),
            },
            ..self.clone()
        }
    }
}

/// Parameters as the audio thread consumes them for one block.
pub struct ParamSnapshot {
    pub correction: CorrectionSettings,
    pub formant_shift: f32,
    /// Wet fraction, 0 to 1. Already zero when bypassed.
    pub mix: f32,
    pub scale_table: Guard<Arc<ScaleTable>>,
}

/// Parameter block shared between an engine and its handle.
#[derive(Debug)]
pub struct SharedParams {
    mode: AtomicU8,
    retune_speed: AtomicF32,
    humanize: AtomicF32,
    formant_shift: AtomicF32,
    mix: AtomicF32,
    bypass: AtomicBool,
    scale_table: ArcSwap<ScaleTable>,
}

impl SharedParams {
    pub fn new(params: &EngineParams) -> Self {
        let params = params.clamped();
        let table = ScaleTable::new(ScaleContext::new(params.key, params.scale.clone()));
        Self {
            mode: AtomicU8::new(params.mode.to_u8()),
            retune_speed: AtomicF32::new(params.retune_speed),
            humanize: AtomicF32::new(params.humanize),
            formant_shift: AtomicF32::new(params.formant_shift),
            mix: AtomicF32::new(params.mix),
            bypass: AtomicBool::new(params.bypass),
            scale_table: ArcSwap::from_pointee(table),
        }
    }

    pub fn set_mode(&self, mode: CorrectionMode) {
        self.mode.store(mode.to_u8(), Ordering::Release);
    }

    pub fn set_retune_speed(&self, value: f32) {
        store_clamped(&self.retune_speed, value, 0.0, 100.0, "retune speed");
    }

    pub fn set_humanize(&self, value: f32) {
        store_clamped(&self.humanize, value, 0.0, 100.0, "humanize");
    }

    pub fn set_formant_shift(&self, semitones: f32) {
        store_clamped(
            &self.formant_shift,
            semitones,
            -MAX_FORMANT_SHIFT,
            MAX_FORMANT_SHIFT,
            "formant shift",
        );
    }

    pub fn set_mix(&self, value: f32) {
        store_clamped(&self.mix, value, 0.0, 100.0, "mix");
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.store(bypass, Ordering::Release);
    }

    /// Builds the frequency table for `key`/`scale` on the calling thread and
    /// publishes it in one atomic swap.
    pub fn set_key_and_scale(&self, key: Key, scale: Scale) {
        let table = ScaleTable::new(ScaleContext::new(key, scale));
        self.scale_table.store(Arc::new(table));
    }

    pub fn apply(&self, params: &EngineParams) {
        let params = params.clamped();
        self.set_mode(params.mode);
        self.set_retune_speed(params.retune_speed);
        self.set_humanize(params.humanize);
        self.set_formant_shift(params.formant_shift);
        self.set_mix(params.mix);
        self.set_bypass(params.bypass);
        if *self.scale_table.load().context() != ScaleContext::new(params.key, params.scale.clone()) {
            self.set_key_and_scale(params.key, params.scale);
        }
    }

    /// Current values in user units.
    pub fn params(&self) -> EngineParams {
        let context = self.scale_table.load().context().clone();
        EngineParams {
            mode: CorrectionMode::from_u8(self.mode.load(Ordering::Acquire)),
            retune_speed: self.retune_speed.load(Ordering::Acquire),
            humanize: self.humanize.load(Ordering::Acquire),
            formant_shift: self.formant_shift.load(Ordering::Acquire),
            mix: self.mix.load(Ordering::Acquire),
            key: context.key,
            scale: context.scale,
            bypass: self.bypass.load(Ordering::Acquire),
        }
    }

    /// Loads every parameter for one block. Never blocks or allocates.
    pub fn snapshot(&self) -> ParamSnapshot {
        let bypass = self.bypass.load(Ordering::Acquire);
        let mix = if bypass {
            0.0
        } else {
            self.mix.load(Ordering::Acquire) / 100.0
        };
        ParamSnapshot {
            correction: CorrectionSettings {
                mode: CorrectionMode::from_u8(self.mode.load(Ordering::Acquire)),
                retune_speed: self.retune_speed.load(Ordering::Acquire) / 100.0,
                humanize: self.humanize.load(Ordering::Acquire) / 100.0,
                bypass,
            },
            formant_shift: self.formant_shift.load(Ordering::Acquire),
            mix,
            scale_table: self.scale_table.load(),
        }
    }
}

impl Default for SharedParams {
    fn default() -> Self {
        Self::new(&EngineParams::default())
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() { value.clamp(min, max) } else { fallback }
}

fn store_clamped(target: &AtomicF32, value: f32, min: f32, max: f32, name: &str) {
    if !value.is_finite() {
        log::warn!("ignoring non-finite {name}: {value}");
        return;
    }
    target.store(value.clamp(min, max), Ordering::Release);
}
