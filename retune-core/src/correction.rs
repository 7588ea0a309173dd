//! # Correction Controller
//!
//! Turns a quantized note into the pitch ratio handed to the resynthesizer.
//! Two correction characters are available:
//!
//! - **Classic**: near-full correction strength and a small smoothing
//!   coefficient, so the ratio converges within a few blocks (the audible
//!   "snap").
//! - **Modern**: a flex-tune deadband leaves small deviations (vibrato,
//!   scoops) untouched; larger ones are corrected more gently and glide.
//!
//! Both modes share one exponential moving average on the persistent ratio,
//! which is the only thing that moves it. Humanize jitter is added on the way
//! out and never fed back into that state.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::tuning::QuantizedNote;

/// Lowest ratio ever handed to the resynthesizer (one octave down).
pub const MIN_RATIO: f32 = 0.5;

/// Highest ratio ever handed to the resynthesizer (one octave up).
pub const MAX_RATIO: f32 = 2.0;

/// Peak humanize jitter at full amount, as a fraction of the ratio.
pub const MAX_HUMANIZE_DEPTH: f32 = 0.01;

/// Per-block glide of the humanize random walk.
const HUMANIZE_GLIDE: f32 = 0.1;

const HUMANIZE_SEED: u64 = 0x5eed_7a9e;

/// Correction character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CorrectionMode {
    /// Hard, fast correction.
    #[default]
    Classic,
    /// Transparent correction with a flex-tune deadband.
    Modern,
}

impl CorrectionMode {
    /// Fraction of the raw correction applied.
    pub fn strength(self, retune_speed: f32) -> f32 {
        match self {
            CorrectionMode::Classic => 1.0 - 0.15 * retune_speed,
            CorrectionMode::Modern => 0.35 + 0.5 * (1.0 - retune_speed),
        }
    }

    /// Smoothing coefficient `s` in `current += (target − current)·(1 − s)`.
    pub fn smoothing(self, retune_speed: f32) -> f32 {
        match self {
            CorrectionMode::Classic => 0.05 + 0.35 * retune_speed,
            CorrectionMode::Modern => 0.6 + 0.3 * retune_speed,
        }
    }

    /// Deviation (cents) under which no correction is applied.
    pub fn deadband_cents(self, retune_speed: f32) -> Option<f32> {
        match self {
            CorrectionMode::Classic => None,
            CorrectionMode::Modern => Some(10.0 + 40.0 * retune_speed),
        }
    }

    /// Unsmoothed target ratio for a note at the given retune speed.
    pub fn target_ratio(self, note: &QuantizedNote, retune_speed: f32) -> f32 {
        if let Some(deadband) = self.deadband_cents(retune_speed) {
            if note.cents_deviation.abs() < deadband {
                return 1.0;
            }
        }
        1.0 + (note.raw_ratio - 1.0) * self.strength(retune_speed)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            CorrectionMode::Classic => 0,
            CorrectionMode::Modern => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CorrectionMode::Modern,
            _ => CorrectionMode::Classic,
        }
    }
}

/// Per-block controller inputs, normalized to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CorrectionSettings {
    pub mode: CorrectionMode,
    pub retune_speed: f32,
    pub humanize: f32,
    pub bypass: bool,
}

/// Persistent correction state, advanced once per block.
#[derive(Debug, Clone)]
pub struct CorrectionController {
    mode: CorrectionMode,
    current_ratio: f32,
    target_ratio: f32,
    jitter: f32,
    rng: SmallRng,
}

impl CorrectionController {
    pub fn new() -> Self {
        Self {
            mode: CorrectionMode::default(),
            current_ratio: 1.0,
            target_ratio: 1.0,
            jitter: 0.0,
            rng: SmallRng::seed_from_u64(HUMANIZE_SEED),
        }
    }

    pub fn mode(&self) -> CorrectionMode {
        self.mode
    }

    /// Smoothed ratio, before humanize jitter.
    pub fn current_ratio(&self) -> f32 {
        self.current_ratio
    }

    pub fn target_ratio(&self) -> f32 {
        self.target_ratio
    }

    /// Advances one block and returns the ratio for the resynthesizer.
    ///
    /// # Arguments
    /// * `note` - The quantized note, or `None` when there is no target
    ///   (silence or out-of-range pitch)
    /// * `settings` - Mode, retune speed, humanize and bypass for this block
    ///
    /// # Returns
    /// * A finite ratio within [`MIN_RATIO`, `MAX_RATIO`]
    pub fn update(&mut self, note: Option<&QuantizedNote>, settings: &CorrectionSettings) -> f32 {
        let retune_speed = unit(settings.retune_speed);
        self.mode = settings.mode;

        let target = match note {
            Some(note) if !settings.bypass => self.mode.target_ratio(note, retune_speed),
            _ => 1.0,
        };
        self.step(target, self.mode.smoothing(retune_speed));

        let jitter = self.next_jitter(unit(settings.humanize));
        let ratio = self.current_ratio * (1.0 + jitter);
        ratio.clamp(MIN_RATIO, MAX_RATIO)
    }

    fn step(&mut self, target: f32, smoothing: f32) {
        self.target_ratio = sanitize_ratio(target);
        self.current_ratio += (self.target_ratio - self.current_ratio) * (1.0 - smoothing);
        self.current_ratio = sanitize_ratio(self.current_ratio);
    }

    /// Low-passed random walk in [-depth, depth].
    fn next_jitter(&mut self, humanize: f32) -> f32 {
        if humanize <= 0.0 {
            self.jitter = 0.0;
            return 0.0;
        }
        let noise: f32 = self.rng.gen_range(-1.0..=1.0);
        self.jitter += (noise - self.jitter) * HUMANIZE_GLIDE;
        self.jitter * MAX_HUMANIZE_DEPTH * humanize
    }

    pub fn reset(&mut self) {
        self.current_ratio = 1.0;
        self.target_ratio = 1.0;
        self.jitter = 0.0;
    }
}

impl Default for CorrectionController {
    fn default() -> Self {
        Self::new()
    }
}

fn unit(value: f32) -> f32 {
    if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 }
}

fn sanitize_ratio(ratio: f32) -> f32 {
    if ratio.is_finite() {
        ratio.clamp(MIN_RATIO, MAX_RATIO)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::calculate_cents_deviation;
    use proptest::prelude::*;

    fn note_for(input_hz: f32, target_hz: f32) -> QuantizedNote {
        QuantizedNote {
            note_name: "A",
            pitch_class: 9,
            octave: 4,
            target_frequency: target_hz,
            cents_deviation: calculate_cents_deviation(input_hz, target_hz),
            raw_ratio: target_hz / input_hz,
        }
    }

    fn settings(mode: CorrectionMode, retune_speed: f32) -> CorrectionSettings {
        CorrectionSettings {
            mode,
            retune_speed,
            ..Default::default()
        }
    }

    #[test]
    fn classic_converges_on_the_note() {
        let mut controller = CorrectionController::new();
        let note = note_for(430.0, 440.0);
        let mut ratio = 1.0;
        for _ in 0..50 {
            ratio = controller.update(Some(&note), &settings(CorrectionMode::Classic, 0.0));
        }
        assert!((ratio - note.raw_ratio).abs() < 1e-5, "ratio {ratio}");
    }

    #[test]
    fn classic_snaps_faster_than_modern_glides() {
        let note = note_for(415.0, 440.0);
        let mut classic = CorrectionController::new();
        let mut modern = CorrectionController::new();
        for _ in 0..3 {
            classic.update(Some(&note), &settings(CorrectionMode::Classic, 0.3));
            modern.update(Some(&note), &settings(CorrectionMode::Modern, 0.3));
        }
        let classic_progress = (classic.current_ratio() - 1.0) / (note.raw_ratio - 1.0);
        let modern_progress = (modern.current_ratio() - 1.0) / (note.raw_ratio - 1.0);
        assert!(classic_progress > 0.8);
        assert!(modern_progress < classic_progress);
    }

    #[test]
    fn modern_deadband_preserves_small_deviations() {
        let mut controller = CorrectionController::new();
        // 8 cents sharp sits inside even the narrowest deadband.
        let note = note_for(440.0 * 2f32.powf(8.0 / 1200.0), 440.0);
        for _ in 0..20 {
            controller.update(Some(&note), &settings(CorrectionMode::Modern, 0.0));
        }
        assert_eq!(controller.current_ratio(), 1.0);

        // 30 cents is inside the deadband at full speed but not at zero.
        let note = note_for(440.0 * 2f32.powf(30.0 / 1200.0), 440.0);
        controller.update(Some(&note), &settings(CorrectionMode::Modern, 1.0));
        assert_eq!(controller.target_ratio(), 1.0);
        controller.update(Some(&note), &settings(CorrectionMode::Modern, 0.0));
        assert!(controller.target_ratio() < 1.0);
    }

    #[test]
    fn no_target_relaxes_to_unity() {
        let mut controller = CorrectionController::new();
        let note = note_for(400.0, 440.0);
        for _ in 0..10 {
            controller.update(Some(&note), &settings(CorrectionMode::Classic, 0.0));
        }
        for _ in 0..200 {
            controller.update(None, &settings(CorrectionMode::Classic, 0.0));
        }
        assert!((controller.current_ratio() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_ratios_never_escape() {
        let mut controller = CorrectionController::new();
        let mut note = note_for(440.0, 440.0);
        note.raw_ratio = f32::NAN;
        let ratio = controller.update(Some(&note), &settings(CorrectionMode::Classic, 0.0));
        assert_eq!(ratio, 1.0);

        note.raw_ratio = 50.0;
        note.cents_deviation = -5000.0;
        for _ in 0..100 {
            let ratio = controller.update(Some(&note), &settings(CorrectionMode::Classic, 0.0));
            assert!(ratio <= MAX_RATIO);
        }
        assert!((controller.current_ratio() - MAX_RATIO).abs() < 1e-5);
    }

    #[test]
    fn humanize_jitter_is_small_and_off_by_default() {
        let note = note_for(440.0, 440.0);
        let mut plain = CorrectionController::new();
        let mut human = CorrectionController::new();
        let humanized = CorrectionSettings {
            humanize: 1.0,
            ..settings(CorrectionMode::Classic, 0.0)
        };

        let mut moved = false;
        for _ in 0..100 {
            assert_eq!(plain.update(Some(&note), &settings(CorrectionMode::Classic, 0.0)), 1.0);
            let ratio = human.update(Some(&note), &humanized);
            assert!((ratio - 1.0).abs() <= MAX_HUMANIZE_DEPTH + 1e-6);
            moved |= ratio != 1.0;
            // The persistent state stays jitter-free.
            assert_eq!(human.current_ratio(), 1.0);
        }
        assert!(moved);
    }

    #[test]
    fn bypass_toggle_rejoins_the_original_trajectory() {
        let note = note_for(415.0, 440.0);
        let base = settings(CorrectionMode::Modern, 0.5);
        let bypassed = CorrectionSettings { bypass: true, ..base };

        let mut reference = CorrectionController::new();
        let mut toggled = CorrectionController::new();
        for block in 0..300 {
            reference.update(Some(&note), &base);
            let active = if (50..80).contains(&block) { &bypassed } else { &base };
            toggled.update(Some(&note), active);
            if (50..80).contains(&block) {
                assert_eq!(toggled.target_ratio(), 1.0);
            }
        }
        assert!((reference.current_ratio() - toggled.current_ratio()).abs() < 1e-5);
    }

    #[test]
    fn mode_round_trips_through_u8() {
        for mode in [CorrectionMode::Classic, CorrectionMode::Modern] {
            assert_eq!(CorrectionMode::from_u8(mode.to_u8()), mode);
        }
    }

    proptest! {
        #[test]
        fn ratio_steps_are_bounded(
            raw_ratios in proptest::collection::vec(0.1f32..4.0, 1..200),
            modern in any::<bool>(),
            retune_speed in 0.0f32..=1.0,
        ) {
            let mode = if modern { CorrectionMode::Modern } else { CorrectionMode::Classic };
            let step_bound = (MAX_RATIO - MIN_RATIO) * (1.0 - mode.smoothing(retune_speed));
            let mut controller = CorrectionController::new();

            for raw_ratio in raw_ratios {
                let note = QuantizedNote {
                    raw_ratio,
                    cents_deviation: -1200.0 * raw_ratio.log2(),
                    ..note_for(440.0, 440.0)
                };
                let before = controller.current_ratio();
                let ratio = controller.update(Some(&note), &settings(mode, retune_speed));
                let after = controller.current_ratio();

                let gap = (controller.target_ratio() - before).abs();
                prop_assert!((after - before).abs() <= gap * (1.0 - mode.smoothing(retune_speed)) + 1e-5);
                prop_assert!((after - before).abs() <= step_bound + 1e-5);
                prop_assert!((MIN_RATIO..=MAX_RATIO).contains(&ratio));
            }
        }
    }
}
