//! # Musical Tuning Module
//!
//! This module provides the musical side of pitch correction: keys, named
//! scales, equal-temperament note frequencies, cents math, and the scale
//! quantizer that snaps a detected frequency to the nearest in-scale note.
//!
//! ## Features
//! - Twelve pitch-class keys with sharp and flat name parsing
//! - Named scale registry (major, minors, pentatonics, blues, church modes)
//! - Custom semitone patterns, normalized on construction
//! - Pre-computed, sorted in-scale frequency table across octaves 1–7
//! - Nearest-note search by absolute cents with a vocal range guard
//!
//! Tables are built on the control thread; the audio thread only reads them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reference pitch for equal temperament.
pub const A4_FREQUENCY: f32 = 440.0;

/// MIDI note number of A4.
const A4_MIDI: i32 = 69;

/// Lowest fundamental the quantizer will correct.
pub const MIN_VOCAL_FREQUENCY: f32 = 60.0;

/// Highest fundamental the quantizer will correct.
pub const MAX_VOCAL_FREQUENCY: f32 = 1500.0;

/// Octave range covered by a [`ScaleTable`] (scientific pitch notation).
pub const MIN_OCTAVE: i8 = 1;
pub const MAX_OCTAVE: i8 = 7;

/// Pitch-class names, sharp spelling, indexed from C.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// One of the twelve pitch classes, used as the root of a scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Key {
    #[default]
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl Key {
    pub const ALL: [Key; 12] = [
        Key::C,
        Key::CSharp,
        Key::D,
        Key::DSharp,
        Key::E,
        Key::F,
        Key::FSharp,
        Key::G,
        Key::GSharp,
        Key::A,
        Key::ASharp,
        Key::B,
    ];

    /// Semitones above C (0–11).
    pub fn pitch_class(self) -> u8 {
        self as u8
    }

    /// Key for a pitch class; values wrap modulo 12.
    pub fn from_pitch_class(pitch_class: u8) -> Self {
        Self::ALL[(pitch_class % 12) as usize]
    }

    pub fn name(self) -> &'static str {
        NOTE_NAMES[self as usize]
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Key {
    type Err = Error;

    /// Parses `"A"`, `"c#"`, `"Bb"`, `"F♯"` and friends.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let letter = chars
            .next()
            .ok_or_else(|| Error::InvalidKey(s.to_string()))?;

        let natural: i32 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(Error::InvalidKey(s.to_string())),
        };

        let accidental: i32 = match chars.as_str() {
            "" => 0,
            "#" | "♯" => 1,
            "b" | "♭" => -1,
            _ => return Err(Error::InvalidKey(s.to_string())),
        };

        Ok(Key::from_pitch_class((natural + accidental).rem_euclid(12) as u8))
    }
}

/// A scale, either from the named registry or a custom semitone pattern.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Scale {
    #[default]
    Chromatic,
    Major,
    Minor,
    HarmonicMinor,
    MelodicMinor,
    MajorPentatonic,
    MinorPentatonic,
    Blues,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    /// Semitone offsets from the root.
    Custom(Vec<u8>),
}

/// Name → scale lookup, including common aliases.
static SCALE_REGISTRY: Lazy<BTreeMap<&'static str, Scale>> = Lazy::new(|| {
    BTreeMap::from([
        ("chromatic", Scale::Chromatic),
        ("major", Scale::Major),
        ("ionian", Scale::Major),
        ("minor", Scale::Minor),
        ("natural minor", Scale::Minor),
        ("aeolian", Scale::Minor),
        ("harmonic minor", Scale::HarmonicMinor),
        ("melodic minor", Scale::MelodicMinor),
        ("major pentatonic", Scale::MajorPentatonic),
        ("pentatonic", Scale::MajorPentatonic),
        ("minor pentatonic", Scale::MinorPentatonic),
        ("blues", Scale::Blues),
        ("dorian", Scale::Dorian),
        ("phrygian", Scale::Phrygian),
        ("lydian", Scale::Lydian),
        ("mixolydian", Scale::Mixolydian),
        ("locrian", Scale::Locrian),
    ])
});

impl Scale {
    /// Every named (non-custom) scale.
    pub const NAMED: [Scale; 13] = [
        Scale::Chromatic,
        Scale::Major,
        Scale::Minor,
        Scale::HarmonicMinor,
        Scale::MelodicMinor,
        Scale::MajorPentatonic,
        Scale::MinorPentatonic,
        Scale::Blues,
        Scale::Dorian,
        Scale::Phrygian,
        Scale::Lydian,
        Scale::Mixolydian,
        Scale::Locrian,
    ];

    /// Looks a scale up by name, ignoring case, `_` and `-`.
    pub fn from_name(name: &str) -> Result<Self> {
        let normalized = name
            .trim()
            .to_ascii_lowercase()
            .replace(['_', '-'], " ");
        SCALE_REGISTRY
            .get(normalized.as_str())
            .cloned()
            .ok_or_else(|| Error::UnknownScale(name.to_string()))
    }

    /// Builds a custom scale from arbitrary semitone offsets.
    ///
    /// Offsets are reduced modulo 12, sorted and deduplicated. An empty
    /// pattern falls back to the chromatic scale.
    pub fn custom(offsets: &[u8]) -> Self {
        let pattern = normalize_pattern(offsets);
        if pattern.len() == 12 {
            Scale::Chromatic
        } else {
            Scale::Custom(pattern)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scale::Chromatic => "chromatic",
            Scale::Major => "major",
            Scale::Minor => "minor",
            Scale::HarmonicMinor => "harmonic minor",
            Scale::MelodicMinor => "melodic minor",
            Scale::MajorPentatonic => "major pentatonic",
            Scale::MinorPentatonic => "minor pentatonic",
            Scale::Blues => "blues",
            Scale::Dorian => "dorian",
            Scale::Phrygian => "phrygian",
            Scale::Lydian => "lydian",
            Scale::Mixolydian => "mixolydian",
            Scale::Locrian => "locrian",
            Scale::Custom(_) => "custom",
        }
    }

    /// Ordered semitone offsets from the root.
    pub fn pattern(&self) -> Vec<u8> {
        match self {
            Scale::Chromatic => (0..12).collect(),
            Scale::Major => vec![0, 2, 4, 5, 7, 9, 11],
            Scale::Minor => vec![0, 2, 3, 5, 7, 8, 10],
            Scale::HarmonicMinor => vec![0, 2, 3, 5, 7, 8, 11],
            Scale::MelodicMinor => vec![0, 2, 3, 5, 7, 9, 11],
            Scale::MajorPentatonic => vec![0, 2, 4, 7, 9],
            Scale::MinorPentatonic => vec![0, 3, 5, 7, 10],
            Scale::Blues => vec![0, 3, 5, 6, 7, 10],
            Scale::Dorian => vec![0, 2, 3, 5, 7, 9, 10],
            Scale::Phrygian => vec![0, 1, 3, 5, 7, 8, 10],
            Scale::Lydian => vec![0, 2, 4, 6, 7, 9, 11],
            Scale::Mixolydian => vec![0, 2, 4, 5, 7, 9, 10],
            Scale::Locrian => vec![0, 1, 3, 5, 6, 8, 10],
            Scale::Custom(offsets) => normalize_pattern(offsets),
        }
    }
}

fn normalize_pattern(offsets: &[u8]) -> Vec<u8> {
    let mut pattern: Vec<u8> = offsets.iter().map(|o| o % 12).collect();
    pattern.sort_unstable();
    pattern.dedup();
    if pattern.is_empty() {
        (0..12).collect()
    } else {
        pattern
    }
}

/// The active key and scale.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScaleContext {
    pub key: Key,
    pub scale: Scale,
}

impl ScaleContext {
    pub fn new(key: Key, scale: Scale) -> Self {
        Self { key, scale }
    }
}

/// One entry of a [`ScaleTable`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleNote {
    pub name: &'static str,
    pub pitch_class: u8,
    pub octave: i8,
    pub frequency: f32,
}

/// The result of snapping a frequency to the active scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizedNote {
    pub note_name: &'static str,
    pub pitch_class: u8,
    pub octave: i8,
    /// Frequency of the chosen in-scale note.
    pub target_frequency: f32,
    /// `1200·log2(input / target)`: positive means the input is sharp.
    pub cents_deviation: f32,
    /// `target / input`: the ratio that would land exactly on the note.
    pub raw_ratio: f32,
}

/// Sorted in-scale note frequencies for one [`ScaleContext`].
///
/// Built once per key/scale change and shared read-only with the audio
/// thread, so the per-block search is a binary search with no allocation.
#[derive(Debug, Clone)]
pub struct ScaleTable {
    context: ScaleContext,
    notes: Vec<ScaleNote>,
}

impl ScaleTable {
    pub fn new(context: ScaleContext) -> Self {
        let pattern = context.scale.pattern();
        let root = context.key.pitch_class();

        let mut notes = Vec::with_capacity(pattern.len() * (MAX_OCTAVE - MIN_OCTAVE + 1) as usize);
        for octave in MIN_OCTAVE..=MAX_OCTAVE {
            for &offset in &pattern {
                let pitch_class = (root + offset) % 12;
                let midi = (octave as i32 + 1) * 12 + pitch_class as i32;
                notes.push(ScaleNote {
                    name: NOTE_NAMES[pitch_class as usize],
                    pitch_class,
                    octave,
                    frequency: midi_to_frequency(midi),
                });
            }
        }
        notes.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));

        Self { context, notes }
    }

    pub fn context(&self) -> &ScaleContext {
        &self.context
    }

    pub fn notes(&self) -> &[ScaleNote] {
        &self.notes
    }

    /// Finds the nearest in-scale note to `frequency`.
    ///
    /// # Returns
    /// * `Some(note)` - The note with the smallest absolute cents deviation;
    ///   on an exact tie the lower note wins
    /// * `None` - "No target": the input is ≤ 0, non-finite, or outside
    ///   [`MIN_VOCAL_FREQUENCY`, `MAX_VOCAL_FREQUENCY`]
    pub fn quantize(&self, frequency: f32) -> Option<QuantizedNote> {
        if !is_vocal_frequency(frequency) {
            return None;
        }

        let upper = self.notes.partition_point(|n| n.frequency < frequency);
        let candidates = [upper.checked_sub(1), Some(upper)];

        let mut best: Option<(&ScaleNote, f32)> = None;
        for index in candidates.into_iter().flatten() {
            let Some(note) = self.notes.get(index) else {
                continue;
            };
            let cents = calculate_cents_deviation(frequency, note.frequency);
            match best {
                Some((_, best_cents)) if cents.abs() >= best_cents.abs() => {}
                _ => best = Some((note, cents)),
            }
        }

        best.map(|(note, cents)| QuantizedNote {
            note_name: note.name,
            pitch_class: note.pitch_class,
            octave: note.octave,
            target_frequency: note.frequency,
            cents_deviation: cents,
            raw_ratio: note.frequency / frequency,
        })
    }
}

impl Default for ScaleTable {
    fn default() -> Self {
        Self::new(ScaleContext::default())
    }
}

/// Whether `frequency` lies in the correctable vocal range.
pub fn is_vocal_frequency(frequency: f32) -> bool {
    frequency.is_finite() && (MIN_VOCAL_FREQUENCY..=MAX_VOCAL_FREQUENCY).contains(&frequency)
}

/// Equal-temperament frequency of a MIDI note number.
pub fn midi_to_frequency(midi: i32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((midi - A4_MIDI) as f32 / 12.0)
}

/// Nearest chromatic MIDI note to `frequency`, if it is positive and finite.
pub fn frequency_to_midi(frequency: f32) -> Option<i32> {
    if !(frequency.is_finite() && frequency > 0.0) {
        return None;
    }
    Some((A4_MIDI as f32 + 12.0 * (frequency / A4_FREQUENCY).log2()).round() as i32)
}

/// A note name with its octave, e.g. `A4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteLabel {
    pub name: &'static str,
    pub octave: i8,
}

impl NoteLabel {
    pub fn from_midi(midi: i32) -> Self {
        Self {
            name: NOTE_NAMES[midi.rem_euclid(12) as usize],
            octave: (midi.div_euclid(12) - 1) as i8,
        }
    }

    pub fn midi(&self) -> i32 {
        let pitch_class = NOTE_NAMES.iter().position(|n| *n == self.name).unwrap_or(0) as i32;
        (self.octave as i32 + 1) * 12 + pitch_class
    }
}

impl fmt::Display for NoteLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.octave)
    }
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn key_names_parse_with_either_accidental() {
        assert_eq!("A".parse::<Key>().unwrap(), Key::A);
        assert_eq!("f#".parse::<Key>().unwrap(), Key::FSharp);
        assert_eq!("Bb".parse::<Key>().unwrap(), Key::ASharp);
        assert_eq!("Cb".parse::<Key>().unwrap(), Key::B);
        assert_eq!(" E♭ ".parse::<Key>().unwrap(), Key::DSharp);
        assert!(matches!("H".parse::<Key>(), Err(Error::InvalidKey(_))));
        assert!(matches!("".parse::<Key>(), Err(Error::InvalidKey(_))));
        assert!(matches!("C##".parse::<Key>(), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn scale_names_resolve_through_the_registry() {
        assert_eq!(Scale::from_name("Major").unwrap(), Scale::Major);
        assert_eq!(Scale::from_name("minor_pentatonic").unwrap(), Scale::MinorPentatonic);
        assert_eq!(Scale::from_name("harmonic-minor").unwrap(), Scale::HarmonicMinor);
        assert_eq!(Scale::from_name("aeolian").unwrap(), Scale::Minor);
        assert!(matches!(Scale::from_name("bebop"), Err(Error::UnknownScale(_))));
    }

    #[test]
    fn every_named_scale_round_trips_its_name() {
        for scale in Scale::NAMED {
            assert_eq!(Scale::from_name(scale.name()).unwrap(), scale);
        }
    }

    #[test]
    fn custom_patterns_are_normalized() {
        assert_eq!(Scale::custom(&[7, 0, 19, 4]), Scale::Custom(vec![0, 4, 7]));
        assert_eq!(Scale::custom(&[]), Scale::Chromatic);
        assert_eq!(Scale::Custom(vec![]).pattern().len(), 12);
    }

    #[test]
    fn table_covers_seven_octaves_sorted() {
        let table = ScaleTable::new(ScaleContext::new(Key::A, Scale::Major));
        assert_eq!(table.notes().len(), 7 * 7);
        assert!(table.notes().windows(2).all(|w| w[0].frequency < w[1].frequency));

        let a4 = table
            .notes()
            .iter()
            .find(|n| n.name == "A" && n.octave == 4)
            .unwrap();
        assert_relative_eq!(a4.frequency, 440.0, max_relative = 1e-5);
    }

    #[test]
    fn quantizes_to_nearest_in_scale_note() {
        let table = ScaleTable::new(ScaleContext::new(Key::C, Scale::Major));

        let exact = table.quantize(440.0).unwrap();
        assert_eq!(exact.note_name, "A");
        assert_eq!(exact.octave, 4);
        assert!(exact.cents_deviation.abs() < 0.01);
        assert_relative_eq!(exact.raw_ratio, 1.0, max_relative = 1e-5);

        // A# is out of C major: 455 Hz is nearer A4 than B4.
        let sharp = table.quantize(455.0).unwrap();
        assert_eq!(sharp.note_name, "A");
        assert!(sharp.cents_deviation > 50.0);
        assert!(sharp.raw_ratio < 1.0);

        // C# is out of C major and sits a semitone from both C and D.
        let between = table.quantize(275.0).unwrap();
        assert_eq!(between.note_name, "C");
        assert_eq!(between.octave, 4);
    }

    #[test]
    fn out_of_range_inputs_have_no_target() {
        let table = ScaleTable::default();
        for freq in [0.0, -440.0, 59.0, 1501.0, f32::NAN, f32::INFINITY] {
            assert!(table.quantize(freq).is_none(), "{freq} should be rejected");
        }
        assert!(table.quantize(60.0).is_some());
        assert!(table.quantize(1500.0).is_some());
    }

    #[test]
    fn midi_helpers_agree() {
        assert_eq!(frequency_to_midi(440.0), Some(69));
        assert_eq!(frequency_to_midi(261.63), Some(60));
        assert_eq!(frequency_to_midi(0.0), None);
        assert_eq!(NoteLabel::from_midi(69).to_string(), "A4");
        assert_eq!(NoteLabel::from_midi(61).to_string(), "C#4");
        assert_eq!(NoteLabel::from_midi(61).midi(), 61);
        assert_relative_eq!(midi_to_frequency(81), 880.0, max_relative = 1e-5);
    }

    #[test]
    fn cents_deviation_matches_definition() {
        assert_relative_eq!(calculate_cents_deviation(880.0, 440.0), 1200.0, epsilon = 1e-3);
        assert_relative_eq!(calculate_cents_deviation(440.0, 880.0), -1200.0, epsilon = 1e-3);
    }

    proptest! {
        #[test]
        fn quantizer_picks_the_closest_note(
            freq in MIN_VOCAL_FREQUENCY..MAX_VOCAL_FREQUENCY,
            key in 0u8..12,
            scale_index in 0usize..Scale::NAMED.len(),
        ) {
            let context = ScaleContext::new(Key::from_pitch_class(key), Scale::NAMED[scale_index].clone());
            let table = ScaleTable::new(context);
            let chosen = table.quantize(freq).unwrap();

            let best = table
                .notes()
                .iter()
                .map(|n| calculate_cents_deviation(freq, n.frequency).abs())
                .fold(f32::INFINITY, f32::min);
            prop_assert!((chosen.cents_deviation.abs() - best).abs() < 1e-3);

            let recomputed = calculate_cents_deviation(freq, chosen.target_frequency);
            prop_assert!((recomputed - chosen.cents_deviation).abs() < 1e-3);
            prop_assert!((chosen.raw_ratio * freq - chosen.target_frequency).abs() < 1e-2);
        }
    }
}
