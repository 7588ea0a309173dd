//! # Telemetry Reporter
//!
//! Observability output of the engine. Nothing here feeds back into
//! correction.
//!
//! ## Features
//! - RMS levels mapped into a 0..1 display range (-60 dBFS to 0 dBFS)
//! - Scalar meters (frequencies, notes, cents error, ratio) as atomics
//! - Pitch history: the audio thread writes one sample per block into a
//!   fixed ring that overwrites its oldest slot; the reader copies out
//!   whatever it has not seen into a time- and count-bounded FIFO
//!
//! Timestamps come from the engine's sample clock, not the wall clock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering, fence};

use atomic_float::{AtomicF32, AtomicF64};
use serde::{Deserialize, Serialize};

use crate::tuning::NoteLabel;

/// Level reported as the bottom of the display range.
pub const DISPLAY_FLOOR_DB: f32 = -60.0;

/// Midi value meaning "no note".
const NO_NOTE: i32 = -1;

/// One point of the pitch history graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Detected frequency, 0 when unvoiced.
    pub input_hz: f32,
    /// Frequency after correction, 0 when unvoiced.
    pub corrected_hz: f32,
    /// Engine time in milliseconds.
    pub timestamp_ms: f64,
}

/// Root mean square of `samples`, 0 for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Maps an RMS value onto 0..1: -60 dBFS and below is 0, 0 dBFS is 1.
pub fn display_level(rms: f32) -> f32 {
    if !(rms > 0.0) {
        return 0.0;
    }
    let db = 20.0 * rms.log10();
    ((db - DISPLAY_FLOOR_DB) / -DISPLAY_FLOOR_DB).clamp(0.0, 1.0)
}

/// Latest per-block measurements, written by the audio thread.
#[derive(Debug)]
pub struct Meters {
    detected_frequency: AtomicF32,
    corrected_frequency: AtomicF32,
    detected_midi: AtomicI32,
    corrected_midi: AtomicI32,
    pitch_error_cents: AtomicF32,
    input_level: AtomicF32,
    output_level: AtomicF32,
    current_ratio: AtomicF32,
    faults: AtomicU64,
}

/// Everything the engine measures in one block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BlockReport {
    pub detected_frequency: f32,
    pub corrected_frequency: f32,
    pub detected_note: Option<NoteLabel>,
    pub corrected_note: Option<NoteLabel>,
    pub pitch_error_cents: f32,
    pub input_level: f32,
    pub output_level: f32,
    pub current_ratio: f32,
}

impl Meters {
    pub fn new() -> Self {
        Self {
            detected_frequency: AtomicF32::new(0.0),
            corrected_frequency: AtomicF32::new(0.0),
            detected_midi: AtomicI32::new(NO_NOTE),
            corrected_midi: AtomicI32::new(NO_NOTE),
            pitch_error_cents: AtomicF32::new(0.0),
            input_level: AtomicF32::new(0.0),
            output_level: AtomicF32::new(0.0),
            current_ratio: AtomicF32::new(1.0),
            faults: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, report: &BlockReport) {
        let midi = |note: Option<NoteLabel>| note.map_or(NO_NOTE, |n| n.midi());
        self.detected_frequency.store(report.detected_frequency, Ordering::Relaxed);
        self.corrected_frequency.store(report.corrected_frequency, Ordering::Relaxed);
        self.detected_midi.store(midi(report.detected_note), Ordering::Relaxed);
        self.corrected_midi.store(midi(report.corrected_note), Ordering::Relaxed);
        self.pitch_error_cents.store(report.pitch_error_cents, Ordering::Relaxed);
        self.input_level.store(report.input_level, Ordering::Relaxed);
        self.output_level.store(report.output_level, Ordering::Relaxed);
        self.current_ratio.store(report.current_ratio, Ordering::Release);
    }

    pub fn record_fault(&self) -> u64 {
        self.faults.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn detected_frequency(&self) -> f32 {
        self.detected_frequency.load(Ordering::Acquire)
    }

    pub fn corrected_frequency(&self) -> f32 {
        self.corrected_frequency.load(Ordering::Acquire)
    }

    pub fn detected_note(&self) -> Option<NoteLabel> {
        note_from_midi(self.detected_midi.load(Ordering::Acquire))
    }

    pub fn corrected_note(&self) -> Option<NoteLabel> {
        note_from_midi(self.corrected_midi.load(Ordering::Acquire))
    }

    pub fn pitch_error_cents(&self) -> f32 {
        self.pitch_error_cents.load(Ordering::Acquire)
    }

    pub fn input_level(&self) -> f32 {
        self.input_level.load(Ordering::Acquire)
    }

    pub fn output_level(&self) -> f32 {
        self.output_level.load(Ordering::Acquire)
    }

    pub fn current_ratio(&self) -> f32 {
        self.current_ratio.load(Ordering::Acquire)
    }

    pub fn fault_count(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }
}

impl Default for Meters {
    fn default() -> Self {
        Self::new()
    }
}

fn note_from_midi(midi: i32) -> Option<NoteLabel> {
    (midi >= 0).then(|| NoteLabel::from_midi(midi))
}

/// Bounded FIFO of history samples.
#[derive(Debug, Clone)]
pub struct PitchHistory {
    samples: VecDeque<TelemetrySample>,
    window_ms: f64,
    capacity: usize,
}

impl PitchHistory {
    pub fn new(window_ms: u32, capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            window_ms: window_ms as f64,
            capacity: capacity.max(1),
        }
    }

    /// Appends a sample, then drops everything older than the window
    /// (measured from this sample) and anything over capacity.
    pub fn push(&mut self, sample: TelemetrySample) {
        self.samples.push_back(sample);
        let cutoff = sample.timestamp_ms - self.window_ms;
        while self
            .samples
            .front()
            .is_some_and(|oldest| oldest.timestamp_ms < cutoff)
        {
            self.samples.pop_front();
        }
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.samples.iter()
    }

    pub fn to_vec(&self) -> Vec<TelemetrySample> {
        self.samples.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// One ring slot. `stamp` is `2n + 1` while sample `n` is being written and
/// `2n + 2` once it is complete.
#[derive(Debug)]
struct HistorySlot {
    stamp: AtomicU64,
    input_hz: AtomicF32,
    corrected_hz: AtomicF32,
    timestamp_ms: AtomicF64,
}

#[derive(Debug)]
struct HistoryRing {
    slots: Box<[HistorySlot]>,
    /// Number of samples ever written.
    written: AtomicU64,
}

impl HistorySlot {
    fn new() -> Self {
        Self {
            stamp: AtomicU64::new(0),
            input_hz: AtomicF32::new(0.0),
            corrected_hz: AtomicF32::new(0.0),
            timestamp_ms: AtomicF64::new(0.0),
        }
    }
}

impl HistoryRing {
    fn slot(&self, n: u64) -> &HistorySlot {
        &self.slots[(n % self.slots.len() as u64) as usize]
    }

    /// Reads sample `n`, or `None` if the writer has lapped it.
    fn read(&self, n: u64) -> Option<TelemetrySample> {
        let slot = self.slot(n);
        let complete = 2 * n + 2;
        if slot.stamp.load(Ordering::Acquire) != complete {
            return None;
        }
        let sample = TelemetrySample {
            input_hz: slot.input_hz.load(Ordering::Relaxed),
            corrected_hz: slot.corrected_hz.load(Ordering::Relaxed),
            timestamp_ms: slot.timestamp_ms.load(Ordering::Relaxed),
        };
        fence(Ordering::Acquire);
        (slot.stamp.load(Ordering::Relaxed) == complete).then_some(sample)
    }
}

/// Audio-side end of the history channel. Never blocks or allocates; once
/// the ring is full each push overwrites the oldest sample.
pub struct TelemetryWriter {
    ring: Arc<HistoryRing>,
    next: u64,
}

impl TelemetryWriter {
    #[inline]
    pub fn push(&mut self, sample: TelemetrySample) {
        let n = self.next;
        let slot = self.ring.slot(n);
        slot.stamp.store(2 * n + 1, Ordering::Relaxed);
        fence(Ordering::Release);
        slot.input_hz.store(sample.input_hz, Ordering::Relaxed);
        slot.corrected_hz.store(sample.corrected_hz, Ordering::Relaxed);
        slot.timestamp_ms.store(sample.timestamp_ms, Ordering::Relaxed);
        slot.stamp.store(2 * n + 2, Ordering::Release);

        self.next = n + 1;
        self.ring.written.store(self.next, Ordering::Release);
    }
}

/// Control-side end of the history channel.
pub struct TelemetryReader {
    ring: Arc<HistoryRing>,
    read: u64,
    history: PitchHistory,
}

impl TelemetryReader {
    /// Copies every sample written since the last call into the history.
    /// Samples the writer has already overwritten are skipped.
    pub fn drain(&mut self) -> usize {
        let written = self.ring.written.load(Ordering::Acquire);
        let oldest = written.saturating_sub(self.ring.slots.len() as u64);
        let mut moved = 0;
        for n in self.read.max(oldest)..written {
            if let Some(sample) = self.ring.read(n) {
                self.history.push(sample);
                moved += 1;
            }
        }
        self.read = written;
        moved
    }

    pub fn history(&self) -> &PitchHistory {
        &self.history
    }

    /// Drains, then returns the pruned history, oldest first.
    pub fn snapshot(&mut self) -> Vec<TelemetrySample> {
        self.drain();
        self.history.to_vec()
    }

    pub fn clear(&mut self) {
        self.drain();
        self.history.clear();
    }
}

/// Creates the history channel. The ring holds `capacity` samples, so a
/// reader that falls behind still sees the newest `capacity` of them.
pub fn telemetry_channel(window_ms: u32, capacity: usize) -> (TelemetryWriter, TelemetryReader) {
    let capacity = capacity.max(1);
    let ring = Arc::new(HistoryRing {
        slots: (0..capacity).map(|_| HistorySlot::new()).collect(),
        written: AtomicU64::new(0),
    });
    (
        TelemetryWriter {
            ring: Arc::clone(&ring),
            next: 0,
        },
        TelemetryReader {
            ring,
            read: 0,
            history: PitchHistory::new(window_ms, capacity),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(timestamp_ms: f64) -> TelemetrySample {
        TelemetrySample {
            input_hz: 440.0,
            corrected_hz: 440.0,
            timestamp_ms,
        }
    }

    #[test]
    fn rms_of_known_signals() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 64]), 0.0);
        assert_relative_eq!(rms(&[0.5, -0.5, 0.5, -0.5]), 0.5);
    }

    #[test]
    fn display_level_spans_sixty_decibels() {
        assert_eq!(display_level(0.0), 0.0);
        assert_eq!(display_level(f32::NAN), 0.0);
        assert_eq!(display_level(1e-4), 0.0);
        assert_relative_eq!(display_level(1.0), 1.0);
        assert_relative_eq!(display_level(0.001), 0.0, epsilon = 1e-5);
        assert_relative_eq!(display_level(0.1), 2.0 / 3.0, epsilon = 1e-5);
        assert_eq!(display_level(4.0), 1.0);
    }

    #[test]
    fn history_prunes_by_age() {
        let mut history = PitchHistory::new(100, 1000);
        for t in 0..50 {
            history.push(sample(t as f64 * 10.0));
        }
        // Newest is 490 ms; everything before 390 ms is gone.
        assert_eq!(history.len(), 11);
        assert_eq!(history.iter().next().unwrap().timestamp_ms, 390.0);
    }

    #[test]
    fn history_caps_count() {
        let mut history = PitchHistory::new(60_000, 8);
        for t in 0..20 {
            history.push(sample(t as f64));
        }
        assert_eq!(history.len(), 8);
        assert_eq!(history.to_vec()[0].timestamp_ms, 12.0);
    }

    #[test]
    fn channel_delivers_in_order() {
        let (mut writer, mut reader) = telemetry_channel(5000, 4);
        for t in 0..3 {
            writer.push(sample(t as f64));
        }
        let times: Vec<f64> = reader.snapshot().iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);

        writer.push(sample(3.0));
        writer.push(sample(4.0));
        let times: Vec<f64> = reader.snapshot().iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(reader.drain(), 0);
    }

    #[test]
    fn full_ring_overwrites_the_oldest() {
        let (mut writer, mut reader) = telemetry_channel(5000, 4);
        for t in 0..10 {
            writer.push(sample(t as f64));
        }
        let times: Vec<f64> = reader.snapshot().iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(times, vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn late_reader_still_sees_the_newest_window() {
        let (mut writer, mut reader) = telemetry_channel(5000, 1024);
        let block_ms = 256.0 * 1000.0 / 44_100.0;
        let blocks = 3440;
        for n in 1..=blocks {
            writer.push(sample(n as f64 * block_ms));
        }

        let history = reader.snapshot();
        let now = blocks as f64 * block_ms;
        // The 5 s window is shorter than 1024 blocks, so age prunes first.
        assert!(history.len() > 850 && history.len() <= 1024);
        assert_relative_eq!(history.last().unwrap().timestamp_ms, now);
        assert!(history.first().unwrap().timestamp_ms >= now - 5000.0);
        assert!(history.windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
    }

    #[test]
    fn meters_round_trip_notes() {
        let meters = Meters::new();
        assert_eq!(meters.detected_note(), None);

        meters.publish(&BlockReport {
            detected_frequency: 436.0,
            corrected_frequency: 440.0,
            detected_note: Some(NoteLabel::from_midi(69)),
            corrected_note: Some(NoteLabel::from_midi(69)),
            pitch_error_cents: -1.5,
            input_level: 0.5,
            output_level: 0.4,
            current_ratio: 1.009,
        });
        assert_eq!(meters.corrected_note().unwrap().to_string(), "A4");
        assert_eq!(meters.detected_frequency(), 436.0);
        assert_eq!(meters.pitch_error_cents(), -1.5);

        assert_eq!(meters.record_fault(), 1);
        assert_eq!(meters.fault_count(), 1);
    }
}
