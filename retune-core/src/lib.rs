// retune-core/src/lib.rs

//! The core of the real-time vocal pitch corrector.
//! This crate estimates the pitch of a live mono voice, snaps it to a key
//! and scale, and resynthesizes the signal at the corrected pitch. It is
//! completely headless and contains no audio device or GUI code.
//!
//! Start with [`Engine::new`], which hands back the audio-thread
//! [`Engine`] and the control-thread [`EngineHandle`].

pub mod config;
pub mod correction;
pub mod engine;
pub mod error;
pub mod fft;
pub mod frame;
pub mod params;
pub mod pitch;
pub mod preset;
pub mod resynth;
pub mod smoothing;
pub mod telemetry;
pub mod tuning;

pub use config::EngineConfig;
pub use correction::CorrectionMode;
pub use engine::{Engine, EngineHandle};
pub use error::{Error, Result};
pub use params::EngineParams;
pub use preset::Preset;
pub use resynth::ResynthesisMode;
pub use telemetry::TelemetrySample;
pub use tuning::{Key, NoteLabel, Scale};
