//! Engine construction parameters.
//!
//! Unlike [`EngineParams`](crate::params::EngineParams), these fix buffer
//! sizes and the resynthesis strategy, so they only take effect when an
//! [`Engine`](crate::engine::Engine) is built.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resynth::ResynthesisMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Samples in the pitch analysis window. The engine grows it at high
    /// sample rates so the lowest vocal pitch stays in range.
    pub analysis_window: usize,
    pub resynthesis: ResynthesisMode,
    /// Phase vocoder frame length (power of two).
    pub fft_size: usize,
    /// Phase vocoder frame advance.
    pub hop_size: usize,
    /// Granular shifter grain length.
    pub grain_size: usize,
    /// Age after which pitch history samples are dropped.
    pub history_window_ms: u32,
    /// Maximum number of pitch history samples kept.
    pub history_capacity: usize,
    /// Largest block processed in one pass; longer blocks are split.
    pub max_block_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analysis_window: 2048,
            resynthesis: ResynthesisMode::PhaseVocoder,
            fft_size: 1024,
            hop_size: 128,
            grain_size: 1024,
            history_window_ms: 5000,
            history_capacity: 1024,
            max_block_size: 4096,
        }
    }
}

impl EngineConfig {
    /// Checks the sizes the DSP relies on.
    pub fn validate(&self) -> Result<()> {
        if !(64..=16_384).contains(&self.analysis_window) {
            return Err(invalid(format!(
                "analysis_window must be within 64..=16384, got {}",
                self.analysis_window
            )));
        }
        if !self.fft_size.is_power_of_two() || !(64..=8192).contains(&self.fft_size) {
            return Err(invalid(format!(
                "fft_size must be a power of two within 64..=8192, got {}",
                self.fft_size
            )));
        }
        if self.hop_size == 0 || self.fft_size % self.hop_size != 0 || self.fft_size / self.hop_size < 4 {
            return Err(invalid(format!(
                "hop_size must divide fft_size into at least 4 frames, got {} for {}",
                self.hop_size, self.fft_size
            )));
        }
        if !(64..=4096).contains(&self.grain_size) {
            return Err(invalid(format!(
                "grain_size must be within 64..=4096, got {}",
                self.grain_size
            )));
        }
        if self.history_capacity == 0 || self.history_window_ms == 0 {
            return Err(invalid("pitch history window and capacity must be non-zero".into()));
        }
        if self.max_block_size == 0 {
            return Err(invalid("max_block_size must be non-zero".into()));
        }
        Ok(())
    }

    /// Parses and validates a JSON config; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

fn invalid(message: String) -> Error {
    Error::InvalidConfig(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config = EngineConfig::from_json(r#"{ "resynthesis": "granular", "grain_size": 512 }"#)
            .unwrap();
        assert_eq!(config.resynthesis, ResynthesisMode::Granular);
        assert_eq!(config.grain_size, 512);
        assert_eq!(config.fft_size, 1024);
    }

    #[test]
    fn rejects_bad_sizes() {
        let bad = [
            EngineConfig { fft_size: 1000, ..Default::default() },
            EngineConfig { hop_size: 512, ..Default::default() },
            EngineConfig { hop_size: 0, ..Default::default() },
            EngineConfig { analysis_window: 8, ..Default::default() },
            EngineConfig { grain_size: 10_000, ..Default::default() },
            EngineConfig { history_capacity: 0, ..Default::default() },
            EngineConfig { max_block_size: 0, ..Default::default() },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfig(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        assert!(matches!(EngineConfig::from_json("{ nope"), Err(Error::Json(_))));
    }
}
