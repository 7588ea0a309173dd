//! Named parameter presets, stored as JSON.
//!
//! The engine treats a preset as an opaque [`EngineParams`] bundle; applying
//! one is just [`EngineHandle::apply_params`](crate::engine::EngineHandle::apply_params).

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::params::EngineParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub params: EngineParams,
}

impl Preset {
    pub fn new(name: impl Into<String>, params: EngineParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a preset; out-of-range values are clamped.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut preset: Preset = serde_json::from_str(json)?;
        preset.params = preset.params.clamped();
        Ok(preset)
    }

    /// Writes the preset to `path` as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Loads a preset previously written by [`Preset::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        Self::from_json(&data)
    }
}
