//! Error types for retune-core.
//!
//! Only control-thread APIs (parsing names, validating configuration,
//! reading and writing presets) return these. The audio path never fails:
//! it degrades to passing the dry signal through.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A key name that is not one of the twelve pitch classes.
    #[error("invalid key name: {0:?}")]
    InvalidKey(String),

    /// A scale name that is not in the named-scale registry.
    #[error("unknown scale: {0:?}")]
    UnknownScale(String),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("preset I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed preset JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
