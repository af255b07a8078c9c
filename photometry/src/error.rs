//! Error types for configuration and run setup.
//!
//! Only configuration and setup problems are fatal. Per-aperture and
//! per-detector failures never surface here: they become quality flags and
//! alert strings on the frame results.

use common::{GroupError, LoadFileError};
use thiserror::Error;

use crate::aperture::ApertureId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Load(#[from] LoadFileError),

    #[error("Invalid aperture set for detector '{detector}': {source}")]
    Apertures {
        detector: String,
        source: GroupError,
    },

    #[error("Invalid aperture {id} in detector '{detector}': {reason}")]
    Aperture {
        detector: String,
        id: ApertureId,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors that stop a reduction run.
#[derive(Debug, Error)]
pub enum ReduceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Frame source failed: {0:#}")]
    Source(anyhow::Error),

    #[error("Log writer failed: {0:#}")]
    Log(anyhow::Error),
}
