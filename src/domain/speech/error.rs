use std::path::PathBuf;

use crate::infrastructure::model::ModelInitializationError;

/// Failures of the filesystem-backed audio cache.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("audio cache entry not found: {0}")]
    NotFound(String),

    #[error("audio cache i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the speech generation pipeline.
///
/// The taxonomy is preserved all the way up: callers can distinguish an
/// engine that never came up from a synthesis that exhausted its retries
/// from a cache write that failed after synthesis succeeded.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("invalid synthesis request: {0}")]
    Invalid(String),

    #[error(transparent)]
    ModelInitialization(#[from] ModelInitializationError),

    #[error("synthesis failed after {attempts} attempts: {message}")]
    Synthesis { attempts: u32, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}
