//! Stage and pipeline errors.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::auth::AuthError;
use crate::metadata::MetadataError;
use crate::platform::PlatformError;
use crate::renamer::RenameError;

use super::StageKind;

/// Errors that abort a stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Structural error in {path}: {reason}")]
    Structural { path: PathBuf, reason: String },

    #[error("Canonical name collision on '{canonical}': {first} and {second}")]
    Collision {
        canonical: String,
        first: String,
        second: String,
    },

    #[error("Platform error: {0}")]
    Platform(PlatformError),

    #[error("Metadata store error: {0}")]
    Metadata(MetadataError),

    #[error("Required metadata missing for '{key}': {fields}")]
    MissingRequired { key: String, fields: String },

    #[error("Move failed: {0}")]
    Move(#[from] RenameError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    pub fn structural(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Structural {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Adapter for `map_err` on filesystem calls.
    pub fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<PlatformError> for StageError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::Auth(auth) => Self::Auth(auth),
            other => Self::Platform(other),
        }
    }
}

impl From<MetadataError> for StageError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::Auth(auth) => Self::Auth(auth),
            MetadataError::Configuration(msg) => Self::Config(msg),
            other => Self::Metadata(other),
        }
    }
}

/// A failed stage within a pipeline run.
#[derive(Debug, Error)]
#[error("Stage '{stage}' failed: {source}")]
pub struct PipelineError {
    pub stage: StageKind,
    #[source]
    pub source: StageError,
}
