//! Types for metadata lookups.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::auth::AuthError;
use crate::retry::Retryable;

/// Errors that can occur during metadata lookups.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Metadata store misconfigured: {0}")]
    Configuration(String),

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl MetadataError {
    /// Errors that must stop the stage regardless of the retry policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Configuration(_))
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() || e.is_body() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::ConnectionFailed(e.to_string())
        }
    }
}

impl Retryable for MetadataError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed(_) | Self::Timeout | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Auth(_) | Self::Configuration(_) | Self::InvalidResponse(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// One row of the metadata table, flattened to text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRecord {
    pub key: String,
    pub fields: BTreeMap<String, String>,
}

impl MetadataRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder: sets a field.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(column.into(), value.into());
        self
    }

    /// Trimmed value of a column; empty values count as absent.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}
