//! Types for platform operations.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthError;
use crate::retry::Retryable;

/// Errors that can occur while talking to the platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

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

impl PlatformError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() || e.is_request() {
            Self::ConnectionFailed(e.to_string())
        } else if e.is_decode() || e.is_body() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::ConnectionFailed(e.to_string())
        }
    }
}

impl Retryable for PlatformError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed(_) | Self::Timeout | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Auth(_) | Self::NotFound { .. } | Self::InvalidResponse(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// One entry of a collection listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub doc_id: String,
    pub title: String,
}

/// A page as reported by the document overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub number: u32,
    pub image_file_name: String,
    /// Status of the latest transcript (`NEW`, `IN_PROGRESS`, `GT`, ...).
    pub status: Option<String>,
    pub transcript_count: usize,
}

/// Document metadata plus its page list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOverview {
    pub doc_id: String,
    pub title: String,
    pub transcribed_lines: u64,
    pub transcribed_pages: u64,
    pub pages: Vec<PageInfo>,
}

impl DocumentOverview {
    /// Whether the document carries any transcription data.
    pub fn has_transcription(&self) -> bool {
        self.transcribed_lines > 0
            || self.transcribed_pages > 0
            || self.pages.iter().any(|p| p.transcript_count > 0)
    }

    /// Whether any page's latest transcript is ground truth.
    pub fn has_ground_truth(&self) -> bool {
        self.pages
            .iter()
            .any(|p| p.status.as_deref().map(|s| s.eq_ignore_ascii_case("GT")).unwrap_or(false))
    }

    /// Image file names ordered by page number.
    pub fn image_names(&self) -> Vec<String> {
        let mut pages: Vec<&PageInfo> = self.pages.iter().collect();
        pages.sort_by_key(|p| p.number);
        pages
            .into_iter()
            .map(|p| p.image_file_name.clone())
            .collect()
    }
}
