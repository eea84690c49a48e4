//! Credentials for the remote services.
//!
//! Both the document platform and the metadata store accept either a long
//! lived token or a username/password pair. A token wins when both are set.

mod types;

pub use types::*;

use thiserror::Error;

/// Authentication errors. Always fatal for the run.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No credentials configured for {service} (set {hint})")]
    MissingCredentials {
        service: &'static str,
        hint: &'static str,
    },

    #[error("{service} rejected the credentials: {reason}")]
    Rejected { service: &'static str, reason: String },
}

impl AuthError {
    pub fn rejected(service: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            service,
            reason: reason.into(),
        }
    }
}

/// Resolves credentials from optional config values.
///
/// `hint` names the settings to mention when nothing usable is configured.
pub fn resolve_credentials(
    service: &'static str,
    hint: &'static str,
    username: Option<&str>,
    password: Option<&str>,
    token: Option<&str>,
) -> Result<Credentials, AuthError> {
    let present = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(String::from);

    if let Some(token) = present(token) {
        return Ok(Credentials::Token(token));
    }
    match (present(username), present(password)) {
        (Some(username), Some(password)) => Ok(Credentials::Password { username, password }),
        _ => Err(AuthError::MissingCredentials { service, hint }),
    }
}
