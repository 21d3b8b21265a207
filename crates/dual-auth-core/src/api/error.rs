use std::time::Duration;

use thiserror::Error;

use super::AuthMode;
use crate::auth::{AuthProviderError, CredentialError};

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Network-level failures reported by a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Cannot attach credential: {0}")]
    Credential(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether sending the same request again might succeed.
    ///
    /// A credential that cannot be attached fails the same way every time.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Credential(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Errors surfaced to callers of the in-session and out-of-session entry points.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("No active session - a session must be established before in-session calls")]
    NoActiveSession,

    #[error("Session expired and could not be refreshed: {0}")]
    SessionExpired(#[source] AuthProviderError),

    #[error("Credential provider failed: {0}")]
    AuthProvider(#[from] AuthProviderError),

    #[error("Server rejected the credential (status {status}) after {attempts} attempt(s): {body}")]
    AuthRejected {
        status: u16,
        attempts: u32,
        body: String,
    },

    #[error("Transport failed after {attempts} attempt(s): {source}")]
    Transport {
        #[source]
        source: TransportError,
        attempts: u32,
    },

    #[error("Call did not complete within {0:?}")]
    Timeout(Duration),

    #[error("The {expected} handler cannot execute {actual} calls")]
    AuthModeMismatch { expected: AuthMode, actual: AuthMode },

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl CallError {
    pub(crate) fn auth_rejected(status: u16, attempts: u32, body: &[u8]) -> Self {
        CallError::AuthRejected {
            status,
            attempts,
            body: truncate_body(&String::from_utf8_lossy(body)),
        }
    }

    /// Whether the failure came from credentials rather than the network.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            CallError::NoActiveSession
                | CallError::SessionExpired(_)
                | CallError::AuthProvider(_)
                | CallError::AuthRejected { .. }
                | CallError::Credential(_)
        )
    }
}

/// Truncate a response body to avoid logging excessive data
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
