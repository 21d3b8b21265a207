use thiserror::Error;

use super::AuthScheme;

/// Violations of the credential and store invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Credential expires before it was issued")]
    ExpiresBeforeIssued,

    #[error("Credential for {actual} cannot be stored in the {expected} slot")]
    SchemeMismatch {
        expected: AuthScheme,
        actual: AuthScheme,
    },

    #[error("Credential value is not valid UTF-8")]
    NotUtf8,
}

/// Failures reported by a credential provider while minting or refreshing.
///
/// Clone is required so one in-flight acquisition can hand the same outcome
/// to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthProviderError {
    #[error("Provider rejected the credential request: {0}")]
    Rejected(String),

    #[error("Provider does not issue {0} credentials")]
    Unsupported(AuthScheme),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider returned an unusable credential: {0}")]
    InvalidCredential(String),
}
