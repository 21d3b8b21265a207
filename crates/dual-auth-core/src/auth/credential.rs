use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::CredentialError;

/// Which credential slot a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// Token belonging to a live user session, seeded by a login flow.
    Session,
    /// Token minted on demand when no session exists.
    OutOfSession,
}

impl AuthScheme {
    pub const ALL: [AuthScheme; 2] = [AuthScheme::Session, AuthScheme::OutOfSession];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Session => "session",
            AuthScheme::OutOfSession => "out_of_session",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque token plus the metadata needed to decide whether it may be attached.
///
/// `expires_at`, when present, is never earlier than `issued_at`. A credential
/// past its expiry is never attached to a new request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    value: Vec<u8>,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    scheme: AuthScheme,
}

impl Credential {
    pub fn new(
        scheme: AuthScheme,
        value: impl Into<Vec<u8>>,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, CredentialError> {
        if let Some(expires_at) = expires_at {
            if expires_at < issued_at {
                return Err(CredentialError::ExpiresBeforeIssued);
            }
        }

        Ok(Self {
            value: value.into(),
            issued_at,
            expires_at,
            scheme,
        })
    }

    /// Issue a credential now that lives for `ttl`.
    pub fn with_ttl(
        scheme: AuthScheme,
        value: impl Into<Vec<u8>>,
        ttl: Duration,
    ) -> Result<Self, CredentialError> {
        let now = Utc::now();
        Self::new(scheme, value, now, Some(now + ttl))
    }

    /// Issue a credential now with no expiry.
    pub fn non_expiring(scheme: AuthScheme, value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
            issued_at: Utc::now(),
            expires_at: None,
            scheme,
        }
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Token as text, for transports that put it in a header.
    pub fn value_str(&self) -> Result<&str, CredentialError> {
        std::str::from_utf8(&self.value).map_err(|_| CredentialError::NotUtf8)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expiry| now >= expiry).unwrap_or(false)
    }

    /// True once `now` is inside `window` of the expiry, or past it.
    ///
    /// Handlers treat such a credential as absent so it is replaced before
    /// the server starts rejecting it. A zero window is the strict expiry check.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.expires_at {
            Some(expiry) => now + window >= expiry,
            None => false,
        }
    }

    /// Time left before expiry; `None` for credentials that never expire.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|expiry| expiry - now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("scheme", &self.scheme)
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
