use async_trait::async_trait;
use chrono::Duration;

use super::{AuthProviderError, AuthScheme, Credential};

/// Mints or refreshes credentials.
///
/// This is the only place a network handshake proving identity happens; the
/// call handlers treat it as opaque. Implementations must be safe to call
/// again after a failure, and must set `expires_at` whenever the scheme has
/// an expiry.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a credential for `scheme`.
    ///
    /// `hint` is the stale credential on the refresh path, `None` for a fresh
    /// mint.
    async fn acquire(
        &self,
        scheme: AuthScheme,
        hint: Option<&Credential>,
    ) -> Result<Credential, AuthProviderError>;
}

/// Hands out pre-configured tokens.
///
/// Each acquisition re-issues the configured token with a new expiry. Used by
/// the CLI, where session tokens come from the keychain and out-of-session
/// tokens from the environment.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    session_token: Option<String>,
    out_of_session_token: Option<String>,
    ttl: Option<Duration>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_out_of_session_token(mut self, token: impl Into<String>) -> Self {
        self.out_of_session_token = Some(token.into());
        self
    }

    /// Lifetime given to issued credentials. Without one they never expire.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticProvider {
    async fn acquire(
        &self,
        scheme: AuthScheme,
        _hint: Option<&Credential>,
    ) -> Result<Credential, AuthProviderError> {
        let token = match scheme {
            AuthScheme::Session => self.session_token.as_deref(),
            AuthScheme::OutOfSession => self.out_of_session_token.as_deref(),
        }
        .ok_or(AuthProviderError::Unsupported(scheme))?;

        match self.ttl {
            Some(ttl) => Credential::with_ttl(scheme, token, ttl)
                .map_err(|e| AuthProviderError::InvalidCredential(e.to_string())),
            None => Ok(Credential::non_expiring(scheme, token)),
        }
    }
}
