use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use super::{AuthFailureAction, AuthFlow, AuthMode, CallContext, CallError, CallResult, Dispatcher};
use crate::auth::{AuthScheme, Credential, CredentialStore, SingleFlight};

/// Auth retries allowed for an idempotent in-session call
const MAX_AUTH_RETRIES: u32 = 1;

/// Executes calls on behalf of a user with a live session.
///
/// The session credential is seeded by an external login flow; this handler
/// never creates a session, it only refreshes one that has gone stale.
pub struct InSessionCall {
    store: Arc<CredentialStore>,
    flights: SingleFlight,
    dispatcher: Arc<Dispatcher>,
    refresh_window: Duration,
}

impl InSessionCall {
    pub fn new(
        store: Arc<CredentialStore>,
        flights: SingleFlight,
        dispatcher: Arc<Dispatcher>,
        refresh_window: Duration,
    ) -> Self {
        Self {
            store,
            flights,
            dispatcher,
            refresh_window,
        }
    }

    pub async fn call(&self, context: &CallContext) -> Result<CallResult, CallError> {
        if context.auth_mode() != AuthMode::InSession {
            return Err(CallError::AuthModeMismatch {
                expected: AuthMode::InSession,
                actual: context.auth_mode(),
            });
        }
        self.dispatcher.execute(self, context).await
    }

    /// Refresh the session from `stale`. On failure the stale credential is dropped.
    async fn refresh(&self, stale: Credential) -> Result<Credential, CallError> {
        match self
            .flights
            .acquire(AuthScheme::Session, Some(stale.clone()), self.refresh_window)
            .await
        {
            Ok(credential) => Ok(credential),
            Err(e) => {
                self.store.invalidate_if(AuthScheme::Session, &stale);
                Err(CallError::SessionExpired(e))
            }
        }
    }
}

#[async_trait]
impl AuthFlow for InSessionCall {
    fn scheme(&self) -> AuthScheme {
        AuthScheme::Session
    }

    async fn obtain_credential(&self) -> Result<Credential, CallError> {
        let current = self
            .store
            .get(AuthScheme::Session)
            .ok_or(CallError::NoActiveSession)?;

        if !current.needs_refresh_at(Utc::now(), self.refresh_window) {
            return Ok(current);
        }

        info!(expires_at = ?current.expires_at(), "Session credential expired, refreshing");
        self.refresh(current).await
    }

    async fn on_auth_failure(
        &self,
        context: &CallContext,
        rejected: &Credential,
        auth_retries: u32,
    ) -> Result<AuthFailureAction, CallError> {
        self.store.invalidate_if(AuthScheme::Session, rejected);

        if !context.idempotent() {
            warn!(url = %context.endpoint(), "Not retrying rejected non-idempotent call");
            return Ok(AuthFailureAction::Reject);
        }
        if auth_retries >= MAX_AUTH_RETRIES {
            return Ok(AuthFailureAction::Reject);
        }

        // Another caller may already have replaced the rejected session
        let replaced = self
            .store
            .get_valid(AuthScheme::Session, Utc::now(), self.refresh_window)
            .is_some();
        if !replaced {
            self.refresh(rejected.clone()).await?;
        }
        Ok(AuthFailureAction::Retry)
    }
}
