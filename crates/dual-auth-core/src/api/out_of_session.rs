use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, warn};

use super::{AuthFailureAction, AuthFlow, AuthMode, CallContext, CallError, CallResult, Dispatcher};
use crate::auth::{AuthScheme, Credential, CredentialStore, SingleFlight};

/// Fresh mints allowed after a rejection
const MAX_AUTH_RETRIES: u32 = 1;

/// Executes calls that have no session behind them.
///
/// A credential is minted before the first call and reused by later calls
/// until it expires or the server rejects it.
pub struct OutOfSessionCall {
    store: Arc<CredentialStore>,
    flights: SingleFlight,
    dispatcher: Arc<Dispatcher>,
    refresh_window: Duration,
}

impl OutOfSessionCall {
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
        if context.auth_mode() != AuthMode::OutOfSession {
            return Err(CallError::AuthModeMismatch {
                expected: AuthMode::OutOfSession,
                actual: context.auth_mode(),
            });
        }
        self.dispatcher.execute(self, context).await
    }
}

#[async_trait]
impl AuthFlow for OutOfSessionCall {
    fn scheme(&self) -> AuthScheme {
        AuthScheme::OutOfSession
    }

    async fn obtain_credential(&self) -> Result<Credential, CallError> {
        if let Some(current) =
            self.store
                .get_valid(AuthScheme::OutOfSession, Utc::now(), self.refresh_window)
        {
            return Ok(current);
        }

        debug!("No usable out-of-session credential, minting one");
        let credential = self
            .flights
            .acquire(AuthScheme::OutOfSession, None, self.refresh_window)
            .await?;
        Ok(credential)
    }

    async fn on_auth_failure(
        &self,
        context: &CallContext,
        rejected: &Credential,
        auth_retries: u32,
    ) -> Result<AuthFailureAction, CallError> {
        self.store.invalidate_if(AuthScheme::OutOfSession, rejected);

        if !context.idempotent() {
            warn!(url = %context.endpoint(), "Not retrying rejected non-idempotent call");
            return Ok(AuthFailureAction::Reject);
        }
        if auth_retries >= MAX_AUTH_RETRIES {
            warn!(url = %context.endpoint(), "Freshly minted credential was rejected too");
            return Ok(AuthFailureAction::Reject);
        }
        Ok(AuthFailureAction::Retry)
    }
}
