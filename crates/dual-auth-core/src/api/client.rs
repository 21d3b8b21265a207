//! Caller-facing client owning both call handlers.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::{
    AuthMode, CallContext, CallError, CallResult, Dispatcher, HttpTransport, InSessionCall,
    OutOfSessionCall, Transport, TransportError,
};
use crate::auth::{
    AuthScheme, Credential, CredentialError, CredentialProvider, CredentialStore, SingleFlight,
    SlotStatus,
};
use crate::config::ClientConfig;

/// Entry point for in-session and out-of-session calls.
///
/// Both handlers share one credential store and one in-flight registry.
/// Clone is cheap and clones share that state; separate `new` calls get
/// separate stores.
#[derive(Clone)]
pub struct DualAuthClient {
    store: Arc<CredentialStore>,
    in_session: Arc<InSessionCall>,
    out_of_session: Arc<OutOfSessionCall>,
}

impl DualAuthClient {
    /// Create a client that talks HTTP through reqwest.
    pub fn new(
        config: &ClientConfig,
        provider: Arc<dyn CredentialProvider>,
    ) -> Result<Self, TransportError> {
        let transport = Arc::new(HttpTransport::new(config)?);
        Ok(Self::with_transport(
            config,
            provider,
            transport,
            Arc::new(CredentialStore::new()),
        ))
    }

    /// Create a client over an arbitrary transport and store.
    pub fn with_transport(
        config: &ClientConfig,
        provider: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
    ) -> Self {
        let flights = SingleFlight::new(Arc::clone(&store), provider);
        let dispatcher = Arc::new(Dispatcher::new(transport, config));
        let refresh_window = config.refresh_window();

        Self {
            in_session: Arc::new(InSessionCall::new(
                Arc::clone(&store),
                flights.clone(),
                Arc::clone(&dispatcher),
                refresh_window,
            )),
            out_of_session: Arc::new(OutOfSessionCall::new(
                Arc::clone(&store),
                flights,
                dispatcher,
                refresh_window,
            )),
            store,
        }
    }

    /// Execute a call that requires the user's live session.
    pub async fn call_in_session(&self, context: &CallContext) -> Result<CallResult, CallError> {
        self.in_session.call(context).await
    }

    /// Execute a call with a minted out-of-session credential.
    pub async fn call_out_of_session(
        &self,
        context: &CallContext,
    ) -> Result<CallResult, CallError> {
        self.out_of_session.call(context).await
    }

    /// Route `context` to the handler for its auth mode.
    pub async fn call(&self, context: &CallContext) -> Result<CallResult, CallError> {
        match context.auth_mode() {
            AuthMode::InSession => self.call_in_session(context).await,
            AuthMode::OutOfSession => self.call_out_of_session(context).await,
        }
    }

    /// Install a session credential produced by an external login flow.
    pub fn seed_session(&self, credential: Credential) -> Result<(), CredentialError> {
        self.store.set(AuthScheme::Session, credential)?;
        info!("Session seeded");
        Ok(())
    }

    /// Drop every credential this client holds.
    pub fn sign_out(&self) {
        self.store.clear();
        info!("Signed out, credentials cleared");
    }

    pub fn status(&self) -> Vec<SlotStatus> {
        self.store.snapshot(Utc::now())
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::StaticProvider;
    use crate::testing::{CountingProvider, ScriptedTransport};

    fn client(
        provider: Arc<CountingProvider>,
        transport: Arc<ScriptedTransport>,
    ) -> DualAuthClient {
        DualAuthClient::with_transport(
            &ClientConfig::default(),
            provider,
            transport,
            Arc::new(CredentialStore::new()),
        )
    }

    fn url() -> Url {
        Url::parse("https://api.example.com/v1/things").unwrap()
    }

    #[tokio::test]
    async fn test_call_routes_by_auth_mode() {
        let provider = Arc::new(CountingProvider::new());
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(provider.clone(), transport.clone());

        client
            .seed_session(
                Credential::with_ttl(AuthScheme::Session, "user", Duration::minutes(10)).unwrap(),
            )
            .unwrap();

        client
            .call(&CallContext::get(url(), AuthMode::InSession))
            .await
            .unwrap();
        client
            .call(&CallContext::get(url(), AuthMode::OutOfSession))
            .await
            .unwrap();

        assert_eq!(
            transport.sent_tokens(),
            vec!["user".to_string(), "token-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_mode_specific_entry_rejects_other_mode() {
        let client = client(
            Arc::new(CountingProvider::new()),
            Arc::new(ScriptedTransport::new()),
        );
        let err = client
            .call_out_of_session(&CallContext::get(url(), AuthMode::InSession))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::AuthModeMismatch {
                expected: AuthMode::OutOfSession,
                actual: AuthMode::InSession,
            }
        ));
    }

    #[tokio::test]
    async fn test_sign_out_ends_session() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(Arc::new(CountingProvider::new()), transport.clone());
        client
            .seed_session(Credential::non_expiring(AuthScheme::Session, "user"))
            .unwrap();

        client.sign_out();

        let err = client
            .call_in_session(&CallContext::get(url(), AuthMode::InSession))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::NoActiveSession));
        assert_eq!(transport.send_count(), 0);
        assert!(client.status().iter().all(|slot| !slot.present));
    }

    #[tokio::test]
    async fn test_separate_clients_do_not_share_credentials() {
        let first = client(
            Arc::new(CountingProvider::new()),
            Arc::new(ScriptedTransport::new()),
        );
        let second = client(
            Arc::new(CountingProvider::new()),
            Arc::new(ScriptedTransport::new()),
        );
        first
            .seed_session(Credential::non_expiring(AuthScheme::Session, "user"))
            .unwrap();

        assert!(first.store().get(AuthScheme::Session).is_some());
        assert!(second.store().get(AuthScheme::Session).is_none());
    }

    #[tokio::test]
    async fn test_end_to_end_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/public"))
            .and(header("authorization", "Bearer client-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(2)
            .mount(&server)
            .await;

        let provider = StaticProvider::new()
            .with_out_of_session_token("client-token")
            .with_ttl(Duration::minutes(5));
        let client = DualAuthClient::new(&ClientConfig::default(), Arc::new(provider)).unwrap();

        let url = Url::parse(&format!("{}/v1/public", server.uri())).unwrap();
        let context = CallContext::get(url, AuthMode::OutOfSession);
        for _ in 0..2 {
            let result = client.call(&context).await.unwrap();
            assert!(result.is_success());
            assert_eq!(result.response_text(), "[]");
        }
    }
}
