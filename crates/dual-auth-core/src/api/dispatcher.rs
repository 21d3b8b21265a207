//! Shared execution engine for both call modes.
//!
//! The dispatcher sends a request with an attached credential, retries
//! transient transport failures for idempotent calls, and classifies the
//! outcome. What to do about a rejected credential is decided by the
//! [`AuthFlow`] of the handler that invoked it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use super::{CallContext, CallError, CallResult, CallStatus, Transport, TransportResponse};
use crate::auth::{AuthScheme, Credential};
use crate::config::ClientConfig;

/// Rate limiting is retried like a server error
const TOO_MANY_REQUESTS: u16 = 429;

/// Cap on the backoff exponent to keep the multiplier from overflowing
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Transport-level retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt, for idempotent calls only.
    pub max_transport_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_factor: f64,
    pub retry_transient_statuses: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        ClientConfig::default().retry_policy()
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if !self.jitter_factor.is_finite() || self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_factor);
        base + base.mul_f64(jitter)
    }

    /// Transport retries allowed for `context`. Non-idempotent calls get none.
    fn retry_budget(&self, context: &CallContext) -> u32 {
        if context.idempotent() {
            self.max_transport_retries
        } else {
            0
        }
    }
}

/// What a handler wants done after the server rejected its credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureAction {
    /// Obtain a credential again and resend.
    Retry,
    /// Give up and surface the rejection.
    Reject,
}

/// Credential policy of one call mode.
///
/// Implemented by the in-session and out-of-session handlers; consumed by
/// [`Dispatcher::execute`]. Implementations must eventually return
/// [`AuthFailureAction::Reject`] for a call, keeping every retry path finite.
#[async_trait]
pub trait AuthFlow: Send + Sync {
    fn scheme(&self) -> AuthScheme;

    /// A credential that is valid right now, acquiring or refreshing if needed.
    async fn obtain_credential(&self) -> Result<Credential, CallError>;

    /// React to the server rejecting `rejected`.
    ///
    /// `auth_retries` counts the auth retries already made for this call.
    async fn on_auth_failure(
        &self,
        context: &CallContext,
        rejected: &Credential,
        auth_retries: u32,
    ) -> Result<AuthFailureAction, CallError>;
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    auth_failure_statuses: Vec<u16>,
    default_deadline: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            policy: config.retry_policy(),
            auth_failure_statuses: config.auth_failure_statuses.clone(),
            default_deadline: config.default_deadline(),
        }
    }

    /// Run `context` under `flow`, bounded by the call deadline.
    ///
    /// The deadline covers credential acquisition and every transport
    /// attempt. A call that hits it fails with [`CallError::Timeout`] and is
    /// not retried.
    pub async fn execute<F>(&self, flow: &F, context: &CallContext) -> Result<CallResult, CallError>
    where
        F: AuthFlow + ?Sized,
    {
        let deadline = context.timeout().unwrap_or(self.default_deadline);
        match tokio::time::timeout(deadline, self.execute_with_auth(flow, context)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    scheme = %flow.scheme(),
                    url = %context.endpoint(),
                    deadline_ms = deadline.as_millis() as u64,
                    "Call deadline exceeded"
                );
                Err(CallError::Timeout(deadline))
            }
        }
    }

    async fn execute_with_auth<F>(
        &self,
        flow: &F,
        context: &CallContext,
    ) -> Result<CallResult, CallError>
    where
        F: AuthFlow + ?Sized,
    {
        let retry_budget = self.policy.retry_budget(context);
        let mut attempts = 0;
        let mut transport_retries = 0;
        let mut auth_retries = 0;

        loop {
            // Re-obtained every attempt so a backoff never outlives the credential
            let credential = flow.obtain_credential().await?;
            attempts += 1;
            debug!(
                attempt = attempts,
                scheme = %flow.scheme(),
                method = %context.method(),
                url = %context.endpoint(),
                "Sending request"
            );

            let can_retry = transport_retries < retry_budget;
            match self.transport.send(context, &credential).await {
                Ok(response) => match self.classify(&response) {
                    CallStatus::AuthFailed => {
                        warn!(
                            scheme = %flow.scheme(),
                            url = %context.endpoint(),
                            status = response.status,
                            auth_retries,
                            "Credential rejected by server"
                        );
                        match flow
                            .on_auth_failure(context, &credential, auth_retries)
                            .await?
                        {
                            AuthFailureAction::Retry => auth_retries += 1,
                            AuthFailureAction::Reject => {
                                return Err(CallError::auth_rejected(
                                    response.status,
                                    attempts,
                                    &response.body,
                                ));
                            }
                        }
                    }
                    CallStatus::TransportFailed
                        if self.policy.retry_transient_statuses && can_retry =>
                    {
                        transport_retries += 1;
                        let reason = format!("status {}", response.status);
                        self.back_off(context, transport_retries, &reason).await;
                    }
                    status => {
                        return Ok(CallResult::new(
                            status,
                            Some(response.status),
                            response.body,
                            attempts,
                        ));
                    }
                },
                Err(err) if can_retry && err.is_transient() => {
                    transport_retries += 1;
                    self.back_off(context, transport_retries, &err.to_string()).await;
                }
                Err(err) => {
                    return Err(CallError::Transport {
                        source: err,
                        attempts,
                    });
                }
            }
        }
    }

    /// Classify a response without acting on it.
    ///
    /// Statuses in the auth-failure set mean the server rejected the
    /// credential; 429 and 5xx are transient failures; anything else
    /// reached the application and counts as success.
    pub fn classify(&self, response: &TransportResponse) -> CallStatus {
        if self.auth_failure_statuses.contains(&response.status) {
            CallStatus::AuthFailed
        } else if response.status == TOO_MANY_REQUESTS
            || (500..=599).contains(&response.status)
        {
            CallStatus::TransportFailed
        } else {
            CallStatus::Success
        }
    }

    async fn back_off(&self, context: &CallContext, retry: u32, reason: &str) {
        let delay = self.policy.delay(retry);
        warn!(
            url = %context.endpoint(),
            retry,
            backoff_ms = delay.as_millis() as u64,
            reason,
            "Transient transport failure, backing off"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use reqwest::Method;
    use url::Url;

    use super::*;
    use crate::api::{AuthMode, TransportError};
    use crate::testing::ScriptedTransport;

    /// Hands out a fixed credential and rejects on the first auth failure.
    struct FixedFlow {
        credential: Credential,
        obtained: AtomicU32,
        retry_auth: bool,
    }

    impl FixedFlow {
        fn new() -> Self {
            Self {
                credential: Credential::non_expiring(AuthScheme::OutOfSession, "tok"),
                obtained: AtomicU32::new(0),
                retry_auth: false,
            }
        }
    }

    #[async_trait]
    impl AuthFlow for FixedFlow {
        fn scheme(&self) -> AuthScheme {
            AuthScheme::OutOfSession
        }

        async fn obtain_credential(&self) -> Result<Credential, CallError> {
            self.obtained.fetch_add(1, Ordering::SeqCst);
            Ok(self.credential.clone())
        }

        async fn on_auth_failure(
            &self,
            _context: &CallContext,
            _rejected: &Credential,
            auth_retries: u32,
        ) -> Result<AuthFailureAction, CallError> {
            if self.retry_auth && auth_retries == 0 {
                Ok(AuthFailureAction::Retry)
            } else {
                Ok(AuthFailureAction::Reject)
            }
        }
    }

    fn url() -> Url {
        Url::parse("https://api.example.com/v1/items").unwrap()
    }

    fn dispatcher(transport: Arc<ScriptedTransport>) -> Dispatcher {
        let mut config = ClientConfig::default();
        config.jitter_factor = 0.0;
        Dispatcher::new(transport, &config)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_transport_retries: 10,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(1),
            jitter_factor: 0.0,
            retry_transient_statuses: true,
        };
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay(3), Duration::from_millis(800));
        assert_eq!(policy.base_delay(4), Duration::from_secs(1));
        assert_eq!(policy.base_delay(40), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idempotent_transport_failures_are_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_error(TransportError::Connect("reset".to_string()));
        transport.push_status(503, "busy");
        transport.push_status(200, "ok");

        let dispatcher = dispatcher(Arc::clone(&transport));
        let flow = FixedFlow::new();
        let context = CallContext::get(url(), AuthMode::OutOfSession);
        let result = dispatcher.execute(&flow, &context).await.unwrap();

        assert_eq!(result.status(), CallStatus::Success);
        assert_eq!(result.attempts(), 3);
        assert_eq!(transport.send_count(), 3);
        // Credential is re-checked before every attempt
        assert_eq!(flow.obtained.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..5 {
            transport.push_error(TransportError::Timeout("slow".to_string()));
        }

        let dispatcher = dispatcher(Arc::clone(&transport));
        let context = CallContext::get(url(), AuthMode::OutOfSession);
        let err = dispatcher
            .execute(&FixedFlow::new(), &context)
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::Transport { attempts: 3, .. }));
        assert_eq!(transport.send_count(), 3);
    }

    #[tokio::test]
    async fn test_unattachable_credential_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_error(TransportError::Credential("invalid header value".to_string()));

        let dispatcher = dispatcher(Arc::clone(&transport));
        let context = CallContext::get(url(), AuthMode::OutOfSession);
        let err = dispatcher
            .execute(&FixedFlow::new(), &context)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CallError::Transport {
                source: TransportError::Credential(_),
                attempts: 1,
            }
        ));
        assert_eq!(transport.send_count(), 1);
    }

    #[test]
    fn test_nan_jitter_adds_no_delay() {
        let policy = RetryPolicy {
            jitter_factor: f64::NAN,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(1), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_non_idempotent_is_never_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_error(TransportError::Connect("reset".to_string()));

        let dispatcher = dispatcher(Arc::clone(&transport));
        let context = CallContext::builder(Method::POST, url(), AuthMode::OutOfSession).build();
        let err = dispatcher
            .execute(&FixedFlow::new(), &context)
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::Transport { attempts: 1, .. }));
        assert_eq!(transport.send_count(), 1);
    }

    #[tokio::test]
    async fn test_non_idempotent_server_error_is_returned_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(500, "boom");

        let dispatcher = dispatcher(Arc::clone(&transport));
        let context = CallContext::builder(Method::POST, url(), AuthMode::OutOfSession).build();
        let result = dispatcher.execute(&FixedFlow::new(), &context).await.unwrap();

        assert_eq!(result.status(), CallStatus::TransportFailed);
        assert_eq!(result.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_server_errors_return_transport_failed() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..3 {
            transport.push_status(502, "bad gateway");
        }

        let dispatcher = dispatcher(Arc::clone(&transport));
        let context = CallContext::get(url(), AuthMode::InSession);
        let result = dispatcher.execute(&FixedFlow::new(), &context).await.unwrap();

        assert_eq!(result.status(), CallStatus::TransportFailed);
        assert_eq!(result.status_code(), Some(502));
        assert_eq!(result.response_text(), "bad gateway");
        assert_eq!(result.attempts(), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_defers_to_flow() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(403, "forbidden");

        let dispatcher = dispatcher(Arc::clone(&transport));
        let context = CallContext::get(url(), AuthMode::InSession);
        let err = dispatcher
            .execute(&FixedFlow::new(), &context)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CallError::AuthRejected {
                status: 403,
                attempts: 1,
                ..
            }
        ));
        assert_eq!(transport.send_count(), 1);
    }

    #[tokio::test]
    async fn test_auth_retry_resends() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(401, "expired");
        transport.push_status(200, "ok");

        let dispatcher = dispatcher(Arc::clone(&transport));
        let flow = FixedFlow {
            retry_auth: true,
            ..FixedFlow::new()
        };
        let context = CallContext::get(url(), AuthMode::InSession);
        let result = dispatcher.execute(&flow, &context).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.attempts(), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_auth_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(404, "missing");

        let dispatcher = dispatcher(Arc::clone(&transport));
        let context = CallContext::get(url(), AuthMode::InSession);
        let result = dispatcher.execute(&FixedFlow::new(), &context).await.unwrap();

        assert_eq!(result.status(), CallStatus::Success);
        assert_eq!(result.status_code(), Some(404));
    }

    #[tokio::test]
    async fn test_custom_auth_failure_statuses() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(419, "session timeout");

        let mut config = ClientConfig::default();
        config.auth_failure_statuses = vec![401, 419];
        let dispatcher = Dispatcher::new(transport.clone(), &config);

        let context = CallContext::get(url(), AuthMode::InSession);
        let err = dispatcher
            .execute(&FixedFlow::new(), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::AuthRejected { status: 419, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..3 {
            transport.push_error(TransportError::Connect("reset".to_string()));
        }

        let mut config = ClientConfig::default();
        config.jitter_factor = 0.0;
        config.initial_backoff_ms = 10_000;
        config.max_backoff_ms = 10_000;
        let dispatcher = Dispatcher::new(transport.clone(), &config);

        let context = CallContext::builder(Method::GET, url(), AuthMode::OutOfSession)
            .timeout(Duration::from_secs(1))
            .build();
        let err = dispatcher
            .execute(&FixedFlow::new(), &context)
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::Timeout(_)));
        assert_eq!(transport.send_count(), 1);
    }

    #[test]
    fn test_classify_uses_configured_statuses() {
        let dispatcher = dispatcher(Arc::new(ScriptedTransport::new()));
        let classify = |status| dispatcher.classify(&TransportResponse::new(status, ""));
        assert_eq!(classify(200), CallStatus::Success);
        assert_eq!(classify(401), CallStatus::AuthFailed);
        assert_eq!(classify(403), CallStatus::AuthFailed);
        assert_eq!(classify(404), CallStatus::Success);
        assert_eq!(classify(429), CallStatus::TransportFailed);
        assert_eq!(classify(503), CallStatus::TransportFailed);
    }
}
