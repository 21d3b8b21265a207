//! Test doubles for the provider and transport boundaries.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use crate::api::{CallContext, Transport, TransportError, TransportResponse};
use crate::auth::{AuthProviderError, AuthScheme, Credential, CredentialProvider};

/// Provider stub that counts acquisitions and issues `token-N` credentials.
pub(crate) struct CountingProvider {
    count: AtomicUsize,
    delay: Option<StdDuration>,
    failure: Option<AuthProviderError>,
    issue_expired: bool,
    last_hint: Mutex<Option<Credential>>,
}

impl CountingProvider {
    pub(crate) fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            delay: None,
            failure: None,
            issue_expired: false,
            last_hint: Mutex::new(None),
        }
    }

    pub(crate) fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(StdDuration::from_millis(ms));
        self
    }

    pub(crate) fn failing(mut self, error: AuthProviderError) -> Self {
        self.failure = Some(error);
        self
    }

    pub(crate) fn issuing_expired(mut self) -> Self {
        self.issue_expired = true;
        self
    }

    pub(crate) fn acquire_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub(crate) fn last_hint(&self) -> Option<Credential> {
        self.last_hint.lock().clone()
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn acquire(
        &self,
        scheme: AuthScheme,
        hint: Option<&Credential>,
    ) -> Result<Credential, AuthProviderError> {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_hint.lock() = hint.cloned();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref failure) = self.failure {
            return Err(failure.clone());
        }

        let value = format!("token-{}", n);
        if self.issue_expired {
            let now = Utc::now();
            return Credential::new(scheme, value, now - Duration::hours(1), Some(now))
                .map_err(|e| AuthProviderError::InvalidCredential(e.to_string()));
        }
        Credential::with_ttl(scheme, value, Duration::minutes(30))
            .map_err(|e| AuthProviderError::InvalidCredential(e.to_string()))
    }
}

/// Transport stub replaying queued outcomes, then answering `200 ok`.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    sent_tokens: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            sent_tokens: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push_status(&self, status: u16, body: &'static str) {
        self.script
            .lock()
            .push_back(Ok(TransportResponse::new(status, body)));
    }

    pub(crate) fn push_error(&self, error: TransportError) {
        self.script.lock().push_back(Err(error));
    }

    pub(crate) fn send_count(&self) -> usize {
        self.sent_tokens.lock().len()
    }

    /// Token of every request sent, in order.
    pub(crate) fn sent_tokens(&self) -> Vec<String> {
        self.sent_tokens.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        _context: &CallContext,
        credential: &Credential,
    ) -> Result<TransportResponse, TransportError> {
        self.sent_tokens
            .lock()
            .push(String::from_utf8_lossy(credential.value()).into_owned());

        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(TransportResponse::new(200, "ok")))
    }
}
