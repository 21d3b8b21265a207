use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::auth::AuthScheme;

/// Which authentication context a call needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Made on behalf of a user with a live session.
    InSession,
    /// Made with no session; a credential is minted for it.
    OutOfSession,
}

impl AuthMode {
    /// Credential slot this mode draws from.
    pub fn scheme(&self) -> AuthScheme {
        match self {
            AuthMode::InSession => AuthScheme::Session,
            AuthMode::OutOfSession => AuthScheme::OutOfSession,
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::InSession => f.write_str("in-session"),
            AuthMode::OutOfSession => f.write_str("out-of-session"),
        }
    }
}

/// Immutable description of one API call.
#[derive(Debug, Clone)]
pub struct CallContext {
    endpoint: Url,
    method: Method,
    payload: Bytes,
    headers: HeaderMap,
    auth_mode: AuthMode,
    idempotent: bool,
    timeout: Option<Duration>,
}

impl CallContext {
    /// Start building a call. Idempotency defaults to the HTTP semantics of `method`.
    pub fn builder(method: Method, endpoint: Url, auth_mode: AuthMode) -> CallContextBuilder {
        let idempotent = method.is_idempotent();
        CallContextBuilder {
            context: CallContext {
                endpoint,
                method,
                payload: Bytes::new(),
                headers: HeaderMap::new(),
                auth_mode,
                idempotent,
                timeout: None,
            },
        }
    }

    pub fn get(endpoint: Url, auth_mode: AuthMode) -> Self {
        Self::builder(Method::GET, endpoint, auth_mode).build()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    /// Whether the call may be sent more than once without caller confirmation.
    pub fn idempotent(&self) -> bool {
        self.idempotent
    }

    /// Caller deadline covering credential acquisition and the transport call.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

pub struct CallContextBuilder {
    context: CallContext,
}

impl CallContextBuilder {
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.context.payload = payload.into();
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.context.payload = Bytes::from(serde_json::to_vec(body)?);
        self.context.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(self)
    }

    /// Add a request header. `Authorization` is reserved for the attached
    /// credential and is dropped.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        if name == header::AUTHORIZATION {
            warn!("Ignoring caller-supplied Authorization header");
            return self;
        }
        self.context.headers.append(name, value);
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.context.idempotent = idempotent;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.context.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> CallContext {
        self.context
    }
}

/// How a call ended, as classified by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    AuthFailed,
    TransportFailed,
}

/// Outcome of a dispatched call. Never mutated once returned.
#[derive(Debug, Clone)]
pub struct CallResult {
    status: CallStatus,
    status_code: Option<u16>,
    response: Bytes,
    attempts: u32,
}

impl CallResult {
    pub(crate) fn new(
        status: CallStatus,
        status_code: Option<u16>,
        response: Bytes,
        attempts: u32,
    ) -> Self {
        Self {
            status,
            status_code,
            response,
            attempts,
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }

    /// Status code of the last response, if the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn response(&self) -> &Bytes {
        &self.response
    }

    pub fn response_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.response)
    }

    /// Transport attempts made for this call, across every retry.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
