use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{self, HeaderValue};
use reqwest::Client;
use tracing::debug;

use super::{CallContext, TransportError};
use crate::auth::Credential;
use crate::config::ClientConfig;

/// Raw response handed back by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Sends one request with a credential attached.
///
/// A transport makes exactly one attempt per `send`; retrying is the
/// dispatcher's job. Any response the server produced, whatever its status,
/// is `Ok`; `Err` means no response was received.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        context: &CallContext,
        credential: &Credential,
    ) -> Result<TransportResponse, TransportError>;
}

/// Transport over HTTP(S) using a pooled reqwest client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    fn authorization(credential: &Credential) -> Result<HeaderValue, TransportError> {
        let token = credential
            .value_str()
            .map_err(|e| TransportError::Credential(e.to_string()))?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| TransportError::Credential(e.to_string()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        context: &CallContext,
        credential: &Credential,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self
            .client
            .request(context.method().clone(), context.endpoint().clone())
            .headers(context.headers().clone())
            .header(header::AUTHORIZATION, Self::authorization(credential)?);

        if !context.payload().is_empty() {
            request = request.body(context.payload().clone());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        debug!(
            method = %context.method(),
            url = %context.endpoint(),
            status,
            bytes = body.len(),
            "Received response"
        );

        Ok(TransportResponse { status, body })
    }
}
