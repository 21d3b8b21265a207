//! Client-side orchestration for authenticated API calls.
//!
//! Calls run under one of two authentication contexts:
//!
//! - **in-session**: on behalf of a user whose session was established by an
//!   external login flow and seeded with [`DualAuthClient::seed_session`];
//! - **out-of-session**: with no session, using a credential minted on demand
//!   by a [`CredentialProvider`].
//!
//! The crate decides which credential to attach, acquires or refreshes it
//! (one provider call per scheme no matter how many callers are waiting),
//! retries transient failures within fixed bounds, and never resends a
//! non-idempotent call.

pub mod api;
pub mod auth;
pub mod config;

#[cfg(test)]
mod testing;

pub use api::{
    AuthMode, CallContext, CallError, CallResult, CallStatus, DualAuthClient, HttpTransport,
    InSessionCall, OutOfSessionCall, Transport, TransportError,
};
pub use auth::{
    AuthProviderError, AuthScheme, Credential, CredentialError, CredentialProvider,
    CredentialStore, Keychain, StaticProvider,
};
pub use config::ClientConfig;
