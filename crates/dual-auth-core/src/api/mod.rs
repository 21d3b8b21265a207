//! Authenticated call execution.
//!
//! `DualAuthClient` routes each `CallContext` to the in-session or
//! out-of-session handler. Both handlers implement `AuthFlow` and share one
//! `Dispatcher`, which owns transport retry and outcome classification.

pub mod client;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod in_session;
pub mod out_of_session;
pub mod transport;

pub use client::DualAuthClient;
pub use context::{AuthMode, CallContext, CallContextBuilder, CallResult, CallStatus};
pub use dispatcher::{AuthFailureAction, AuthFlow, Dispatcher, RetryPolicy};
pub use error::{CallError, TransportError};
pub use in_session::InSessionCall;
pub use out_of_session::OutOfSessionCall;
pub use transport::{HttpTransport, Transport, TransportResponse};
