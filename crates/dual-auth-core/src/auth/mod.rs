//! Credential handling for the call core.
//!
//! This module provides:
//! - `Credential`: opaque token with issue/expiry metadata and a scheme
//! - `CredentialStore`: the per-client, thread-safe slot for each scheme
//! - `CredentialProvider`: the pluggable boundary that mints and refreshes tokens
//! - `SingleFlight`: coalesces concurrent acquisitions for the same scheme
//! - `Keychain`: OS keychain persistence for session credentials

pub mod credential;
pub mod error;
pub mod keychain;
pub mod provider;
pub mod single_flight;
pub mod store;

pub use credential::{AuthScheme, Credential};
pub use error::{AuthProviderError, CredentialError};
pub use keychain::Keychain;
pub use provider::{CredentialProvider, StaticProvider};
pub use single_flight::SingleFlight;
pub use store::{CredentialStore, SlotStatus};
