use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};

use super::{AuthScheme, Credential};

const SERVICE_NAME: &str = "dual-auth";

/// Session credential as persisted in the keychain.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

/// OS keychain persistence for session credentials, one entry per profile.
///
/// This sits outside the call core: the core keeps credentials in memory
/// only, and a login flow uses this to carry a session across restarts.
pub struct Keychain;

impl Keychain {
    /// Store a session credential for `profile` in the OS keychain
    pub fn store_session(profile: &str, credential: &Credential) -> Result<()> {
        let encoded = encode_session(credential)?;
        let entry = Entry::new(SERVICE_NAME, profile).context("Failed to create keyring entry")?;
        entry
            .set_password(&encoded)
            .context("Failed to store session in keychain")?;
        Ok(())
    }

    /// Load the session credential for `profile`, if one was stored
    pub fn load_session(profile: &str) -> Result<Option<Credential>> {
        let entry = Entry::new(SERVICE_NAME, profile).context("Failed to create keyring entry")?;
        match entry.get_password() {
            Ok(encoded) => decode_session(&encoded).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    /// Delete the stored session for `profile`
    pub fn delete_session(profile: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, profile).context("Failed to create keyring entry")?;
        entry
            .delete_credential()
            .context("Failed to delete session from keychain")?;
        Ok(())
    }
}

fn encode_session(credential: &Credential) -> Result<String> {
    anyhow::ensure!(
        credential.scheme() == AuthScheme::Session,
        "Only session credentials are kept in the keychain"
    );
    let stored = StoredSession {
        token: credential.value_str()?.to_string(),
        issued_at: credential.issued_at(),
        expires_at: credential.expires_at(),
    };
    serde_json::to_string(&stored).context("Failed to serialize session")
}

fn decode_session(encoded: &str) -> Result<Credential> {
    let stored: StoredSession =
        serde_json::from_str(encoded).context("Failed to parse stored session")?;
    Credential::new(
        AuthScheme::Session,
        stored.token,
        stored.issued_at,
        stored.expires_at,
    )
    .context("Stored session is invalid")
}
