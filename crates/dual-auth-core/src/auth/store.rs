use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use super::{AuthScheme, Credential, CredentialError};

/// Holds the current credential for each scheme.
///
/// One slot per [`AuthScheme`]. Reads clone the credential out, so a `get`
/// never observes a half-written value. Concurrent `set` calls for the same
/// scheme are last-write-wins. The lock is only ever held for the in-memory
/// read or write, never across network I/O.
///
/// Share it between handlers with an `Arc`; each client instance owns its
/// own store.
#[derive(Default)]
pub struct CredentialStore {
    slots: RwLock<HashMap<AuthScheme, Credential>>,
}

/// Diagnostic view of one slot. Never carries token material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub scheme: AuthScheme,
    pub present: bool,
    pub expired: bool,
    pub seconds_until_expiry: Option<i64>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current credential for `scheme`, expired or not.
    pub fn get(&self, scheme: AuthScheme) -> Option<Credential> {
        self.slots.read().get(&scheme).cloned()
    }

    /// Current credential only if it is not due for refresh at `now`.
    ///
    /// A stale credential stays stored until it is invalidated or replaced.
    pub fn get_valid(
        &self,
        scheme: AuthScheme,
        now: DateTime<Utc>,
        refresh_window: Duration,
    ) -> Option<Credential> {
        self.get(scheme)
            .filter(|credential| !credential.needs_refresh_at(now, refresh_window))
    }

    /// Replace the credential for `scheme`. Last write wins.
    pub fn set(&self, scheme: AuthScheme, credential: Credential) -> Result<(), CredentialError> {
        if credential.scheme() != scheme {
            return Err(CredentialError::SchemeMismatch {
                expected: scheme,
                actual: credential.scheme(),
            });
        }

        self.slots.write().insert(scheme, credential);
        debug!(%scheme, "Stored credential");
        Ok(())
    }

    /// Drop the credential for `scheme`, returning what was stored.
    pub fn invalidate(&self, scheme: AuthScheme) -> Option<Credential> {
        let removed = self.slots.write().remove(&scheme);
        if removed.is_some() {
            debug!(%scheme, "Invalidated credential");
        }
        removed
    }

    /// Drop the credential for `scheme` only if it is still `stale`.
    ///
    /// Returns false when another caller already replaced it, in which case
    /// the newer credential is left alone.
    pub fn invalidate_if(&self, scheme: AuthScheme, stale: &Credential) -> bool {
        let mut slots = self.slots.write();
        match slots.get(&scheme) {
            Some(current) if current == stale => {
                slots.remove(&scheme);
                debug!(%scheme, "Invalidated stale credential");
                true
            }
            _ => false,
        }
    }

    /// Drop every stored credential.
    pub fn clear(&self) {
        self.slots.write().clear();
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<SlotStatus> {
        let slots = self.slots.read();
        AuthScheme::ALL
            .iter()
            .map(|scheme| match slots.get(scheme) {
                Some(credential) => SlotStatus {
                    scheme: *scheme,
                    present: true,
                    expired: credential.is_expired_at(now),
                    seconds_until_expiry: credential
                        .time_until_expiry(now)
                        .map(|left| left.num_seconds().max(0)),
                },
                None => SlotStatus {
                    scheme: *scheme,
                    present: false,
                    expired: false,
                    seconds_until_expiry: None,
                },
            })
            .collect()
    }
}
