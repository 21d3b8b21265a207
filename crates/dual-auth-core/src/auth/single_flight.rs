//! Request deduplication for credential acquisition.
//!
//! When several callers find the same scheme's credential missing or expired
//! at once, only one provider call is made; the rest wait on its result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{AuthProviderError, AuthScheme, Credential, CredentialProvider, CredentialStore};

pub type AcquireOutcome = Result<Credential, AuthProviderError>;

type SharedAcquire = Shared<BoxFuture<'static, AcquireOutcome>>;

struct InFlight {
    id: u64,
    future: SharedAcquire,
}

type InFlightMap = Arc<Mutex<HashMap<AuthScheme, InFlight>>>;

/// Removes the registry entry of one acquisition when dropped.
///
/// Owned by the acquisition task, so the entry also goes away if the
/// provider panics or the task is aborted.
struct InFlightGuard {
    in_flight: InFlightMap,
    scheme: AuthScheme,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(&self.scheme).map(|f| f.id == self.id).unwrap_or(false) {
            in_flight.remove(&self.scheme);
        }
    }
}

/// In-flight acquisition registry keyed by scheme.
///
/// The provider call runs on its own task, so a waiter that gives up (for
/// example on its deadline) does not cancel the acquisition for the others.
/// The result is written to the store before the registry entry is removed,
/// so a caller that misses the registry always finds the new credential.
#[derive(Clone)]
pub struct SingleFlight {
    store: Arc<CredentialStore>,
    provider: Arc<dyn CredentialProvider>,
    in_flight: InFlightMap,
    next_id: Arc<AtomicU64>,
}

impl SingleFlight {
    pub fn new(store: Arc<CredentialStore>, provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            store,
            provider,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Acquire a credential for `scheme`, joining any acquisition already running.
    ///
    /// `hint` is the stale credential when refreshing. A credential that is
    /// still valid under `refresh_window` when the registry is checked is
    /// returned as-is without calling the provider.
    pub async fn acquire(
        &self,
        scheme: AuthScheme,
        hint: Option<Credential>,
        refresh_window: Duration,
    ) -> AcquireOutcome {
        let future = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(&scheme) {
                debug!(%scheme, "Joining in-flight credential acquisition");
                existing.future.clone()
            } else if let Some(current) = self.store.get_valid(scheme, Utc::now(), refresh_window)
            {
                // Another acquisition finished between the caller's read and now
                return Ok(current);
            } else {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let guard = InFlightGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    scheme,
                    id,
                };
                let task = tokio::spawn(run_acquisition(
                    guard,
                    Arc::clone(&self.store),
                    Arc::clone(&self.provider),
                    scheme,
                    hint,
                ));
                let future = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(AuthProviderError::Unavailable(format!(
                            "credential acquisition task failed: {}",
                            e
                        )))
                    })
                }
                .boxed()
                .shared();

                in_flight.insert(
                    scheme,
                    InFlight {
                        id,
                        future: future.clone(),
                    },
                );
                future
            }
        };

        future.await
    }

    /// Number of schemes with an acquisition currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

async fn run_acquisition(
    guard: InFlightGuard,
    store: Arc<CredentialStore>,
    provider: Arc<dyn CredentialProvider>,
    scheme: AuthScheme,
    hint: Option<Credential>,
) -> AcquireOutcome {
    let refreshing = hint.is_some();
    let result = provider
        .acquire(scheme, hint.as_ref())
        .await
        .and_then(|credential| check_issued(scheme, credential));

    let result = match result {
        Ok(credential) => match store.set(scheme, credential.clone()) {
            Ok(()) => {
                info!(
                    %scheme,
                    refreshing,
                    expires_at = ?credential.expires_at(),
                    "Acquired credential"
                );
                Ok(credential)
            }
            Err(e) => Err(AuthProviderError::InvalidCredential(e.to_string())),
        },
        Err(e) => Err(e),
    };

    if let Err(ref e) = result {
        warn!(%scheme, refreshing, error = %e, "Credential acquisition failed");
    }

    // Store is written before the entry goes away
    drop(guard);
    result
}

fn check_issued(scheme: AuthScheme, credential: Credential) -> AcquireOutcome {
    if credential.scheme() != scheme {
        return Err(AuthProviderError::InvalidCredential(format!(
            "asked for {} but got {}",
            scheme,
            credential.scheme()
        )));
    }
    if credential.is_expired_at(Utc::now()) {
        return Err(AuthProviderError::InvalidCredential(
            "credential was already expired when issued".to_string(),
        ));
    }
    Ok(credential)
}
