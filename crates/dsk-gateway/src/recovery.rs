//! Cookie-expiry recovery around backend calls.
//!
//! `Normal → AuthExpired → Refreshing → Retrying → Normal`, with a failed or
//! timed-out refresh ending the request. A request refreshes and retries at
//! most once, however many backend operations it spans.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dsk_auth::{CookieRefresher, CredentialStore, RefreshError};
use dsk_providers::BackendResult;
use tokio::sync::Mutex;

use crate::error::GatewayError;

type RefreshOutcome = Result<(), RefreshError>;

/// Recovery budget of one originating request.
///
/// Shared by every backend operation the request performs, so session
/// creation and completion draw on the same single refresh.
#[derive(Debug)]
pub struct RecoveryTurn {
    observed: u64,
    refreshed: AtomicBool,
}

impl RecoveryTurn {
    /// Whether this request has already spent its refresh.
    pub fn refreshed(&self) -> bool {
        self.refreshed.load(Ordering::Acquire)
    }
}

/// Wraps backend operations with a single-flight cookie refresh.
///
/// Every request notes the refresh epoch before its first attempt. When
/// several requests hit an expired cookie together, the first one through the
/// refresh lock runs the refresher; the others find the epoch already moved
/// and share that attempt's outcome instead of spawning another refresh.
pub struct AuthRecovery {
    credentials: Arc<CredentialStore>,
    refresher: Arc<dyn CookieRefresher>,
    /// Outcome of the most recent completed attempt.
    last_outcome: Mutex<Option<RefreshOutcome>>,
    /// Completed refresh attempts, successful or not.
    epoch: AtomicU64,
}

impl AuthRecovery {
    pub fn new(credentials: Arc<CredentialStore>, refresher: Arc<dyn CookieRefresher>) -> Self {
        Self {
            credentials,
            refresher,
            last_outcome: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Start the recovery budget for a new request.
    pub fn begin(&self) -> RecoveryTurn {
        RecoveryTurn {
            observed: self.epoch.load(Ordering::Acquire),
            refreshed: AtomicBool::new(false),
        }
    }

    /// Run `attempt`, refreshing cookies and retrying once on `AuthExpired`.
    ///
    /// An expiry after `turn` already refreshed is terminal.
    pub async fn run<T, F, Fut>(
        &self,
        turn: &RecoveryTurn,
        operation: &str,
        mut attempt: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        match attempt().await {
            Err(err) if err.is_auth_expired() => {
                if turn.refreshed.swap(true, Ordering::AcqRel) {
                    tracing::error!(
                        operation,
                        error = %err,
                        "backend rejects credentials refreshed earlier in this request"
                    );
                    return Err(GatewayError::AuthStillExpired(err.to_string()));
                }

                tracing::warn!(
                    operation,
                    error = %err,
                    "backend credentials expired, refreshing cookies"
                );
                self.refresh_since(turn.observed).await?;

                match attempt().await {
                    Err(err) if err.is_auth_expired() => {
                        tracing::error!(
                            operation,
                            error = %err,
                            "backend still rejects credentials after refresh"
                        );
                        Err(GatewayError::AuthStillExpired(err.to_string()))
                    }
                    other => other.map_err(GatewayError::Backend),
                }
            }
            other => other.map_err(GatewayError::Backend),
        }
    }

    /// Force a refresh, joining one already in progress.
    pub async fn refresh_now(&self) -> Result<(), RefreshError> {
        let observed = self.epoch.load(Ordering::Acquire);
        self.refresh_since(observed).await
    }

    async fn refresh_since(&self, observed: u64) -> Result<(), RefreshError> {
        let mut last_outcome = self.last_outcome.lock().await;

        if self.epoch.load(Ordering::Acquire) != observed {
            if let Some(outcome) = last_outcome.as_ref() {
                tracing::debug!("reusing outcome of concurrent cookie refresh");
                return outcome.clone();
            }
        }

        tracing::info!("running cookie refresh");
        let outcome = match self.refresher.refresh().await {
            Ok(artifact) => {
                let generation = self.credentials.install(artifact).await;
                tracing::info!(generation, "cookie refresh succeeded");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "cookie refresh failed");
                Err(err)
            }
        };

        *last_outcome = Some(outcome.clone());
        self.epoch.fetch_add(1, Ordering::AcqRel);
        outcome
    }
}
