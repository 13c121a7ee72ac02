//! Token refresh coordination.
//!
//! When several in-flight calls discover at the same time that the
//! credentials have expired, only one refresh should reach the auth server.
//! [`TokenRefreshCoordinator`] collapses concurrent triggers into a single
//! underlying refresh and hands its outcome to every caller that asked while
//! it was running.
//!
//! # Example
//!
//! ```ignore
//! use switchyard_client::{RefreshError, TokenRefreshCoordinator};
//!
//! let coordinator = TokenRefreshCoordinator::new();
//! coordinator.set_handler(move || {
//!     let token = token.clone();
//!     async move {
//!         let fresh = fetch_token().await.map_err(|e| RefreshError::failed(e.to_string()))?;
//!         token.set(fresh);
//!         Ok(())
//!     }
//! });
//!
//! // From any number of concurrent tasks:
//! coordinator.handle_expired().await?;
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::SystemTime;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::RefreshError;
use crate::interceptor::BoxFuture;

/// Default number of consecutive failures that opens the circuit.
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// The operation that actually refreshes credentials.
///
/// Any `Fn() -> impl Future<Output = Result<(), RefreshError>>` implements
/// this trait.
pub trait RefreshHandler: Send + Sync + 'static {
    /// Refresh the credentials.
    fn refresh(&self) -> BoxFuture<'static, Result<(), RefreshError>>;
}

impl<F, Fut> RefreshHandler for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RefreshError>> + Send + 'static,
{
    fn refresh(&self) -> BoxFuture<'static, Result<(), RefreshError>> {
        Box::pin(self())
    }
}

type Waiter = oneshot::Sender<Result<(), RefreshError>>;

struct State {
    is_refreshing: bool,
    // Invariant: empty whenever `is_refreshing` is false.
    waiters: Vec<Waiter>,
    failure_count: u32,
    max_failures: u32,
    last_success: Option<SystemTime>,
    // Bumped by `reset`; a refresh started under an older generation is discarded.
    generation: u64,
    // The running handler task; aborted by `reset`.
    task: Option<AbortHandle>,
    handler: Option<Arc<dyn RefreshHandler>>,
}

/// A point-in-time view of the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshStatus {
    pub is_refreshing: bool,
    /// Callers waiting on the running refresh.
    pub waiting: usize,
    pub failure_count: u32,
    pub last_success: Option<SystemTime>,
}

/// Collapses concurrent refresh triggers into one in-flight refresh.
///
/// The coordinator is cheap to clone; clones share state. The state lock is
/// held only for transitions, never across the refresh itself, and waiters
/// are resolved after it is released.
///
/// After `max_failures` consecutive failures the circuit opens: every
/// further [`handle_expired`](Self::handle_expired) fails with
/// [`RefreshError::Exhausted`] without calling the handler, until
/// [`reset`](Self::reset).
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    state: Arc<Mutex<State>>,
    // Held by the handler task for its whole run, including after an abort
    // until the aborted future is dropped.
    running: Arc<tokio::sync::Mutex<()>>,
}

impl Default for TokenRefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenRefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefreshCoordinator")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl TokenRefreshCoordinator {
    /// Create a coordinator with no handler.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                is_refreshing: false,
                waiters: Vec::new(),
                failure_count: 0,
                max_failures: DEFAULT_MAX_FAILURES,
                last_success: None,
                generation: 0,
                task: None,
                handler: None,
            })),
            running: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// The process-wide coordinator.
    ///
    /// Prefer passing an explicitly constructed coordinator around; this
    /// exists for applications that want a single shared default.
    pub fn global() -> &'static TokenRefreshCoordinator {
        static GLOBAL: OnceLock<TokenRefreshCoordinator> = OnceLock::new();
        GLOBAL.get_or_init(TokenRefreshCoordinator::new)
    }

    /// Set the number of consecutive failures that opens the circuit.
    pub fn with_max_failures(self, max_failures: u32) -> Self {
        self.lock().max_failures = max_failures;
        self
    }

    /// Install the refresh handler, replacing any previous one.
    pub fn set_handler(&self, handler: impl RefreshHandler) {
        self.lock().handler = Some(Arc::new(handler));
    }

    /// Returns whether a handler has been installed.
    pub fn has_handler(&self) -> bool {
        self.lock().handler.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot the coordinator's state.
    pub fn status(&self) -> RefreshStatus {
        let state = self.lock();
        RefreshStatus {
            is_refreshing: state.is_refreshing,
            waiting: state.waiters.len(),
            failure_count: state.failure_count,
            last_success: state.last_success,
        }
    }

    /// Report expired credentials and wait for the refresh outcome.
    ///
    /// The first caller starts the refresh; callers arriving while it runs
    /// wait for the same outcome. The refresh runs in its own task, so a
    /// caller that is dropped does not abort it for the others.
    pub async fn handle_expired(&self) -> Result<(), RefreshError> {
        let (rx, start) = {
            let mut state = self.lock();
            let Some(handler) = state.handler.clone() else {
                return Err(RefreshError::Unconfigured);
            };
            if state.failure_count >= state.max_failures {
                tracing::warn!(
                    failures = state.failure_count,
                    "token refresh circuit open, not refreshing"
                );
                return Err(RefreshError::Exhausted {
                    failures: state.failure_count,
                });
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            if state.is_refreshing {
                tracing::debug!(waiting = state.waiters.len(), "joining in-flight token refresh");
                (rx, None)
            } else {
                state.is_refreshing = true;
                (rx, Some((handler, state.generation)))
            }
        };

        if let Some((handler, generation)) = start {
            tracing::debug!(generation, "starting token refresh");
            let running = self.running.clone();
            let task = tokio::spawn(async move {
                let _running = running.lock_owned().await;
                handler.refresh().await
            });
            {
                let mut state = self.lock();
                if state.generation == generation {
                    state.task = Some(task.abort_handle());
                } else {
                    // Reset before the handle was recorded.
                    task.abort();
                }
            }
            let this = self.clone();
            tokio::spawn(async move {
                let result = match task.await {
                    Ok(result) => result,
                    Err(e) if e.is_cancelled() => Err(RefreshError::Cancelled),
                    Err(e) => Err(RefreshError::failed(format!("refresh task failed: {}", e))),
                };
                this.complete(generation, result);
            });
        }

        // A dropped sender means the refresh task is gone without an answer.
        rx.await.unwrap_or(Err(RefreshError::Cancelled))
    }

    fn complete(&self, generation: u64, result: Result<(), RefreshError>) {
        let waiters = {
            let mut state = self.lock();
            if state.generation != generation {
                tracing::debug!(generation, "discarding refresh outcome after reset");
                return;
            }
            state.is_refreshing = false;
            state.task = None;
            match &result {
                Ok(()) => {
                    state.failure_count = 0;
                    state.last_success = Some(SystemTime::now());
                    tracing::debug!(waiters = state.waiters.len(), "token refresh succeeded");
                }
                Err(err) => {
                    state.failure_count += 1;
                    tracing::warn!(
                        error = %err,
                        failures = state.failure_count,
                        waiters = state.waiters.len(),
                        "token refresh failed"
                    );
                }
            }
            std::mem::take(&mut state.waiters)
        };

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    /// Return to idle and clear the failure count.
    ///
    /// A running refresh is aborted at its next suspension point and its
    /// outcome is discarded. A refresh started afterwards does not call the
    /// handler until the aborted one is gone. Callers waiting on it receive
    /// [`RefreshError::Cancelled`].
    pub fn reset(&self) {
        let (waiters, task) = {
            let mut state = self.lock();
            state.generation += 1;
            state.is_refreshing = false;
            state.failure_count = 0;
            (std::mem::take(&mut state.waiters), state.task.take())
        };
        if let Some(task) = task {
            task.abort();
        }
        if !waiters.is_empty() {
            tracing::debug!(waiters = waiters.len(), "token refresh reset, cancelling waiters");
        }
        for waiter in waiters {
            let _ = waiter.send(Err(RefreshError::Cancelled));
        }
    }
}
