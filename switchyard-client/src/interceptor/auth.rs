//! Bearer token injection and expiry handling.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use http::header::AUTHORIZATION;
use http::{HeaderValue, StatusCode};
use switchyard_core::ErrorKind;

use super::{BoxFuture, InspectContext, InterceptOutcome, RequestInterceptor, ResponseInterceptor};
use crate::ClientError;
use crate::refresh::TokenRefreshCoordinator;
use crate::request::WireRequest;

/// A token shared between the auth interceptor and whoever refreshes it.
///
/// Clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot holding `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        let shared = Self::new();
        shared.set(token);
        shared
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// The current token, if any.
    pub fn get(&self) -> Option<String> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Sets `Authorization: Bearer <token>` from a [`SharedToken`].
///
/// Requests go out without the header while the slot is empty. Because the
/// token is read during the adapt phase, the rebuilt request of a retried
/// pass carries the refreshed token.
#[derive(Clone, Debug)]
pub struct BearerAuthInterceptor {
    token: SharedToken,
}

impl BearerAuthInterceptor {
    pub fn new(token: SharedToken) -> Self {
        Self { token }
    }
}

impl RequestInterceptor for BearerAuthInterceptor {
    fn adapt(&self, mut request: WireRequest) -> BoxFuture<'_, Result<WireRequest, ClientError>> {
        let result = match self.token.get() {
            Some(token) => HeaderValue::try_from(format!("Bearer {}", token))
                .map(|mut value| {
                    value.set_sensitive(true);
                    request.set_header(AUTHORIZATION, value);
                    request
                })
                .map_err(|_| ClientError::invalid_request("bearer token is not a valid header value")),
            None => Ok(request),
        };
        Box::pin(async move { result })
    }
}

/// Turns expired credentials into one refresh and a rebuilt request.
///
/// A response whose status is in the expiry set (default `401`), or a
/// transport outcome of kind `AuthExpired`, asks for a retry after `delay`.
/// The recovery action waits for the coordinator's refresh. When the
/// rebuilt request is rejected again the call fails with `AuthExpired`.
///
/// # Example
///
/// ```ignore
/// let token = SharedToken::new();
/// let coordinator = TokenRefreshCoordinator::new();
///
/// let client = Client::builder()
///     .with_request_interceptor(BearerAuthInterceptor::new(token.clone()))
///     .with_response_interceptor(TokenExpiryInterceptor::new(coordinator.clone()))
///     .build()?;
/// ```
#[derive(Clone, Debug)]
pub struct TokenExpiryInterceptor {
    coordinator: TokenRefreshCoordinator,
    statuses: Vec<StatusCode>,
    delay: Duration,
}

impl TokenExpiryInterceptor {
    pub fn new(coordinator: TokenRefreshCoordinator) -> Self {
        Self {
            coordinator,
            statuses: vec![StatusCode::UNAUTHORIZED],
            delay: Duration::ZERO,
        }
    }

    /// Replace the statuses that mean "credentials expired".
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Wait this long before refreshing. Default: none.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn is_expired(&self, ctx: &InspectContext<'_>) -> bool {
        match ctx.outcome {
            Ok(response) => self.statuses.contains(&response.status),
            Err(err) => err.kind() == ErrorKind::AuthExpired,
        }
    }
}

impl ResponseInterceptor for TokenExpiryInterceptor {
    fn inspect<'a>(&'a self, ctx: &'a InspectContext<'a>) -> BoxFuture<'a, InterceptOutcome> {
        let outcome = if self.is_expired(ctx) {
            tracing::debug!(url = %ctx.request.url, is_retry = ctx.is_retry, "credentials expired");
            InterceptOutcome::RetryAfter(self.delay)
        } else {
            InterceptOutcome::Proceed
        };
        Box::pin(async move { outcome })
    }

    fn recover<'a>(
        &'a self,
        _ctx: &'a InspectContext<'a>,
    ) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move { Ok(self.coordinator.handle_expired().await?) })
    }

    fn exhausted(&self, _ctx: &InspectContext<'_>) -> ClientError {
        ClientError::AuthExpired
    }
}
