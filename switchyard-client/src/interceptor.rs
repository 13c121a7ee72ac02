//! Request and response interceptors.
//!
//! Every call runs through two ordered stage lists held by an
//! [`InterceptorChain`]:
//! - request stages ([`RequestInterceptor`]) adapt the [`WireRequest`] before
//!   it is dispatched; the first error aborts the call
//! - response stages ([`ResponseInterceptor`]) inspect the transport outcome
//!   and return an [`InterceptOutcome`]; the first `RetryAfter` or `Fail` wins
//!
//! A `RetryAfter` makes the client wait, run the deciding stage's
//! [`recover`](ResponseInterceptor::recover) action and rebuild the request
//! from its descriptor. That second pass happens at most once per call.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchyard_client::{Client, HeaderInterceptor, InterceptOutcome, response_fn};
//!
//! let client = Client::builder()
//!     .with_request_interceptor(HeaderInterceptor::try_new("x-app", "demo")?)
//!     .with_response_interceptor(response_fn("reject-teapots", |ctx| {
//!         match ctx.status() {
//!             Some(status) if status.as_u16() == 418 => {
//!                 InterceptOutcome::Fail(ctx.failure())
//!             }
//!             _ => InterceptOutcome::Proceed,
//!         }
//!     }))
//!     .build()?;
//! ```

mod auth;
mod business;
mod logging;

pub use auth::{BearerAuthInterceptor, SharedToken, TokenExpiryInterceptor};
pub use business::BusinessCodeInterceptor;
pub use logging::LoggingInterceptor;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use http::{HeaderName, HeaderValue, StatusCode};

use crate::request::WireRequest;
use crate::response::RawResponse;
use crate::ClientError;

/// Type alias for a boxed future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a response stage decided.
#[derive(Debug)]
pub enum InterceptOutcome {
    /// Nothing to do; let the next stage look.
    Proceed,
    /// Wait, run this stage's recovery action, then rebuild and resend.
    RetryAfter(Duration),
    /// End the call with this error.
    Fail(ClientError),
}

/// What a response stage gets to look at.
#[derive(Debug)]
pub struct InspectContext<'a> {
    /// The request as it was dispatched.
    pub request: &'a WireRequest,
    /// The transport outcome after transport-level retries.
    pub outcome: &'a Result<RawResponse, ClientError>,
    /// Transport sends made in this pass.
    pub attempts: u32,
    /// Whether this is the rebuilt, second pass of the call.
    pub is_retry: bool,
}

impl<'a> InspectContext<'a> {
    /// The response, if the transport produced one.
    pub fn response(&self) -> Option<&'a RawResponse> {
        self.outcome.as_ref().ok()
    }

    /// The transport error, if there was no response.
    pub fn error(&self) -> Option<&'a ClientError> {
        self.outcome.as_ref().err()
    }

    /// The response status, if there was a response.
    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|resp| resp.status)
    }

    /// The last observed error of this pass.
    ///
    /// This is the transport error if there was one, otherwise an
    /// `HttpStatus` error for a non-2xx response, otherwise
    /// `RetryExhausted`.
    pub fn failure(&self) -> ClientError {
        match self.outcome {
            Err(err) => err.clone(),
            Ok(resp) if !resp.is_success() => ClientError::HttpStatus {
                status: resp.status,
                body: resp.body.clone(),
            },
            Ok(resp) => ClientError::RetryExhausted {
                url: self.request.url.clone(),
                status: Some(resp.status),
            },
        }
    }
}

// ============================================================================
// Stage Traits
// ============================================================================

/// A stage of the adapt phase.
///
/// Stages run in registration order, each receiving the previous stage's
/// output. Returning an error aborts the call before anything is sent.
pub trait RequestInterceptor: Send + Sync + 'static {
    /// Transform the request.
    fn adapt(&self, request: WireRequest) -> BoxFuture<'_, Result<WireRequest, ClientError>>;

    /// Name used to remove the stage again. Defaults to the type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A stage of the inspect phase.
pub trait ResponseInterceptor: Send + Sync + 'static {
    /// Decide what to do with the transport outcome.
    fn inspect<'a>(&'a self, ctx: &'a InspectContext<'a>) -> BoxFuture<'a, InterceptOutcome>;

    /// Recovery action run after a `RetryAfter` delay and before the rebuild.
    ///
    /// An error here ends the call.
    fn recover<'a>(
        &'a self,
        ctx: &'a InspectContext<'a>,
    ) -> BoxFuture<'a, Result<(), ClientError>> {
        let _ = ctx;
        Box::pin(async { Ok(()) })
    }

    /// The error to surface when this stage asks for a retry on a call that
    /// was already retried.
    fn exhausted(&self, ctx: &InspectContext<'_>) -> ClientError {
        ctx.failure()
    }

    /// Name used to remove the stage again. Defaults to the type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

// ============================================================================
// Chain
// ============================================================================

type RequestStages = Arc<Vec<Arc<dyn RequestInterceptor>>>;
type ResponseStages = Arc<Vec<Arc<dyn ResponseInterceptor>>>;

/// The result of running the inspect phase.
pub(crate) enum Decision {
    Proceed,
    RetryAfter(Duration, Arc<dyn ResponseInterceptor>),
    Fail(ClientError),
}

/// Ordered request and response stages.
///
/// The stage lists are copy-on-write: a run snapshots the current list and
/// never holds a lock while a stage executes, so stages may be registered or
/// removed while calls are in flight. A call that already took its snapshot
/// is unaffected.
#[derive(Default)]
pub struct InterceptorChain {
    request: RwLock<RequestStages>,
    response: RwLock<ResponseStages>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("request_stages", &self.request_stages().len())
            .field("response_stages", &self.response_stages().len())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl InterceptorChain {
    /// Create a new empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the request stages.
    pub fn request_stages(&self) -> RequestStages {
        read(&self.request).clone()
    }

    /// Snapshot of the response stages.
    pub fn response_stages(&self) -> ResponseStages {
        read(&self.response).clone()
    }

    /// Append a request stage.
    pub fn add_request_stage(&self, stage: Arc<dyn RequestInterceptor>) {
        let mut guard = write(&self.request);
        let mut stages = Vec::clone(&guard);
        stages.push(stage);
        *guard = Arc::new(stages);
    }

    /// Insert a request stage at `index`, clamped to the list length.
    pub fn insert_request_stage(&self, index: usize, stage: Arc<dyn RequestInterceptor>) {
        let mut guard = write(&self.request);
        let mut stages = Vec::clone(&guard);
        stages.insert(index.min(stages.len()), stage);
        *guard = Arc::new(stages);
    }

    /// Remove every request stage with this name. Returns whether any was removed.
    pub fn remove_request_stage(&self, name: &str) -> bool {
        let mut guard = write(&self.request);
        let before = guard.len();
        let stages: Vec<_> = guard.iter().filter(|s| s.name() != name).cloned().collect();
        let removed = stages.len() != before;
        *guard = Arc::new(stages);
        removed
    }

    /// Append a response stage.
    pub fn add_response_stage(&self, stage: Arc<dyn ResponseInterceptor>) {
        let mut guard = write(&self.response);
        let mut stages = Vec::clone(&guard);
        stages.push(stage);
        *guard = Arc::new(stages);
    }

    /// Insert a response stage at `index`, clamped to the list length.
    pub fn insert_response_stage(&self, index: usize, stage: Arc<dyn ResponseInterceptor>) {
        let mut guard = write(&self.response);
        let mut stages = Vec::clone(&guard);
        stages.insert(index.min(stages.len()), stage);
        *guard = Arc::new(stages);
    }

    /// Remove every response stage with this name. Returns whether any was removed.
    pub fn remove_response_stage(&self, name: &str) -> bool {
        let mut guard = write(&self.response);
        let before = guard.len();
        let stages: Vec<_> = guard.iter().filter(|s| s.name() != name).cloned().collect();
        let removed = stages.len() != before;
        *guard = Arc::new(stages);
        removed
    }

    /// Run the adapt phase.
    pub async fn adapt(&self, mut request: WireRequest) -> Result<WireRequest, ClientError> {
        let stages = self.request_stages();
        for stage in stages.iter() {
            request = stage.adapt(request).await?;
        }
        Ok(request)
    }

    /// Run the inspect phase, stopping at the first decisive stage.
    pub(crate) async fn inspect(&self, ctx: &InspectContext<'_>) -> Decision {
        let stages = self.response_stages();
        for stage in stages.iter() {
            match stage.inspect(ctx).await {
                InterceptOutcome::Proceed => continue,
                InterceptOutcome::RetryAfter(delay) => {
                    return Decision::RetryAfter(delay, stage.clone());
                }
                InterceptOutcome::Fail(err) => return Decision::Fail(err),
            }
        }
        Decision::Proceed
    }
}

// ============================================================================
// Header Interceptor
// ============================================================================

/// A request stage that sets a fixed header.
///
/// # Example
///
/// ```
/// use switchyard_client::HeaderInterceptor;
///
/// let app = HeaderInterceptor::try_new("x-app-version", "1.4.2").unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct HeaderInterceptor {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderInterceptor {
    /// Create a header interceptor from pre-parsed values.
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }

    /// Create a header interceptor, returning an error if the name or value is invalid.
    pub fn try_new(name: &str, value: &str) -> Result<Self, ClientError> {
        let name = name
            .parse()
            .map_err(|_| ClientError::invalid_request(format!("invalid header name: {}", name)))?;
        let value = value
            .parse()
            .map_err(|_| ClientError::invalid_request(format!("invalid header value: {}", value)))?;
        Ok(Self { name, value })
    }
}

impl RequestInterceptor for HeaderInterceptor {
    fn adapt(&self, mut request: WireRequest) -> BoxFuture<'_, Result<WireRequest, ClientError>> {
        request.set_header(self.name.clone(), self.value.clone());
        Box::pin(async move { Ok(request) })
    }
}

// ============================================================================
// Closure Interceptors
// ============================================================================

/// A request stage backed by a synchronous closure. See [`request_fn`].
pub struct FnRequestInterceptor<F> {
    name: String,
    func: F,
}

/// Create a named request stage from a closure.
///
/// ```
/// use switchyard_client::request_fn;
///
/// let stage = request_fn("lowercase-path", |mut req| {
///     req.url = req.url.to_lowercase();
///     Ok(req)
/// });
/// ```
pub fn request_fn<F>(name: impl Into<String>, func: F) -> FnRequestInterceptor<F>
where
    F: Fn(WireRequest) -> Result<WireRequest, ClientError> + Send + Sync + 'static,
{
    FnRequestInterceptor {
        name: name.into(),
        func,
    }
}

impl<F> RequestInterceptor for FnRequestInterceptor<F>
where
    F: Fn(WireRequest) -> Result<WireRequest, ClientError> + Send + Sync + 'static,
{
    fn adapt(&self, request: WireRequest) -> BoxFuture<'_, Result<WireRequest, ClientError>> {
        let result = (self.func)(request);
        Box::pin(async move { result })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> std::fmt::Debug for FnRequestInterceptor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRequestInterceptor")
            .field("name", &self.name)
            .finish()
    }
}

/// A response stage backed by a synchronous closure. See [`response_fn`].
pub struct FnResponseInterceptor<F> {
    name: String,
    func: F,
}

/// Create a named response stage from a closure.
///
/// The stage has no recovery action; a `RetryAfter` from it simply rebuilds
/// the request after the delay.
pub fn response_fn<F>(name: impl Into<String>, func: F) -> FnResponseInterceptor<F>
where
    F: Fn(&InspectContext<'_>) -> InterceptOutcome + Send + Sync + 'static,
{
    FnResponseInterceptor {
        name: name.into(),
        func,
    }
}

impl<F> ResponseInterceptor for FnResponseInterceptor<F>
where
    F: Fn(&InspectContext<'_>) -> InterceptOutcome + Send + Sync + 'static,
{
    fn inspect<'a>(&'a self, ctx: &'a InspectContext<'a>) -> BoxFuture<'a, InterceptOutcome> {
        let outcome = (self.func)(ctx);
        Box::pin(async move { outcome })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> std::fmt::Debug for FnResponseInterceptor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnResponseInterceptor")
            .field("name", &self.name)
            .finish()
    }
}
