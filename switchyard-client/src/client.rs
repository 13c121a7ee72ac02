//! Request execution.
//!
//! This module provides the main [`Client`] type. One logical call runs in
//! passes; each pass builds a [`WireRequest`] from the descriptor, runs the
//! adapt phase, dispatches it with transport-level retries and runs the
//! inspect phase. A response stage may ask for one rebuilt second pass.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use dashmap::DashMap;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use switchyard_core::{Decoder, encode_query, merge_parameters};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::ClientError;
use crate::builder::ClientBuilder;
use crate::config::RetryPolicy;
use crate::interceptor::{Decision, InspectContext, InterceptorChain};
use crate::registry::DomainRegistry;
use crate::request::{ParameterEncoding, Placement, RequestDescriptor, RequestId, WireRequest};
use crate::response::{DecodedResponse, Metrics, RawResponse};
use crate::transport::Transport;

/// A call makes at most this many build-dispatch-inspect passes.
const MAX_PASSES: u32 = 2;

/// Handle to a call started with [`Client::execute_with_callback`].
#[derive(Clone, Debug)]
pub struct CallHandle {
    id: RequestId,
    token: CancellationToken,
}

impl CallHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Cancel the call. Its callback receives [`ClientError::Cancelled`].
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct InFlight {
    token: CancellationToken,
    retry_policy: Option<RetryPolicy>,
}

/// Removes the call's in-flight entry when the call resolves or is dropped.
struct InFlightGuard {
    inner: Arc<ClientInner>,
    id: RequestId,
    token: CancellationToken,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.id);
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    registry: DomainRegistry,
    interceptors: Arc<InterceptorChain>,
    timeout: Duration,
    retry_policy: RetryPolicy,
    common_headers: HeaderMap,
    common_parameters: Option<Value>,
    default_encoding: ParameterEncoding,
    decoder: Arc<dyn Decoder>,
    in_flight: DashMap<RequestId, InFlight>,
    next_id: AtomicU64,
}

/// The request executor.
///
/// Cloning is cheap; clones share configuration, interceptors and the
/// in-flight table. Calls share no mutable state apart from the refresh
/// coordinator their interceptors use.
///
/// Use [`ClientBuilder`] or [`Client::builder`] to create an instance.
///
/// # Example
///
/// ```ignore
/// use switchyard_client::{Client, RequestDescriptor};
/// use http::Method;
///
/// let client = Client::builder().registry(registry).build()?;
///
/// let login = RequestDescriptor::builder("api", "/login")
///     .method(Method::POST)
///     .json(&Credentials { username: "u", password: "p" })
///     .build()?;
///
/// let session = client.execute::<Session>(&login).await?;
/// println!("token: {}", session.token);
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.inner.registry)
            .field("interceptors", &self.inner.interceptors)
            .field("timeout", &self.inner.timeout)
            .field("retry_policy", &self.inner.retry_policy)
            .field("in_flight", &self.inner.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a new [`ClientBuilder`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Called by [`ClientBuilder::build`].
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        registry: DomainRegistry,
        interceptors: Arc<InterceptorChain>,
        timeout: Duration,
        retry_policy: RetryPolicy,
        common_headers: HeaderMap,
        common_parameters: Option<Value>,
        default_encoding: ParameterEncoding,
        decoder: Arc<dyn Decoder>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                registry,
                interceptors,
                timeout,
                retry_policy,
                common_headers,
                common_parameters,
                default_encoding,
                decoder,
                in_flight: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The interceptor chain, for registering or removing stages at runtime.
    pub fn interceptors(&self) -> &Arc<InterceptorChain> {
        &self.inner.interceptors
    }

    pub fn registry(&self) -> &DomainRegistry {
        &self.inner.registry
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Cancel one call. Returns false if it is no longer in flight.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.inner.in_flight.get(&id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every call in flight, e.g. on logout.
    pub fn cancel_all(&self) {
        let mut cancelled = 0;
        for entry in self.inner.in_flight.iter() {
            entry.token.cancel();
            cancelled += 1;
        }
        tracing::debug!(cancelled, "cancelled all in-flight calls");
    }

    /// Replace the retry policy of a call in flight.
    ///
    /// Takes effect at the call's next retry decision. Returns false if the
    /// call is no longer in flight.
    pub fn override_retry_policy(&self, id: RequestId, policy: RetryPolicy) -> bool {
        match self.inner.in_flight.get_mut(&id) {
            Some(mut entry) => {
                entry.retry_policy = Some(policy);
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute a call and decode its body into `T`.
    pub async fn execute<T>(&self, descriptor: &RequestDescriptor) -> Result<DecodedResponse<T>, ClientError>
    where
        T: DeserializeOwned,
    {
        self.execute_cancellable(descriptor, CancellationToken::new())
            .await
    }

    /// Execute a call that ends with [`ClientError::Cancelled`] once `token`
    /// is cancelled.
    pub async fn execute_cancellable<T>(
        &self,
        descriptor: &RequestDescriptor,
        token: CancellationToken,
    ) -> Result<DecodedResponse<T>, ClientError>
    where
        T: DeserializeOwned,
    {
        let guard = self.register(token);
        let raw = self.call(&guard, descriptor).await?;
        self.decode(descriptor, raw)
    }

    /// Execute a call and return the undecoded body.
    pub async fn execute_raw(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<DecodedResponse<Bytes>, ClientError> {
        let guard = self.register(CancellationToken::new());
        self.call(&guard, descriptor).await
    }

    /// Start a call on `runtime` and return immediately.
    ///
    /// `callback` runs exactly once on `runtime` with the outcome, including
    /// when the call is cancelled through the returned handle.
    pub fn execute_with_callback<T, F>(
        &self,
        descriptor: RequestDescriptor,
        runtime: &Handle,
        callback: F,
    ) -> CallHandle
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(Result<DecodedResponse<T>, ClientError>) + Send + 'static,
    {
        let guard = self.register(CancellationToken::new());
        let handle = CallHandle {
            id: guard.id,
            token: guard.token.clone(),
        };
        let client = self.clone();
        runtime.spawn(async move {
            let result = match client.call(&guard, &descriptor).await {
                Ok(raw) => client.decode(&descriptor, raw),
                Err(err) => Err(err),
            };
            drop(guard);
            callback(result);
        });
        handle
    }

    fn register(&self, token: CancellationToken) -> InFlightGuard {
        let id = RequestId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.in_flight.insert(
            id,
            InFlight {
                token: token.clone(),
                retry_policy: None,
            },
        );
        InFlightGuard {
            inner: self.inner.clone(),
            id,
            token,
        }
    }

    async fn call(
        &self,
        guard: &InFlightGuard,
        descriptor: &RequestDescriptor,
    ) -> Result<DecodedResponse<Bytes>, ClientError> {
        let span = tracing::info_span!(
            "http.call",
            target = %descriptor.target(),
            path = %descriptor.path(),
            method = %descriptor.method(),
            request_id = %guard.id,
        );
        async {
            let result = self.run(guard.id, descriptor, &guard.token).await;
            let (response, metrics) = match result {
                Ok(done) => done,
                Err(err) => {
                    tracing::debug!(error = %err, kind = %err.kind(), "call failed");
                    return Err(err);
                }
            };
            if !response.is_success() {
                tracing::debug!(status = response.status.as_u16(), "call ended with error status");
                return Err(ClientError::HttpStatus {
                    status: response.status,
                    body: response.body,
                });
            }
            tracing::debug!(
                status = response.status.as_u16(),
                attempts = metrics.attempts,
                passes = metrics.passes,
                elapsed_ms = metrics.elapsed.as_millis() as u64,
                "call succeeded"
            );
            Ok(DecodedResponse::new(
                response.body,
                response.status,
                response.headers,
                metrics,
            ))
        }
        .instrument(span)
        .await
    }

    fn decode<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
        raw: DecodedResponse<Bytes>,
    ) -> Result<DecodedResponse<T>, ClientError> {
        let decoder = descriptor.decoder().unwrap_or(&self.inner.decoder);
        let value = decoder.decode(raw.get_ref())?;
        let data = serde_json::from_value::<T>(value)
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(raw.map(|_| data))
    }

    /// Run the passes of one call.
    async fn run(
        &self,
        id: RequestId,
        descriptor: &RequestDescriptor,
        token: &CancellationToken,
    ) -> Result<(RawResponse, Metrics), ClientError> {
        let started_at = SystemTime::now();
        let start = Instant::now();
        let chain = &self.inner.interceptors;
        let mut passes = 0;

        loop {
            passes += 1;
            // The request is rebuilt from the descriptor on every pass, so the
            // second pass sees the current environment and refreshed credentials.
            let request = self.build_request(id, descriptor)?;
            let request = cancellable(token, chain.adapt(request)).await??;
            let (outcome, attempts) = self.dispatch(id, descriptor, &request, token).await?;

            let ctx = InspectContext {
                request: &request,
                outcome: &outcome,
                attempts,
                is_retry: passes > 1,
            };
            let decision = chain.inspect(&ctx).await;
            match decision {
                Decision::Proceed => {
                    let metrics = Metrics {
                        attempts,
                        passes,
                        started_at,
                        elapsed: start.elapsed(),
                    };
                    return outcome.map(|response| (response, metrics));
                }
                Decision::Fail(err) => return Err(err),
                Decision::RetryAfter(_, stage) if passes >= MAX_PASSES => {
                    tracing::debug!(stage = stage.name(), "retry requested on the retried pass");
                    return Err(stage.exhausted(&ctx));
                }
                Decision::RetryAfter(delay, stage) => {
                    tracing::debug!(
                        stage = stage.name(),
                        delay_ms = delay.as_millis() as u64,
                        "response stage requested a retry"
                    );
                    cancellable(token, tokio::time::sleep(delay)).await?;
                    cancellable(token, stage.recover(&ctx)).await??;
                }
            }
        }
    }

    /// Send one wire request, resending it while the retry policy allows.
    ///
    /// Returns the last outcome and the number of sends. The outer error is
    /// only ever `Cancelled`.
    async fn dispatch(
        &self,
        id: RequestId,
        descriptor: &RequestDescriptor,
        request: &WireRequest,
        token: &CancellationToken,
    ) -> Result<(Result<RawResponse, ClientError>, u32), ClientError> {
        let mut attempt = 0;
        loop {
            let send = self.inner.transport.send(request.clone());
            let outcome = match cancellable(token, tokio::time::timeout(request.timeout, send)).await? {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(ClientError::from(err)),
                Err(_) => Err(ClientError::Timeout(request.timeout)),
            };

            let policy = self.retry_policy(id, descriptor);
            let retry = match &outcome {
                Ok(response) => policy.should_retry(None, request, Some(response), attempt),
                Err(err) => policy.should_retry(Some(err), request, None, attempt),
            };
            if !retry {
                return Ok((outcome, attempt + 1));
            }

            let delay = policy.delay(attempt);
            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                reason = %retry_reason(&outcome),
                "retrying request"
            );
            cancellable(token, tokio::time::sleep(delay)).await?;
            attempt += 1;
        }
    }

    /// In-flight override, then the descriptor's policy, then the client default.
    fn retry_policy(&self, id: RequestId, descriptor: &RequestDescriptor) -> RetryPolicy {
        self.inner
            .in_flight
            .get(&id)
            .and_then(|entry| entry.retry_policy.clone())
            .or_else(|| descriptor.retry_policy().cloned())
            .unwrap_or_else(|| self.inner.retry_policy.clone())
    }

    fn build_request(
        &self,
        id: RequestId,
        descriptor: &RequestDescriptor,
    ) -> Result<WireRequest, ClientError> {
        let base = self.inner.registry.resolve(descriptor.target())?;
        let mut url = join_url(&base, descriptor.path());

        let mut headers = if descriptor.uses_common_headers() {
            self.inner.common_headers.clone()
        } else {
            HeaderMap::new()
        };
        // Descriptor headers replace common headers of the same name.
        for name in descriptor.headers().keys() {
            headers.remove(name);
        }
        for (name, value) in descriptor.headers() {
            headers.append(name.clone(), value.clone());
        }

        let parameters = descriptor.parameters().cloned().unwrap_or(Value::Null);
        let parameters = match &self.inner.common_parameters {
            Some(common) if descriptor.uses_common_parameters() => {
                merge_parameters(common, parameters)
            }
            _ => parameters,
        };

        let encoding = match descriptor.encoding() {
            ParameterEncoding::Automatic => &self.inner.default_encoding,
            encoding => encoding,
        };
        let body = match encoding.placement(descriptor.method()) {
            Placement::Query => {
                let query = encode_query(&parameters)?;
                if !query.is_empty() {
                    url.push(if url.contains('?') { '&' } else { '?' });
                    url.push_str(&query);
                }
                Bytes::new()
            }
            Placement::Body(_) if parameters.is_null() => Bytes::new(),
            Placement::Body(encoder) => {
                let body = encoder.encode(&parameters)?;
                if !headers.contains_key(CONTENT_TYPE) {
                    let content_type = HeaderValue::from_str(encoder.content_type()).map_err(|_| {
                        ClientError::invalid_request(format!(
                            "invalid content type: {}",
                            encoder.content_type()
                        ))
                    })?;
                    headers.insert(CONTENT_TYPE, content_type);
                }
                body
            }
        };

        let request = WireRequest {
            id,
            target: descriptor.target().to_string(),
            path: descriptor.path().to_string(),
            method: descriptor.method().clone(),
            url,
            headers,
            body,
            timeout: descriptor.timeout().unwrap_or(self.inner.timeout),
        };
        request.uri()?;
        Ok(request)
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn retry_reason(outcome: &Result<RawResponse, ClientError>) -> String {
    match outcome {
        Ok(response) => format!("status {}", response.status),
        Err(err) => err.to_string(),
    }
}

/// Race `future` against the call's cancellation.
async fn cancellable<F: Future>(
    token: &CancellationToken,
    future: F,
) -> Result<F::Output, ClientError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ClientError::Cancelled),
        output = future => Ok(output),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{ScriptedTransport, Step};
    use super::*;
    use crate::interceptor::{BearerAuthInterceptor, BusinessCodeInterceptor, SharedToken, TokenExpiryInterceptor};
    use crate::refresh::TokenRefreshCoordinator;
    use crate::registry::{DomainTarget, Environment};
    use crate::error::RefreshError;
    use http::Method;
    use http::header::AUTHORIZATION;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use switchyard_core::{ErrorKind, TransportErrorKind};
    use tokio::sync::{Notify, oneshot};

    fn registry() -> DomainRegistry {
        let registry = DomainRegistry::with_environment(Environment::develop("d1"));
        registry.register(
            "api",
            DomainTarget::new()
                .develop("d1", "https://x.test")
                .release("https://api.example.com"),
        );
        registry
    }

    fn builder(transport: &ScriptedTransport) -> ClientBuilder {
        Client::builder()
            .transport(transport.clone())
            .registry(registry())
    }

    fn get(path: &str) -> RequestDescriptor {
        RequestDescriptor::builder("api", path).build().unwrap()
    }

    fn counting_refresh(token: SharedToken, calls: Arc<AtomicU32>) -> TokenRefreshCoordinator {
        let coordinator = TokenRefreshCoordinator::new();
        coordinator.set_handler(move || {
            let token = token.clone();
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                token.set("new");
                Ok::<(), RefreshError>(())
            }
        });
        coordinator
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_are_retried_with_backoff() {
        let transport = ScriptedTransport::new()
            .respond(503, "")
            .respond(503, "")
            .respond(200, r#"{"n":3}"#);
        let policy = RetryPolicy::exponential(2.0, Duration::from_secs(60)).max_attempts(2);
        let client = builder(&transport)
            .retry_policy(policy.clone())
            .build()
            .unwrap();

        let start = Instant::now();
        let response = client.execute::<Value>(&get("/flaky")).await.unwrap();

        assert_eq!(response.get_ref()["n"], 3);
        assert!(start.elapsed() >= policy.delay(0) + policy.delay(1));
        assert_eq!(response.metrics().attempts, 3);
        assert_eq!(response.metrics().passes, 1);
        assert_eq!(transport.sends(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_last_status() {
        let transport = ScriptedTransport::new().always(Step::Respond(502, "bad gateway"));
        let client = builder(&transport)
            .retry_policy(RetryPolicy::fixed(Duration::from_secs(1)).max_attempts(2))
            .build()
            .unwrap();

        let err = client.execute::<Value>(&get("/down")).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::HttpStatus { status, ref body } if status.as_u16() == 502 && body == "bad gateway"
        ));
        assert_eq!(transport.sends(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_failures_are_retried() {
        let transport = ScriptedTransport::new()
            .then(Step::Fail(TransportErrorKind::ConnectionRefused))
            .then(Step::Fail(TransportErrorKind::Dns))
            .respond(200, "{}");
        let client = builder(&transport)
            .retry_policy(RetryPolicy::fixed(Duration::from_millis(100)))
            .build()
            .unwrap();

        let response = client.execute::<Value>(&get("/")).await.unwrap();
        assert_eq!(response.metrics().attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried() {
        let transport = ScriptedTransport::new().then(Step::Hang).respond(200, "{}");
        let client = builder(&transport)
            .timeout(Duration::from_secs(1))
            .retry_policy(RetryPolicy::fixed(Duration::ZERO))
            .build()
            .unwrap();

        let response = client.execute::<Value>(&get("/")).await.unwrap();
        assert_eq!(response.metrics().attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_retry() {
        let transport = ScriptedTransport::new().always(Step::Hang);
        let client = builder(&transport)
            .retry_policy(RetryPolicy::no_retry())
            .build()
            .unwrap();
        let descriptor = RequestDescriptor::builder("api", "/slow")
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        let err = client.execute::<Value>(&descriptor).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(d) if d == Duration::from_secs(2)));
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_auth_expiry_refreshes_once_and_stops_after_two_passes() {
        let transport = ScriptedTransport::new().always(Step::Respond(401, ""));
        let refreshes = Arc::new(AtomicU32::new(0));
        let coordinator = counting_refresh(SharedToken::new(), refreshes.clone());

        let delays = Arc::new(AtomicU32::new(0));
        let counted = delays.clone();
        let policy = RetryPolicy::custom(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            Duration::ZERO
        });

        let client = builder(&transport)
            .retry_policy(policy)
            .with_response_interceptor(TokenExpiryInterceptor::new(coordinator))
            .build()
            .unwrap();

        let err = client.execute::<Value>(&get("/me")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
        assert_eq!(transport.sends(), 2);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(delays.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_rebuilds_request_with_new_token() {
        let token = SharedToken::with_token("old");
        let refreshes = Arc::new(AtomicU32::new(0));
        let coordinator = counting_refresh(token.clone(), refreshes.clone());
        let transport = ScriptedTransport::new()
            .respond(401, "")
            .respond(200, r#"{"name":"u"}"#);

        let client = builder(&transport)
            .with_request_interceptor(BearerAuthInterceptor::new(token))
            .with_response_interceptor(TokenExpiryInterceptor::new(coordinator))
            .build()
            .unwrap();

        let response = client.execute::<Value>(&get("/me")).await.unwrap();
        assert_eq!(response.get_ref()["name"], "u");
        assert_eq!(response.metrics().passes, 2);

        let requests = transport.requests();
        assert_eq!(requests[0].headers[AUTHORIZATION], "Bearer old");
        assert_eq!(requests[1].headers[AUTHORIZATION], "Bearer new");
        assert_ne!(requests[0].id, RequestId(0));
        assert_eq!(requests[0].id, requests[1].id);
    }

    #[tokio::test]
    async fn test_concurrent_expiries_share_one_refresh() {
        let token = SharedToken::with_token("old");
        let refreshes = Arc::new(AtomicU32::new(0));
        let gate = Arc::new(Notify::new());

        let coordinator = TokenRefreshCoordinator::new();
        {
            let token = token.clone();
            let refreshes = refreshes.clone();
            let gate = gate.clone();
            coordinator.set_handler(move || {
                let token = token.clone();
                let refreshes = refreshes.clone();
                let gate = gate.clone();
                async move {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    token.set("new");
                    Ok::<(), RefreshError>(())
                }
            });
        }

        let transport = ScriptedTransport::new().responding(|request| {
            match request.headers.get(AUTHORIZATION) {
                Some(value) if value == "Bearer new" => Step::Respond(200, "{}"),
                _ => Step::Respond(401, ""),
            }
        });
        let client = builder(&transport)
            .with_request_interceptor(BearerAuthInterceptor::new(token))
            .with_response_interceptor(TokenExpiryInterceptor::new(coordinator.clone()))
            .build()
            .unwrap();

        let calls: Vec<_> = (0..5)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.execute::<Value>(&get("/me")).await })
            })
            .collect();

        while coordinator.status().waiting < 5 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for call in calls {
            let response = call.await.unwrap().unwrap();
            assert_eq!(response.metrics().passes, 2);
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.sends(), 10);
    }

    #[tokio::test]
    async fn test_refresh_failure_reaches_the_caller() {
        let coordinator = TokenRefreshCoordinator::new();
        coordinator.set_handler(|| async { Err::<(), _>(RefreshError::failed("auth server down")) });
        let transport = ScriptedTransport::new().always(Step::Respond(401, ""));
        let client = builder(&transport)
            .with_response_interceptor(TokenExpiryInterceptor::new(coordinator))
            .build()
            .unwrap();

        let err = client.execute::<Value>(&get("/me")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefreshFailed);
        // The rebuilt request is never sent.
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test]
    async fn test_get_parameters_go_into_query() {
        let transport = ScriptedTransport::new().respond(200, "{}");
        let client = builder(&transport)
            .common_parameters(json!({"app": "demo", "lang": "en"}))
            .build()
            .unwrap();
        let descriptor = RequestDescriptor::builder("api", "items")
            .parameters(json!({"lang": "fr", "q": "rust"}))
            .build()
            .unwrap();

        client.execute::<Value>(&descriptor).await.unwrap();

        let request = &transport.requests()[0];
        assert!(request.body.is_empty());
        assert!(request.url.starts_with("https://x.test/items?"));
        assert!(request.url.contains("app=demo"));
        assert!(request.url.contains("lang=fr"));
        assert!(request.url.contains("q=rust"));
        assert!(!request.url.contains("lang=en"));
    }

    #[tokio::test]
    async fn test_post_parameters_go_into_json_body() {
        let transport = ScriptedTransport::new().respond(200, "{}").respond(200, "{}");
        let client = builder(&transport)
            .common_header("x-trace", "common")
            .common_header("x-app", "demo")
            .common_parameters(json!({"device": "d-1"}))
            .build()
            .unwrap();

        let login = RequestDescriptor::builder("api", "/login")
            .method(Method::POST)
            .header("x-trace", "t1")
            .parameters(json!({"username": "u", "password": "p"}))
            .build()
            .unwrap();
        client.execute::<Value>(&login).await.unwrap();

        let private = RequestDescriptor::builder("api", "/login")
            .method(Method::POST)
            .common_headers(false)
            .common_parameters(false)
            .build()
            .unwrap();
        client.execute::<Value>(&private).await.unwrap();

        let requests = transport.requests();
        let request = &requests[0];
        assert_eq!(request.url, "https://x.test/login");
        assert_eq!(request.headers[CONTENT_TYPE], "application/json");
        assert_eq!(request.headers.get_all("x-trace").iter().count(), 1);
        assert_eq!(request.headers["x-trace"], "t1");
        assert_eq!(request.headers["x-app"], "demo");
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body, json!({"username": "u", "password": "p", "device": "d-1"}));

        let request = &requests[1];
        assert!(request.headers.get("x-app").is_none());
        assert!(request.headers.get(CONTENT_TYPE).is_none());
        assert!(request.body.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_target_is_not_sent() {
        let transport = ScriptedTransport::new().always(Step::Respond(200, "{}"));
        let client = builder(&transport).build().unwrap();

        let descriptor = RequestDescriptor::builder("upload", "/file").build().unwrap();
        let err = client.execute::<Value>(&descriptor).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTarget);
        assert_eq!(transport.sends(), 0);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_environment_switch_changes_base_url() {
        let transport = ScriptedTransport::new().always(Step::Respond(200, "{}"));
        let client = builder(&transport).build().unwrap();

        client.execute::<Value>(&get("/a")).await.unwrap();
        client.registry().set_environment(Environment::Release);
        client.execute::<Value>(&get("/a")).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].url, "https://x.test/a");
        assert_eq!(requests[1].url, "https://api.example.com/a");
    }

    #[tokio::test]
    async fn test_decode_failure_is_not_retried() {
        let transport = ScriptedTransport::new().always(Step::Respond(200, "not json"));
        let client = builder(&transport).build().unwrap();

        let err = client.execute::<Value>(&get("/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeFailure);
        assert_eq!(transport.sends(), 1);

        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Profile {
            name: String,
        }
        let transport = ScriptedTransport::new().respond(200, r#"{"id":1}"#);
        let client = builder(&transport).build().unwrap();
        let err = client.execute::<Profile>(&get("/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeFailure);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let transport = ScriptedTransport::new().always(Step::Respond(404, "missing"));
        let client = builder(&transport).build().unwrap();

        let err = client.execute::<Value>(&get("/nope")).await.unwrap_err();
        assert_eq!(err.status(), Some(http::StatusCode::NOT_FOUND));
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test]
    async fn test_descriptor_retry_policy_wins() {
        let transport = ScriptedTransport::new().always(Step::Respond(503, ""));
        let client = builder(&transport).build().unwrap();
        let descriptor = RequestDescriptor::builder("api", "/")
            .retry_policy(RetryPolicy::no_retry())
            .build()
            .unwrap();

        let err = client.execute::<Value>(&descriptor).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpStatus);
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_retry_override() {
        let transport = ScriptedTransport::new().always(Step::Respond(503, ""));
        let client = builder(&transport)
            .retry_policy(RetryPolicy::fixed(Duration::from_secs(10)).max_attempts(5))
            .build()
            .unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = client.execute_with_callback::<Value, _>(get("/"), &Handle::current(), move |result| {
            let _ = tx.send(result);
        });
        while transport.sends() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(client.override_retry_policy(handle.id(), RetryPolicy::no_retry()));

        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpStatus);
        assert_eq!(transport.sends(), 2);
        assert!(!client.override_retry_policy(handle.id(), RetryPolicy::no_retry()));
    }

    #[tokio::test]
    async fn test_business_code_fails_call() {
        let transport = ScriptedTransport::new().respond(200, r#"{"code":7,"message":"nope"}"#);
        let client = builder(&transport)
            .with_response_interceptor(BusinessCodeInterceptor::new())
            .build()
            .unwrap();

        let err = client.execute::<Value>(&get("/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Business);
    }

    #[tokio::test]
    async fn test_execute_raw_returns_body_bytes() {
        let transport = ScriptedTransport::new().respond(200, "plain text");
        let client = builder(&transport).build().unwrap();

        let response = client.execute_raw(&get("/")).await.unwrap();
        assert_eq!(response.get_ref(), &Bytes::from_static(b"plain text"));
        assert_eq!(response.status(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_execute_with_callback_runs_once() {
        let transport = ScriptedTransport::new().respond(200, r#"{"ok":true}"#);
        let client = builder(&transport).build().unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = client.execute_with_callback::<Value, _>(get("/ping"), &Handle::current(), move |result| {
            let _ = tx.send(result);
        });
        assert!(handle.id().get() > 0);

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.get_ref()["ok"], true);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_delay() {
        let transport = ScriptedTransport::new().always(Step::Respond(503, ""));
        let client = builder(&transport)
            .retry_policy(RetryPolicy::fixed(Duration::from_secs(10)))
            .build()
            .unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = client.execute_with_callback::<Value, _>(get("/"), &Handle::current(), move |result| {
            let _ = tx.send(result);
        });
        while transport.sends() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(client.in_flight(), 1);
        assert!(client.cancel(handle.id()));

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        assert_eq!(transport.sends(), 1);
        assert_eq!(client.in_flight(), 0);
        assert!(!client.cancel(handle.id()));
    }

    #[tokio::test]
    async fn test_cancel_during_recovery_skips_rebuilt_request() {
        let gate = Arc::new(Notify::new());
        let coordinator = TokenRefreshCoordinator::new();
        {
            let gate = gate.clone();
            coordinator.set_handler(move || {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok::<(), RefreshError>(())
                }
            });
        }
        let transport = ScriptedTransport::new().always(Step::Respond(401, ""));
        let client = builder(&transport)
            .with_response_interceptor(TokenExpiryInterceptor::new(coordinator.clone()))
            .build()
            .unwrap();

        let token = CancellationToken::new();
        let call = {
            let client = client.clone();
            let token = token.clone();
            tokio::spawn(async move { client.execute_cancellable::<Value>(&get("/"), token).await })
        };
        while coordinator.status().waiting == 0 {
            tokio::task::yield_now().await;
        }
        token.cancel();

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(transport.sends(), 1);
        gate.notify_one();
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let transport = ScriptedTransport::new().always(Step::Hang);
        let client = builder(&transport).build().unwrap();

        let calls: Vec<_> = (0..3)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.execute::<Value>(&get("/")).await })
            })
            .collect();
        while transport.sends() < 3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(client.in_flight(), 3);

        client.cancel_all();
        for call in calls {
            assert!(matches!(call.await.unwrap(), Err(ClientError::Cancelled)));
        }
        assert_eq!(client.in_flight(), 0);
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://x.test", "/login"), "https://x.test/login");
        assert_eq!(join_url("https://x.test/", "login"), "https://x.test/login");
        assert_eq!(join_url("https://x.test/v1/", "/users"), "https://x.test/v1/users");
        assert_eq!(join_url("https://x.test", ""), "https://x.test");
    }
}
