//! HTTP request orchestration for Rust.
//!
//! This crate sits between application code and an HTTP transport. Requests
//! are described declaratively against logical targets, run through ordered
//! interceptor pipelines, resent under a retry policy, and recover from
//! expired credentials through a single shared token refresh.
//!
//! ## Features
//!
//! - Environment-aware base URLs ([`DomainRegistry`])
//! - Ordered request and response interceptors ([`InterceptorChain`])
//! - Fixed, exponential and custom backoff with pluggable eligibility ([`RetryPolicy`])
//! - Deduplicated token refresh with a circuit breaker ([`TokenRefreshCoordinator`])
//! - Per-call cancellation and in-flight bookkeeping
//! - A hyper + rustls transport ([`HyperTransport`])
//!
//! ## Example
//!
//! ```ignore
//! use http::Method;
//! use serde::Deserialize;
//! use switchyard_client::{Client, DomainRegistry, DomainTarget, Environment, RequestDescriptor};
//!
//! #[derive(Deserialize)]
//! struct Session {
//!     token: String,
//! }
//!
//! let registry = DomainRegistry::with_environment(Environment::develop("d1"));
//! registry.register(
//!     "api",
//!     DomainTarget::new()
//!         .develop("d1", "https://dev.example.com")
//!         .release("https://api.example.com"),
//! );
//!
//! let client = Client::builder().registry(registry).build()?;
//!
//! let login = RequestDescriptor::builder("api", "/login")
//!     .method(Method::POST)
//!     .parameters(serde_json::json!({"username": "u", "password": "p"}))
//!     .build()?;
//!
//! let session = client.execute::<Session>(&login).await?;
//! println!("token: {}", session.token);
//! ```
//!
//! ## Call Lifecycle
//!
//! Each call runs at most two passes. A pass:
//!
//! 1. resolves the target key and builds a [`WireRequest`] from the
//!    descriptor, common headers and merged common parameters
//! 2. runs the request stages in registration order
//! 3. sends the request, resending it while the [`RetryPolicy`] allows
//! 4. runs the response stages until one returns `RetryAfter` or `Fail`
//!
//! A `RetryAfter` on the first pass waits, runs the deciding stage's recovery
//! action (typically a token refresh) and starts the second pass. On the
//! second pass it ends the call with the stage's exhausted error.
//!
//! ## Token Refresh
//!
//! ```ignore
//! use switchyard_client::{
//!     BearerAuthInterceptor, Client, RefreshError, SharedToken, TokenExpiryInterceptor,
//!     TokenRefreshCoordinator,
//! };
//!
//! let token = SharedToken::new();
//! let coordinator = TokenRefreshCoordinator::new();
//! let slot = token.clone();
//! coordinator.set_handler(move || {
//!     let slot = slot.clone();
//!     async move {
//!         let fresh = renew().await.map_err(|e| RefreshError::failed(e.to_string()))?;
//!         slot.set(fresh);
//!         Ok(())
//!     }
//! });
//!
//! let client = Client::builder()
//!     .with_request_interceptor(BearerAuthInterceptor::new(token))
//!     .with_response_interceptor(TokenExpiryInterceptor::new(coordinator))
//!     .build()?;
//! ```
//!
//! Any number of calls that see a `401` at the same time share one refresh.
//!
//! ## Cancellation
//!
//! ```ignore
//! use tokio_util::sync::CancellationToken;
//!
//! let token = CancellationToken::new();
//! let call = client.execute_cancellable::<Profile>(&descriptor, token.clone());
//!
//! // Elsewhere:
//! token.cancel();
//! ```
//!
//! [`Client::cancel_all`] cancels every call in flight, e.g. on logout.
//!
//! ## Error Handling
//!
//! Every call ends with a [`ClientError`]. Its [`kind`](ClientError::kind)
//! is a stable [`ErrorKind`] to branch on:
//!
//! ```ignore
//! match client.execute::<Profile>(&descriptor).await {
//!     Ok(profile) => println!("{}", profile.name),
//!     Err(err) if err.kind() == ErrorKind::AuthExpired => prompt_login(),
//!     Err(err) => eprintln!("request failed: {}", err),
//! }
//! ```

mod builder;
mod client;
pub mod config;
mod error;
pub mod interceptor;
pub mod refresh;
pub mod registry;
pub mod request;
pub mod response;
pub mod transport;

pub use builder::{ClientBuildError, ClientBuilder, defaults};
pub use client::{CallHandle, Client};
pub use error::{ClientError, RefreshError};

// Re-export from config module
pub use config::{Backoff, DefaultEligibility, RetryEligibility, RetryPolicy};

// Re-export from interceptor module
pub use interceptor::{
    BearerAuthInterceptor, BoxFuture, BusinessCodeInterceptor, FnRequestInterceptor,
    FnResponseInterceptor, HeaderInterceptor, InspectContext, InterceptOutcome, InterceptorChain,
    LoggingInterceptor, RequestInterceptor, ResponseInterceptor, SharedToken,
    TokenExpiryInterceptor, request_fn, response_fn,
};

pub use refresh::{RefreshHandler, RefreshStatus, TokenRefreshCoordinator};
pub use registry::{DomainRegistry, DomainTarget, Environment, ParseEnvironmentError};

pub use request::{ParameterEncoding, RequestDescriptor, RequestDescriptorBuilder, RequestId, WireRequest};
pub use response::{DecodedResponse, Metrics, RawResponse};

// Re-export transport types at the top level for convenience
pub use transport::{HyperTransport, HyperTransportBuilder, TlsClientConfig, Transport};

// Re-export core types that users need
pub use switchyard_core::{
    CodecError, Decoder, Encoder, ErrorKind, FormEncoder, JsonDecoder, JsonEncoder,
    TransportError, TransportErrorKind,
};

pub use bytes::Bytes;
pub use tokio_util::sync::CancellationToken;
