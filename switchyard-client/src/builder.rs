//! Client builder.
//!
//! Provides a fluent API for configuring and building a [`Client`].

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use switchyard_core::{Decoder, JsonDecoder};

use crate::client::Client;
use crate::config::RetryPolicy;
use crate::interceptor::{InterceptorChain, RequestInterceptor, ResponseInterceptor};
use crate::registry::DomainRegistry;
use crate::request::ParameterEncoding;
use crate::transport::{HyperTransport, Transport, TransportBuildError};

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    /// Timeout of each transport send when neither the descriptor nor the
    /// builder sets one.
    pub const TIMEOUT: Duration = Duration::from_secs(60);
}

/// Builder for creating a [`Client`].
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use switchyard_client::{Client, DomainRegistry, LoggingInterceptor, RetryPolicy};
///
/// let client = Client::builder()
///     .registry(registry)
///     .timeout(Duration::from_secs(10))
///     .retry_policy(RetryPolicy::fixed(Duration::from_millis(200)))
///     .common_header("x-app", "demo")
///     .with_request_interceptor(LoggingInterceptor)
///     .build()?;
/// ```
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    registry: Option<DomainRegistry>,
    timeout: Duration,
    retry_policy: RetryPolicy,
    common_headers: HeaderMap,
    common_parameters: Option<Value>,
    default_encoding: ParameterEncoding,
    decoder: Arc<dyn Decoder>,
    interceptors: Option<Arc<InterceptorChain>>,
    request_stages: Vec<Arc<dyn RequestInterceptor>>,
    response_stages: Vec<Arc<dyn ResponseInterceptor>>,
    /// First invalid common header, reported by `build`.
    error: Option<ClientBuildError>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("transport", &self.transport.is_some())
            .field("registry", &self.registry)
            .field("timeout", &self.timeout)
            .field("retry_policy", &self.retry_policy)
            .field("common_headers", &self.common_headers)
            .field("common_parameters", &self.common_parameters)
            .field("default_encoding", &self.default_encoding)
            .field("request_stages", &self.request_stages.len())
            .field("response_stages", &self.response_stages.len())
            .finish()
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            transport: None,
            registry: None,
            timeout: defaults::TIMEOUT,
            retry_policy: RetryPolicy::default(),
            common_headers: HeaderMap::new(),
            common_parameters: None,
            default_encoding: ParameterEncoding::Automatic,
            decoder: Arc::new(JsonDecoder),
            interceptors: None,
            request_stages: Vec::new(),
            response_stages: Vec::new(),
            error: None,
        }
    }

    /// Use a custom transport.
    ///
    /// Without one, `build` creates a [`HyperTransport`] with default settings.
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Resolve target keys through this registry.
    ///
    /// Defaults to [`DomainRegistry::global`].
    pub fn registry(mut self, registry: DomainRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the default timeout of each transport send.
    ///
    /// Default: 60 seconds. A descriptor's own timeout takes precedence.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy for descriptors that carry none.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Add a header sent with every request that opts into common headers.
    ///
    /// An invalid name or value makes `build` fail.
    pub fn common_header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: std::fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: std::fmt::Display,
    {
        let header = key
            .try_into()
            .map_err(|e| ClientBuildError::InvalidHeader(format!("invalid header name: {}", e)))
            .and_then(|name| {
                value
                    .try_into()
                    .map(|value| (name, value))
                    .map_err(|e| {
                        ClientBuildError::InvalidHeader(format!("invalid header value: {}", e))
                    })
            });
        match header {
            Ok((name, value)) => {
                self.common_headers.insert(name, value);
            }
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    /// Add several common headers at once.
    pub fn common_headers(mut self, headers: HeaderMap) -> Self {
        self.common_headers.extend(headers);
        self
    }

    /// Set parameters merged under every request that opts into common parameters.
    pub fn common_parameters(mut self, parameters: Value) -> Self {
        self.common_parameters = Some(parameters);
        self
    }

    /// Encoding used by descriptors that leave theirs on `Automatic`.
    pub fn default_encoding(mut self, encoding: ParameterEncoding) -> Self {
        self.default_encoding = encoding;
        self
    }

    /// Decoder used by descriptors that carry none. Default: JSON.
    pub fn decoder(mut self, decoder: impl Decoder) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Share an existing interceptor chain.
    ///
    /// Stages added with [`with_request_interceptor`](Self::with_request_interceptor)
    /// and [`with_response_interceptor`](Self::with_response_interceptor) are
    /// appended to it by `build`.
    pub fn interceptors(mut self, chain: Arc<InterceptorChain>) -> Self {
        self.interceptors = Some(chain);
        self
    }

    /// Append a request stage.
    ///
    /// Stages run in the order they are added.
    pub fn with_request_interceptor(mut self, stage: impl RequestInterceptor) -> Self {
        self.request_stages.push(Arc::new(stage));
        self
    }

    /// Append a response stage.
    pub fn with_response_interceptor(mut self, stage: impl ResponseInterceptor) -> Self {
        self.response_stages.push(Arc::new(stage));
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Fails when a common header is invalid, the retry policy is invalid,
    /// or no transport was given and TLS cannot be configured.
    pub fn build(self) -> Result<Client, ClientBuildError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.retry_policy
            .validate()
            .map_err(ClientBuildError::InvalidRetryPolicy)?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new()?),
        };

        let interceptors = self.interceptors.unwrap_or_default();
        for stage in self.request_stages {
            interceptors.add_request_stage(stage);
        }
        for stage in self.response_stages {
            interceptors.add_response_stage(stage);
        }

        Ok(Client::new(
            transport,
            self.registry
                .unwrap_or_else(|| DomainRegistry::global().clone()),
            interceptors,
            self.timeout,
            self.retry_policy,
            self.common_headers,
            self.common_parameters,
            self.default_encoding,
            self.decoder,
        ))
    }
}

/// Error type for client building failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    /// The default transport could not be created.
    #[error("failed to create transport: {0}")]
    Transport(#[from] TransportBuildError),

    /// The retry policy failed validation.
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(&'static str),

    /// A common header name or value is invalid.
    #[error("{0}")]
    InvalidHeader(String),
}
