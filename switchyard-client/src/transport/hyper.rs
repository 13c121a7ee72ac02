//! Hyper-based HTTP transport.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use switchyard_core::{TransportError, TransportErrorKind};

use super::Transport;
use super::connector::{TransportBuildError, build_https_connector, default_tls_config};
use crate::interceptor::BoxFuture;
use crate::request::WireRequest;
use crate::response::RawResponse;

/// Type alias for the hyper client with HTTPS connector.
type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// HTTP transport using hyper_util's legacy client.
///
/// Cloning is cheap and shares the connection pool.
///
/// # Example
///
/// ```ignore
/// use switchyard_client::{Client, transport::HyperTransport};
///
/// let transport = HyperTransport::builder().http2_only(true).build()?;
///
/// let client = Client::builder()
///     .transport(transport)
///     .build()?;
/// ```
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    http2_only: bool,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("http2_only", &self.http2_only)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Create a new transport builder.
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    /// Create a new transport with default settings.
    pub fn new() -> Result<Self, TransportBuildError> {
        Self::builder().build()
    }

    /// Check if this transport is configured for HTTP/2 only.
    pub fn is_http2_only(&self) -> bool {
        self.http2_only
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: WireRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
        let client = self.client.clone();
        Box::pin(async move {
            let uri: http::Uri = request.url.parse().map_err(|e| {
                TransportError::other(format!("invalid URL {}: {}", request.url, e))
            })?;

            let mut http_request = http::Request::new(Full::new(request.body));
            *http_request.method_mut() = request.method;
            *http_request.uri_mut() = uri;
            *http_request.headers_mut() = request.headers;

            let response = client
                .request(http_request)
                .await
                .map_err(|e| classify("request failed", &e))?;

            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| classify("reading response body failed", &e))?
                .to_bytes();

            Ok(RawResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        })
    }
}

/// Map a hyper or hyper_util error to a transport error kind by walking its
/// source chain.
fn classify(context: &str, err: &(dyn StdError + 'static)) -> TransportError {
    let detail = format!("{}: {}", context, error_chain(err));
    let mut connect = false;

    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(kind) = classify_one(e) {
            return TransportError::new(kind, detail);
        }
        if let Some(e) = e.downcast_ref::<hyper_util::client::legacy::Error>() {
            connect |= e.is_connect();
        }
        current = e.source();
    }

    if connect {
        TransportError::new(TransportErrorKind::ConnectionRefused, detail)
    } else {
        TransportError::new(TransportErrorKind::Other, detail)
    }
}

fn classify_one(err: &(dyn StdError + 'static)) -> Option<TransportErrorKind> {
    if err.downcast_ref::<rustls::Error>().is_some() {
        return Some(TransportErrorKind::Tls);
    }
    if let Some(io) = err.downcast_ref::<io::Error>() {
        // TLS failures surface as io errors wrapping a rustls error.
        if io
            .get_ref()
            .is_some_and(|inner| inner.downcast_ref::<rustls::Error>().is_some())
        {
            return Some(TransportErrorKind::Tls);
        }
        return match io.kind() {
            io::ErrorKind::ConnectionRefused => Some(TransportErrorKind::ConnectionRefused),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Some(TransportErrorKind::ConnectionLost),
            io::ErrorKind::TimedOut => Some(TransportErrorKind::Timeout),
            io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkDown
            | io::ErrorKind::AddrNotAvailable => Some(TransportErrorKind::NoNetwork),
            _ => None,
        };
    }
    if let Some(e) = err.downcast_ref::<hyper::Error>() {
        if e.is_timeout() {
            return Some(TransportErrorKind::Timeout);
        }
        if e.is_incomplete_message() || e.is_closed() || e.is_canceled() {
            return Some(TransportErrorKind::ConnectionLost);
        }
    }
    // hyper_util's resolver failure has no public type, only its message.
    if err.to_string().starts_with("dns error") {
        return Some(TransportErrorKind::Dns);
    }
    None
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        message.push_str(": ");
        message.push_str(&e.to_string());
        current = e.source();
    }
    message
}

/// Builder for [`HyperTransport`].
///
/// # Example
///
/// ```ignore
/// use switchyard_client::transport::HyperTransportBuilder;
/// use std::time::Duration;
///
/// let transport = HyperTransportBuilder::new()
///     .pool_max_idle_per_host(8)
///     .pool_idle_timeout(Duration::from_secs(90))
///     .build()?;
/// ```
pub struct HyperTransportBuilder {
    tls_config: Option<ClientConfig>,
    /// Force HTTP/2 only (for h2c or when HTTP/2 is required).
    http2_only: bool,
    pool_idle_timeout: Option<Duration>,
    pool_max_idle_per_host: usize,
    h2_keep_alive_interval: Option<Duration>,
    h2_keep_alive_timeout: Option<Duration>,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperTransportBuilder {
    /// Create a new transport builder with default settings.
    pub fn new() -> Self {
        Self {
            tls_config: None,
            http2_only: false,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            h2_keep_alive_interval: None,
            h2_keep_alive_timeout: None,
        }
    }

    /// Set a custom TLS configuration.
    ///
    /// Use this for private root certificates or client certificates.
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Enable HTTP/2 only mode.
    pub fn http2_only(mut self, enabled: bool) -> Self {
        self.http2_only = enabled;
        self
    }

    /// Set the connection pool idle timeout.
    ///
    /// Default: 90 seconds.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of idle connections per host.
    ///
    /// Default: 32.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Set the HTTP/2 keep-alive interval.
    pub fn h2_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.h2_keep_alive_interval = Some(interval);
        self
    }

    /// Set the HTTP/2 keep-alive timeout.
    ///
    /// Only effective if `h2_keep_alive_interval` is also set.
    pub fn h2_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.h2_keep_alive_timeout = Some(timeout);
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<HyperTransport, TransportBuildError> {
        let tls_config = match self.tls_config {
            Some(config) => config,
            None => default_tls_config()?,
        };
        let https_connector = build_https_connector(tls_config);

        let mut builder = Client::builder(TokioExecutor::new());

        // Required for pool_idle_timeout to work
        builder.pool_timer(TokioTimer::new());

        if let Some(timeout) = self.pool_idle_timeout {
            builder.pool_idle_timeout(timeout);
        }
        builder.pool_max_idle_per_host(self.pool_max_idle_per_host);

        if self.http2_only {
            builder.http2_only(true);
        }
        if let Some(interval) = self.h2_keep_alive_interval {
            builder.http2_keep_alive_interval(interval);
        }
        if let Some(timeout) = self.h2_keep_alive_timeout {
            builder.http2_keep_alive_timeout(timeout);
        }

        Ok(HyperTransport {
            client: builder.build(https_connector),
            http2_only: self.http2_only,
        })
    }
}

impl std::fmt::Debug for HyperTransportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransportBuilder")
            .field("tls_config", &self.tls_config.is_some())
            .field("http2_only", &self.http2_only)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("h2_keep_alive_interval", &self.h2_keep_alive_interval)
            .field("h2_keep_alive_timeout", &self.h2_keep_alive_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = HyperTransportBuilder::new();
        assert!(!builder.http2_only);
        assert_eq!(builder.pool_max_idle_per_host, 32);
        assert_eq!(builder.pool_idle_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_classify_io_errors() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            classify("connect", &refused).kind(),
            TransportErrorKind::ConnectionRefused
        );

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = classify("read", &reset);
        assert_eq!(err.kind(), TransportErrorKind::ConnectionLost);
        assert!(err.detail().contains("reset by peer"));

        let tls = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::General("bad cert".into()),
        );
        assert_eq!(classify("handshake", &tls).kind(), TransportErrorKind::Tls);

        let weird = io::Error::new(io::ErrorKind::Other, "weird");
        assert_eq!(classify("send", &weird).kind(), TransportErrorKind::Other);
    }

    #[cfg(all(
        any(feature = "tls-ring", feature = "tls-aws-lc"),
        any(feature = "tls-native-roots", feature = "tls-webpki-roots")
    ))]
    #[tokio::test]
    async fn test_connection_refused_is_classified() {
        // Bind then drop a listener to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HyperTransport::new().unwrap();
        let request = crate::request::wire_request(http::Method::GET, &format!("http://{}/", addr));
        let err = transport.send(request).await.unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::ConnectionRefused);
        assert!(err.kind().is_connectivity());
    }
}
