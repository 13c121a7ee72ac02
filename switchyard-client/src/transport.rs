//! Transport layer.
//!
//! The client never speaks HTTP itself. It hands each [`WireRequest`] to a
//! [`Transport`] and gets back a [`RawResponse`] or a classified
//! [`TransportError`]. Any transport works; [`HyperTransport`] is the
//! default, built on hyper_util's pooled legacy client:
//!
//! - HTTP/1.1 and HTTP/2 with protocol negotiation via ALPN
//! - TLS with rustls (feature-gated)
//! - Connection pooling
//!
//! # Feature Flags
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates
//!
//! # Example
//!
//! ```ignore
//! use switchyard_client::transport::HyperTransport;
//! use std::time::Duration;
//!
//! let transport = HyperTransport::builder()
//!     .pool_idle_timeout(Duration::from_secs(60))
//!     .build()?;
//! ```

mod connector;
mod hyper;

use switchyard_core::TransportError;

use crate::interceptor::BoxFuture;
use crate::request::WireRequest;
use crate::response::RawResponse;

pub use connector::{
    build_https_connector, default_tls_config, has_tls_support, TransportBuildError,
};
pub use hyper::{HyperTransport, HyperTransportBuilder};

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;

/// Sends one request and returns the response.
///
/// Implementations own their connection handling and report failures as a
/// [`TransportError`] whose kind drives retry eligibility. The returned
/// future must not borrow the transport, so the client can race it against
/// timeouts and cancellation.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: WireRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>>;
}
