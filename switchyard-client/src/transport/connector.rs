//! TLS connector setup for the hyper transport.
//!
//! # Feature Flags
//!
//! TLS support requires both a crypto provider and root certificates:
//!
//! - **Crypto providers** (choose one):
//!   - `tls-ring` - Use ring crypto (default with `tls` feature)
//!   - `tls-aws-lc` - Use AWS LC crypto
//!
//! - **Root certificates** (choose one):
//!   - `tls-native-roots` - Use system root certificates (default with `tls` feature)
//!   - `tls-webpki-roots` - Use bundled Mozilla root certificates
//!
//! Without a feature-gated provider, a provider installed with
//! `CryptoProvider::install_default()` is used.

use std::sync::Arc;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::ClientConfig;

/// Error building the transport's TLS configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportBuildError {
    /// No crypto provider is enabled or installed.
    #[error(
        "HTTPS requires a crypto provider: enable `tls-ring` or `tls-aws-lc`, \
         or install one with `CryptoProvider::install_default()`"
    )]
    NoCryptoProvider,

    /// No root certificate source is enabled.
    #[error("HTTPS requires root certificates: enable `tls-native-roots` or `tls-webpki-roots`")]
    NoRootCertificates,

    /// rustls rejected the configuration.
    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Check if TLS features are properly configured.
///
/// Returns true if both a crypto provider AND root certificates are available.
#[inline]
pub const fn has_tls_support() -> bool {
    cfg!(any(feature = "tls-ring", feature = "tls-aws-lc"))
        && cfg!(any(
            feature = "tls-native-roots",
            feature = "tls-webpki-roots"
        ))
}

fn crypto_provider() -> Result<Arc<rustls::crypto::CryptoProvider>, TransportBuildError> {
    #[cfg(feature = "tls-ring")]
    return Ok(Arc::new(rustls::crypto::ring::default_provider()));

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    return Ok(Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .ok_or(TransportBuildError::NoCryptoProvider)
}

/// Build the root certificate store from enabled features.
///
/// Native roots win when both sources are enabled.
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn root_store() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();

    #[cfg(feature = "tls-native-roots")]
    {
        let native_certs = rustls_native_certs::load_native_certs();
        if !native_certs.errors.is_empty() {
            // Some certs may still have loaded
            tracing::debug!(errors = ?native_certs.errors, "errors loading native certs");
        }
        let (added, ignored) = roots.add_parsable_certificates(native_certs.certs);
        tracing::debug!(added, ignored, "loaded native root certificates");
    }

    #[cfg(all(feature = "tls-webpki-roots", not(feature = "tls-native-roots")))]
    {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    roots
}

/// Build the default TLS configuration from enabled features.
pub fn default_tls_config() -> Result<ClientConfig, TransportBuildError> {
    let provider = crypto_provider()?;
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportBuildError::Tls(e.to_string()))?;

    #[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
    return Ok(builder
        .with_root_certificates(root_store())
        .with_no_client_auth());

    #[cfg(not(any(feature = "tls-native-roots", feature = "tls-webpki-roots")))]
    {
        let _ = builder;
        Err(TransportBuildError::NoRootCertificates)
    }
}

/// Build a connector that speaks both `http://` and `https://`.
pub fn build_https_connector(config: ClientConfig) -> HttpsConnector<HttpConnector> {
    HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_or_http()
        .enable_all_versions()
        .build()
}
