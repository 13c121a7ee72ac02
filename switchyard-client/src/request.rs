//! Request-side types.
//!
//! This module contains the two shapes a request takes on its way out:
//! - [`RequestDescriptor`]: The declarative, environment-independent description
//! - [`WireRequest`]: The concrete request the interceptors and the transport see

mod descriptor;

pub use descriptor::{ParameterEncoding, RequestDescriptor, RequestDescriptorBuilder};
pub(crate) use descriptor::Placement;

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::ClientError;

/// Identifier of one logical call, unique per [`Client`](crate::Client).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl RequestId {
    /// Get the numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fully built request, ready for the adapt phase and the transport.
///
/// Request interceptors receive this by value and return the version the next
/// stage sees. Cloning is cheap; the body is reference-counted.
#[derive(Clone, Debug)]
pub struct WireRequest {
    /// The call this request belongs to.
    pub id: RequestId,
    /// The logical target key the base URL was resolved from.
    pub target: String,
    /// The path as given in the descriptor.
    pub path: String,
    /// The HTTP method.
    pub method: Method,
    /// The absolute URL, including any query string.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Encoded body; empty when parameters went into the query string.
    pub body: Bytes,
    /// Effective timeout for each transport send.
    pub timeout: Duration,
}

impl WireRequest {
    /// Set a header, replacing any existing value.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Set a header from strings.
    ///
    /// Fails with `InvalidRequest` when the name or value is not a valid header.
    pub fn try_set_header(&mut self, name: &str, value: &str) -> Result<(), ClientError> {
        let name = HeaderName::try_from(name)
            .map_err(|_| ClientError::invalid_request(format!("invalid header name: {}", name)))?;
        let value = HeaderValue::try_from(value).map_err(|_| {
            ClientError::invalid_request(format!("invalid header value for {}", name))
        })?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Parse the URL.
    pub fn uri(&self) -> Result<http::Uri, ClientError> {
        self.url.parse().map_err(|e: http::uri::InvalidUri| ClientError::InvalidUrl {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) fn wire_request(method: Method, url: &str) -> WireRequest {
    WireRequest {
        id: RequestId(1),
        target: "api".into(),
        path: "/".into(),
        method,
        url: url.into(),
        headers: HeaderMap::new(),
        body: Bytes::new(),
        timeout: Duration::from_secs(60),
    }
}
