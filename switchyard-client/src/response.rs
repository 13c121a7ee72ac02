//! Response types.
//!
//! This module provides [`RawResponse`], what a transport hands back, and
//! [`DecodedResponse`], what a successful call returns to its caller.

use std::ops::Deref;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

/// A response as received from the transport, before any decoding.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    /// Create a response with no headers.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Returns whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Timing and attempt counts for one completed call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Metrics {
    /// Transport sends made in the final pass.
    pub attempts: u32,
    /// Build-dispatch-inspect passes: 1, or 2 after a response-triggered retry.
    pub passes: u32,
    /// Wall-clock time the call started.
    pub started_at: SystemTime,
    /// Time from start to the decoded result.
    pub elapsed: Duration,
}

/// Response wrapper for a successful call.
///
/// Contains the decoded value together with the status, headers and call
/// metrics of the response it came from.
///
/// # Example
///
/// ```ignore
/// let response = client.execute::<Profile>(&descriptor).await?;
///
/// // Access the value directly via Deref
/// println!("Name: {}", response.name);
///
/// if let Some(value) = response.headers().get("x-request-id") {
///     println!("Request id: {:?}", value);
/// }
///
/// let profile = response.into_inner();
/// ```
#[derive(Clone, Debug)]
pub struct DecodedResponse<T> {
    data: T,
    status: StatusCode,
    headers: HeaderMap,
    metrics: Metrics,
}

impl<T> DecodedResponse<T> {
    pub fn new(data: T, status: StatusCode, headers: HeaderMap, metrics: Metrics) -> Self {
        Self {
            data,
            status,
            headers,
            metrics,
        }
    }

    /// Extract the decoded value, discarding everything else.
    pub fn into_inner(self) -> T {
        self.data
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Transform the decoded value, preserving status, headers and metrics.
    pub fn map<U, F>(self, f: F) -> DecodedResponse<U>
    where
        F: FnOnce(T) -> U,
    {
        DecodedResponse {
            data: f(self.data),
            status: self.status,
            headers: self.headers,
            metrics: self.metrics,
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.data
    }

    /// Decompose into the value and the response headers.
    pub fn into_parts(self) -> (T, HeaderMap) {
        (self.data, self.headers)
    }
}

impl<T> Deref for DecodedResponse<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<T> AsRef<T> for DecodedResponse<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}
