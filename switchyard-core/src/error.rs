//! Error kinds and transport errors.
//!
//! This module provides the error vocabulary shared across the pipeline:
//! - [`ErrorKind`]: The stable, matchable kind of every client error
//! - [`TransportError`]: What a transport reports when a send fails
//! - [`TransportErrorKind`]: The failure classes a transport distinguishes

use std::str::FromStr;

use serde::{Serialize, Serializer};

/// Kinds of errors a call can terminate with.
///
/// Every concrete error the client surfaces maps onto exactly one kind, so
/// callers can branch on the kind without matching on error payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The logical target key did not resolve to a base URL, or the joined URL is invalid.
    InvalidTarget,
    /// The request could not be assembled (bad header name or value).
    InvalidRequest,
    /// The transport did not answer within the effective timeout.
    Timeout,
    /// DNS, connect, TLS or connection-lost failures.
    ConnectivityFailure,
    /// The server answered with a non-success status.
    HttpStatus,
    /// The response body could not be decoded into the expected type.
    DecodeFailure,
    /// The request parameters could not be encoded.
    EncodeFailure,
    /// The server reported that the credentials have expired.
    AuthExpired,
    /// A refresh was requested but no refresh handler was ever configured.
    RefreshUnconfigured,
    /// The refresh circuit breaker is open.
    RefreshExhausted,
    /// The underlying refresh operation failed.
    RefreshFailed,
    /// The refresh coordinator was reset while the caller was waiting.
    RefreshCancelled,
    /// A 2xx response carried a non-success business status code.
    Business,
    /// A retry was requested on a call that had already used its retry pass.
    RetryExhausted,
    /// The call was cancelled by its caller.
    Cancelled,
}

impl ErrorKind {
    /// Get the string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTarget => "invalid_target",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectivityFailure => "connectivity_failure",
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::DecodeFailure => "decode_failure",
            ErrorKind::EncodeFailure => "encode_failure",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::RefreshUnconfigured => "refresh_unconfigured",
            ErrorKind::RefreshExhausted => "refresh_exhausted",
            ErrorKind::RefreshFailed => "refresh_failed",
            ErrorKind::RefreshCancelled => "refresh_cancelled",
            ErrorKind::Business => "business",
            ErrorKind::RetryExhausted => "retry_exhausted",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Returns whether this kind belongs to the token-refresh flow.
    ///
    /// ```
    /// use switchyard_core::ErrorKind;
    ///
    /// assert!(ErrorKind::RefreshExhausted.is_refresh());
    /// assert!(!ErrorKind::AuthExpired.is_refresh());
    /// ```
    pub fn is_refresh(&self) -> bool {
        matches!(
            self,
            ErrorKind::RefreshUnconfigured
                | ErrorKind::RefreshExhausted
                | ErrorKind::RefreshFailed
                | ErrorKind::RefreshCancelled
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Error returned when parsing an [`ErrorKind`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseErrorKindError(());

impl std::fmt::Display for ParseErrorKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown error kind")
    }
}

impl std::error::Error for ParseErrorKindError {}

impl FromStr for ErrorKind {
    type Err = ParseErrorKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid_target" => Ok(ErrorKind::InvalidTarget),
            "invalid_request" => Ok(ErrorKind::InvalidRequest),
            "timeout" => Ok(ErrorKind::Timeout),
            "connectivity_failure" => Ok(ErrorKind::ConnectivityFailure),
            "http_status" => Ok(ErrorKind::HttpStatus),
            "decode_failure" => Ok(ErrorKind::DecodeFailure),
            "encode_failure" => Ok(ErrorKind::EncodeFailure),
            "auth_expired" => Ok(ErrorKind::AuthExpired),
            "refresh_unconfigured" => Ok(ErrorKind::RefreshUnconfigured),
            "refresh_exhausted" => Ok(ErrorKind::RefreshExhausted),
            "refresh_failed" => Ok(ErrorKind::RefreshFailed),
            "refresh_cancelled" | "refresh_canceled" => Ok(ErrorKind::RefreshCancelled),
            "business" => Ok(ErrorKind::Business),
            "retry_exhausted" => Ok(ErrorKind::RetryExhausted),
            "cancelled" | "canceled" => Ok(ErrorKind::Cancelled),
            _ => Err(ParseErrorKindError(())),
        }
    }
}

/// Failure classes a [`TransportError`] distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    /// The transport gave up waiting for the server.
    Timeout,
    /// The remote host actively refused the connection.
    ConnectionRefused,
    /// Name resolution failed.
    Dns,
    /// An established connection was closed or reset mid-exchange.
    ConnectionLost,
    /// No network route is available.
    NoNetwork,
    /// The TLS handshake failed.
    Tls,
    /// The send was cancelled before it completed.
    Cancelled,
    /// Anything the transport cannot classify.
    Other,
}

impl TransportErrorKind {
    /// Get the string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ConnectionRefused => "connection_refused",
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::ConnectionLost => "connection_lost",
            TransportErrorKind::NoNetwork => "no_network",
            TransportErrorKind::Tls => "tls",
            TransportErrorKind::Cancelled => "cancelled",
            TransportErrorKind::Other => "other",
        }
    }

    /// Returns whether this kind is a connectivity failure.
    ///
    /// Connectivity failures are refused connections, DNS failures, lost
    /// connections, missing network and TLS handshake failures.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TransportErrorKind::ConnectionRefused
                | TransportErrorKind::Dns
                | TransportErrorKind::ConnectionLost
                | TransportErrorKind::NoNetwork
                | TransportErrorKind::Tls
        )
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a transport when a send fails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    kind: TransportErrorKind,
    detail: String,
}

impl TransportError {
    /// Create a new transport error.
    pub fn new<S: Into<String>>(kind: TransportErrorKind, detail: S) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout<S: Into<String>>(detail: S) -> Self {
        Self::new(TransportErrorKind::Timeout, detail)
    }

    /// Create a connection-lost error.
    pub fn connection_lost<S: Into<String>>(detail: S) -> Self {
        Self::new(TransportErrorKind::ConnectionLost, detail)
    }

    /// Create an unclassified error.
    pub fn other<S: Into<String>>(detail: S) -> Self {
        Self::new(TransportErrorKind::Other, detail)
    }

    /// Get the failure class.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Get the human-readable detail.
    pub fn detail(&self) -> &str {
        &self.detail
    }
}
