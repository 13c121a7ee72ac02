//! Client-side error types.
//!
//! This module provides [`ClientError`], the error every call terminates with,
//! and [`RefreshError`], the outcome the refresh coordinator fans out to its
//! waiters.

use http::StatusCode;
use switchyard_core::{CodecError, ErrorKind, TransportError, TransportErrorKind};

/// Error produced by a token refresh.
///
/// Every waiter of one refresh receives an identical copy.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// A refresh was requested but no handler was ever configured.
    #[error("no refresh handler configured")]
    Unconfigured,

    /// The circuit breaker is open after too many consecutive failures.
    #[error("refresh circuit open after {failures} consecutive failures")]
    Exhausted { failures: u32 },

    /// The refresh handler reported a failure.
    #[error("refresh failed: {message}")]
    Failed { message: String },

    /// The coordinator was reset while the caller was waiting.
    #[error("refresh cancelled by reset")]
    Cancelled,
}

impl RefreshError {
    /// Create a handler failure.
    pub fn failed<S: Into<String>>(message: S) -> Self {
        RefreshError::Failed {
            message: message.into(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RefreshError::Unconfigured => ErrorKind::RefreshUnconfigured,
            RefreshError::Exhausted { .. } => ErrorKind::RefreshExhausted,
            RefreshError::Failed { .. } => ErrorKind::RefreshFailed,
            RefreshError::Cancelled => ErrorKind::RefreshCancelled,
        }
    }
}

/// Error variants a call can terminate with.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The target key has no base URL for the active environment.
    #[error("no base URL registered for target {key:?}")]
    InvalidTarget { key: String },

    /// The joined URL does not parse.
    #[error("invalid URL {url:?}: {message}")]
    InvalidUrl { url: String, message: String },

    /// The request could not be assembled.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No response arrived within the effective timeout.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The transport failed to deliver the request.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// The server answered with a non-success status.
    #[error("HTTP status {status}")]
    HttpStatus { status: StatusCode, body: bytes::Bytes },

    /// Parameters could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The server reported that the credentials have expired.
    #[error("authentication expired")]
    AuthExpired,

    /// The token refresh failed.
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// A 2xx response carried a failing business code.
    #[error("business error {code}: {message}")]
    Business { code: i64, message: String },

    /// A retry was requested on a call that had already been retried.
    #[error("retry exhausted for {url}")]
    RetryExhausted {
        url: String,
        status: Option<StatusCode>,
    },

    /// The caller cancelled the call.
    #[error("call cancelled")]
    Cancelled,
}

impl ClientError {
    /// Create an invalid target error.
    pub fn invalid_target<S: Into<String>>(key: S) -> Self {
        ClientError::InvalidTarget { key: key.into() }
    }

    /// Create an invalid request error.
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        ClientError::InvalidRequest(message.into())
    }

    /// Create a business error.
    pub fn business<S: Into<String>>(code: i64, message: S) -> Self {
        ClientError::Business {
            code,
            message: message.into(),
        }
    }

    /// Get the error kind.
    ///
    /// Transport failures split into `Timeout`, `Cancelled` and
    /// `ConnectivityFailure` by their transport kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::InvalidTarget { .. } | ClientError::InvalidUrl { .. } => {
                ErrorKind::InvalidTarget
            }
            ClientError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::Transport(err) => match err.kind() {
                TransportErrorKind::Timeout => ErrorKind::Timeout,
                TransportErrorKind::Cancelled => ErrorKind::Cancelled,
                _ => ErrorKind::ConnectivityFailure,
            },
            ClientError::HttpStatus { .. } => ErrorKind::HttpStatus,
            ClientError::Encode(_) => ErrorKind::EncodeFailure,
            ClientError::Decode(_) => ErrorKind::DecodeFailure,
            ClientError::AuthExpired => ErrorKind::AuthExpired,
            ClientError::Refresh(err) => err.kind(),
            ClientError::Business { .. } => ErrorKind::Business,
            ClientError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            ClientError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Get the HTTP status, for errors that carry one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::HttpStatus { status, .. } => Some(*status),
            ClientError::RetryExhausted { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Returns whether this error is a connectivity failure.
    ///
    /// ```
    /// use switchyard_client::ClientError;
    /// use switchyard_core::{TransportError, TransportErrorKind};
    ///
    /// let err = ClientError::Transport(TransportError::new(TransportErrorKind::Dns, "nxdomain"));
    /// assert!(err.is_connectivity());
    /// assert!(!ClientError::AuthExpired.is_connectivity());
    /// ```
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ClientError::Transport(err) if err.kind().is_connectivity())
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::Transport(err)
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Encode(msg) => ClientError::Encode(msg),
            CodecError::Decode(msg) => ClientError::Decode(msg),
        }
    }
}
