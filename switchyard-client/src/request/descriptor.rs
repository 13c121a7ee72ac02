//! Declarative request descriptors.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::Value;
use switchyard_core::{Decoder, Encoder, FormEncoder, JsonEncoder};

use crate::ClientError;
use crate::config::RetryPolicy;

/// How merged parameters are put on the wire.
#[derive(Clone, Default)]
pub enum ParameterEncoding {
    /// Query string for `GET`, `HEAD` and `DELETE`; JSON body otherwise.
    #[default]
    Automatic,
    /// JSON body.
    Json,
    /// URL-encoded form body.
    Form,
    /// Query string, whatever the method.
    Query,
    /// Body produced by a custom encoder.
    Custom(Arc<dyn Encoder>),
}

/// Where the encoded parameters end up.
pub(crate) enum Placement {
    Query,
    Body(Arc<dyn Encoder>),
}

impl ParameterEncoding {
    pub(crate) fn placement(&self, method: &Method) -> Placement {
        match self {
            ParameterEncoding::Automatic => {
                if *method == Method::GET || *method == Method::HEAD || *method == Method::DELETE {
                    Placement::Query
                } else {
                    Placement::Body(Arc::new(JsonEncoder))
                }
            }
            ParameterEncoding::Json => Placement::Body(Arc::new(JsonEncoder)),
            ParameterEncoding::Form => Placement::Body(Arc::new(FormEncoder)),
            ParameterEncoding::Query => Placement::Query,
            ParameterEncoding::Custom(encoder) => Placement::Body(encoder.clone()),
        }
    }
}

impl std::fmt::Debug for ParameterEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterEncoding::Automatic => f.write_str("Automatic"),
            ParameterEncoding::Json => f.write_str("Json"),
            ParameterEncoding::Form => f.write_str("Form"),
            ParameterEncoding::Query => f.write_str("Query"),
            ParameterEncoding::Custom(encoder) => f
                .debug_tuple("Custom")
                .field(&encoder.content_type())
                .finish(),
        }
    }
}

/// An immutable, environment-independent description of one request.
///
/// Descriptors name a logical target key instead of a base URL; the client
/// resolves the key against its [`DomainRegistry`](crate::DomainRegistry)
/// each time the request is built.
///
/// # Example
///
/// ```
/// use http::Method;
/// use serde_json::json;
/// use switchyard_client::RequestDescriptor;
///
/// let login = RequestDescriptor::builder("api", "/login")
///     .method(Method::POST)
///     .parameters(json!({"username": "u", "password": "p"}))
///     .build()
///     .unwrap();
///
/// assert_eq!(login.path(), "/login");
/// ```
#[derive(Clone)]
pub struct RequestDescriptor {
    target: String,
    path: String,
    method: Method,
    headers: HeaderMap,
    parameters: Option<Value>,
    encoding: ParameterEncoding,
    timeout: Option<Duration>,
    common_headers: bool,
    common_parameters: bool,
    retry_policy: Option<RetryPolicy>,
    decoder: Option<Arc<dyn Decoder>>,
}

impl RequestDescriptor {
    /// Start building a descriptor for `path` on the target `target`.
    pub fn builder(target: impl Into<String>, path: impl Into<String>) -> RequestDescriptorBuilder {
        RequestDescriptorBuilder::new(target.into(), path.into())
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn parameters(&self) -> Option<&Value> {
        self.parameters.as_ref()
    }

    pub fn encoding(&self) -> &ParameterEncoding {
        &self.encoding
    }

    /// Timeout override; `None` means the client default applies.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the client's common headers are added.
    pub fn uses_common_headers(&self) -> bool {
        self.common_headers
    }

    /// Whether the client's common parameters are merged in.
    pub fn uses_common_parameters(&self) -> bool {
        self.common_parameters
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    pub fn decoder(&self) -> Option<&Arc<dyn Decoder>> {
        self.decoder.as_ref()
    }
}

impl std::fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("target", &self.target)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("parameters", &self.parameters)
            .field("encoding", &self.encoding)
            .field("timeout", &self.timeout)
            .field("common_headers", &self.common_headers)
            .field("common_parameters", &self.common_parameters)
            .field("retry_policy", &self.retry_policy)
            .field("decoder", &self.decoder.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Builder for [`RequestDescriptor`].
///
/// Invalid headers and unserializable parameters are remembered and reported
/// by [`build`](Self::build), so the builder chain never needs `?`.
pub struct RequestDescriptorBuilder {
    descriptor: RequestDescriptor,
    error: Option<ClientError>,
}

impl RequestDescriptorBuilder {
    fn new(target: String, path: String) -> Self {
        Self {
            descriptor: RequestDescriptor {
                target,
                path,
                method: Method::GET,
                headers: HeaderMap::new(),
                parameters: None,
                encoding: ParameterEncoding::Automatic,
                timeout: None,
                common_headers: true,
                common_parameters: true,
                retry_policy: None,
                decoder: None,
            },
            error: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.descriptor.method = method;
        self
    }

    /// Add a request-specific header.
    ///
    /// Request headers are applied after the client's common headers and
    /// replace them on conflict.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        <K as TryInto<HeaderName>>::Error: std::fmt::Display,
        V: TryInto<HeaderValue>,
        <V as TryInto<HeaderValue>>::Error: std::fmt::Display,
    {
        if self.error.is_some() {
            return self;
        }
        let name = match key.try_into() {
            Ok(name) => name,
            Err(e) => {
                self.error = Some(ClientError::invalid_request(format!(
                    "invalid header name: {}",
                    e
                )));
                return self;
            }
        };
        match value.try_into() {
            Ok(value) => {
                self.descriptor.headers.insert(name, value);
            }
            Err(e) => {
                self.error = Some(ClientError::invalid_request(format!(
                    "invalid header value for {}: {}",
                    name, e
                )));
            }
        }
        self
    }

    /// Set the request parameters.
    pub fn parameters(mut self, parameters: Value) -> Self {
        self.descriptor.parameters = Some(parameters);
        self
    }

    /// Set the request parameters from any serializable value.
    pub fn json<T: Serialize + ?Sized>(mut self, parameters: &T) -> Self {
        match serde_json::to_value(parameters) {
            Ok(value) => self.descriptor.parameters = Some(value),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(ClientError::Encode(format!(
                        "parameters are not serializable: {}",
                        e
                    )));
                }
            }
        }
        self
    }

    pub fn encoding(mut self, encoding: ParameterEncoding) -> Self {
        self.descriptor.encoding = encoding;
        self
    }

    /// Override the client's default timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.timeout = Some(timeout);
        self
    }

    /// Include the client's common headers (default: `true`).
    pub fn common_headers(mut self, enabled: bool) -> Self {
        self.descriptor.common_headers = enabled;
        self
    }

    /// Merge in the client's common parameters (default: `true`).
    pub fn common_parameters(mut self, enabled: bool) -> Self {
        self.descriptor.common_parameters = enabled;
        self
    }

    /// Override the client's retry policy for this request.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.descriptor.retry_policy = Some(policy);
        self
    }

    /// Override the client's response decoder for this request.
    pub fn decoder(mut self, decoder: impl Decoder) -> Self {
        self.descriptor.decoder = Some(Arc::new(decoder));
        self
    }

    /// Build the descriptor.
    ///
    /// Returns the first header or serialization error recorded by the chain.
    pub fn build(self) -> Result<RequestDescriptor, ClientError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.descriptor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchyard_core::ErrorKind;

    #[test]
    fn test_defaults() {
        let desc = RequestDescriptor::builder("api", "/users").build().unwrap();
        assert_eq!(desc.target(), "api");
        assert_eq!(desc.method(), Method::GET);
        assert!(desc.headers().is_empty());
        assert!(desc.parameters().is_none());
        assert!(matches!(desc.encoding(), ParameterEncoding::Automatic));
        assert!(desc.timeout().is_none());
        assert!(desc.uses_common_headers());
        assert!(desc.uses_common_parameters());
        assert!(desc.retry_policy().is_none());
        assert!(desc.decoder().is_none());
    }

    #[test]
    fn test_json_parameters() {
        #[derive(Serialize)]
        struct Login<'a> {
            username: &'a str,
            password: &'a str,
        }

        let desc = RequestDescriptor::builder("api", "/login")
            .method(Method::POST)
            .json(&Login {
                username: "u",
                password: "p",
            })
            .build()
            .unwrap();
        assert_eq!(
            desc.parameters(),
            Some(&json!({"username": "u", "password": "p"}))
        );
    }

    #[test]
    fn test_invalid_header_is_reported_at_build() {
        let err = RequestDescriptor::builder("api", "/")
            .header("bad header", "v")
            .header("x-ok", "1")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_unserializable_parameters() {
        let mut map = std::collections::HashMap::new();
        map.insert((1, 2), "tuple keys are not JSON");
        let err = RequestDescriptor::builder("api", "/")
            .json(&map)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncodeFailure);
    }

    #[test]
    fn test_automatic_placement() {
        assert!(matches!(
            ParameterEncoding::Automatic.placement(&Method::GET),
            Placement::Query
        ));
        assert!(matches!(
            ParameterEncoding::Automatic.placement(&Method::DELETE),
            Placement::Query
        ));
        match ParameterEncoding::Automatic.placement(&Method::POST) {
            Placement::Body(encoder) => assert_eq!(encoder.content_type(), "application/json"),
            Placement::Query => panic!("POST should carry a body"),
        }
        match ParameterEncoding::Form.placement(&Method::GET) {
            Placement::Body(encoder) => {
                assert_eq!(encoder.content_type(), "application/x-www-form-urlencoded")
            }
            Placement::Query => panic!("form encoding always uses the body"),
        }
    }
}
