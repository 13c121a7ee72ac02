//! Business status codes carried inside successful responses.

use std::time::Duration;

use serde_json::Value;

use super::{BoxFuture, InspectContext, InterceptOutcome, ResponseInterceptor};
use crate::ClientError;
use crate::refresh::TokenRefreshCoordinator;

/// Fails 2xx responses whose JSON body reports a non-success business code.
///
/// Many APIs answer `200 OK` with `{"code": 1003, "message": "..."}`. This
/// stage reads the code field and fails the call with
/// [`ClientError::Business`] unless the code is in the success set. Bodies
/// that are not JSON objects, or that lack the field, pass through.
///
/// Codes registered with [`expiry_codes`](Self::expiry_codes) are treated as
/// expired credentials instead: the stage asks for a retry and refreshes
/// through the coordinator before the request is rebuilt.
///
/// # Example
///
/// ```
/// use switchyard_client::{BusinessCodeInterceptor, TokenRefreshCoordinator};
///
/// let stage = BusinessCodeInterceptor::new()
///     .code_field("status")
///     .success_codes([0, 200])
///     .expiry_codes([4011], TokenRefreshCoordinator::new());
/// ```
#[derive(Clone, Debug)]
pub struct BusinessCodeInterceptor {
    code_field: String,
    message_field: String,
    success: Vec<i64>,
    expiry: Vec<i64>,
    coordinator: Option<TokenRefreshCoordinator>,
    delay: Duration,
}

impl Default for BusinessCodeInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl BusinessCodeInterceptor {
    /// Read `code` and `message`, with `0` as the only success code.
    pub fn new() -> Self {
        Self {
            code_field: "code".to_string(),
            message_field: "message".to_string(),
            success: vec![0],
            expiry: Vec::new(),
            coordinator: None,
            delay: Duration::ZERO,
        }
    }

    pub fn code_field(mut self, field: impl Into<String>) -> Self {
        self.code_field = field.into();
        self
    }

    pub fn message_field(mut self, field: impl Into<String>) -> Self {
        self.message_field = field.into();
        self
    }

    pub fn success_codes(mut self, codes: impl IntoIterator<Item = i64>) -> Self {
        self.success = codes.into_iter().collect();
        self
    }

    /// Codes that mean the credentials expired, refreshed through `coordinator`.
    pub fn expiry_codes(
        mut self,
        codes: impl IntoIterator<Item = i64>,
        coordinator: TokenRefreshCoordinator,
    ) -> Self {
        self.expiry = codes.into_iter().collect();
        self.coordinator = Some(coordinator);
        self
    }

    /// Wait this long before refreshing on an expiry code. Default: none.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The business code and message of a 2xx JSON body, if present.
    fn read_code(&self, ctx: &InspectContext<'_>) -> Option<(i64, String)> {
        let response = ctx.response().filter(|resp| resp.is_success())?;
        let body: Value = serde_json::from_slice(&response.body).ok()?;
        let code = match body.get(&self.code_field)? {
            Value::Number(n) => n.as_i64()?,
            // Some APIs send numeric codes as strings.
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        let message = match body.get(&self.message_field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Some((code, message))
    }
}

impl ResponseInterceptor for BusinessCodeInterceptor {
    fn inspect<'a>(&'a self, ctx: &'a InspectContext<'a>) -> BoxFuture<'a, InterceptOutcome> {
        let outcome = match self.read_code(ctx) {
            Some((code, _)) if self.success.contains(&code) => InterceptOutcome::Proceed,
            Some((code, _)) if self.expiry.contains(&code) => {
                tracing::debug!(code, url = %ctx.request.url, "business code reports expired credentials");
                InterceptOutcome::RetryAfter(self.delay)
            }
            Some((code, message)) => InterceptOutcome::Fail(ClientError::business(code, message)),
            None => InterceptOutcome::Proceed,
        };
        Box::pin(async move { outcome })
    }

    fn recover<'a>(
        &'a self,
        _ctx: &'a InspectContext<'a>,
    ) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            match &self.coordinator {
                Some(coordinator) => Ok(coordinator.handle_expired().await?),
                None => Ok(()),
            }
        })
    }

    fn exhausted(&self, _ctx: &InspectContext<'_>) -> ClientError {
        ClientError::AuthExpired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{WireRequest, wire_request};
    use crate::response::RawResponse;
    use http::{Method, StatusCode};
    use switchyard_core::ErrorKind;

    async fn inspect(stage: &BusinessCodeInterceptor, status: StatusCode, body: &'static str) -> InterceptOutcome {
        let request: WireRequest = wire_request(Method::GET, "https://x.test/");
        let outcome = Ok(RawResponse::new(status, body));
        let ctx = InspectContext {
            request: &request,
            outcome: &outcome,
            attempts: 1,
            is_retry: false,
        };
        stage.inspect(&ctx).await
    }

    #[tokio::test]
    async fn test_success_code_proceeds() {
        let stage = BusinessCodeInterceptor::new();
        let outcome = inspect(&stage, StatusCode::OK, r#"{"code":0,"data":{}}"#).await;
        assert!(matches!(outcome, InterceptOutcome::Proceed));
    }

    #[tokio::test]
    async fn test_failing_code_fails_with_message() {
        let stage = BusinessCodeInterceptor::new();
        let outcome = inspect(&stage, StatusCode::OK, r#"{"code":1003,"message":"quota exceeded"}"#).await;
        match outcome {
            InterceptOutcome::Fail(err) => {
                assert_eq!(err.kind(), ErrorKind::Business);
                assert!(matches!(
                    err,
                    ClientError::Business { code: 1003, ref message } if message == "quota exceeded"
                ));
            }
            other => panic!("expected Fail, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_and_non_2xx_pass_through() {
        let stage = BusinessCodeInterceptor::new();
        assert!(matches!(
            inspect(&stage, StatusCode::OK, "plain text").await,
            InterceptOutcome::Proceed
        ));
        assert!(matches!(
            inspect(&stage, StatusCode::OK, r#"{"data":1}"#).await,
            InterceptOutcome::Proceed
        ));
        assert!(matches!(
            inspect(&stage, StatusCode::BAD_REQUEST, r#"{"code":7}"#).await,
            InterceptOutcome::Proceed
        ));
    }

    #[tokio::test]
    async fn test_custom_fields_and_string_codes() {
        let stage = BusinessCodeInterceptor::new()
            .code_field("status")
            .message_field("msg")
            .success_codes([200]);
        assert!(matches!(
            inspect(&stage, StatusCode::OK, r#"{"status":"200"}"#).await,
            InterceptOutcome::Proceed
        ));
        assert!(matches!(
            inspect(&stage, StatusCode::OK, r#"{"status":500,"msg":"boom"}"#).await,
            InterceptOutcome::Fail(ClientError::Business { code: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_expiry_code_retries() {
        let stage = BusinessCodeInterceptor::new()
            .expiry_codes([4011], TokenRefreshCoordinator::new())
            .delay(Duration::from_millis(10));
        assert!(matches!(
            inspect(&stage, StatusCode::OK, r#"{"code":4011}"#).await,
            InterceptOutcome::RetryAfter(d) if d == Duration::from_millis(10)
        ));
    }
}
