use super::{BoxFuture, InspectContext, InterceptOutcome, RequestInterceptor, ResponseInterceptor};
use crate::ClientError;
use crate::request::WireRequest;

/// Logs every outgoing request and every transport outcome.
///
/// Register the same value in both phases. It never changes the request and
/// always proceeds.
///
/// ```ignore
/// let client = Client::builder()
///     .with_request_interceptor(LoggingInterceptor)
///     .with_response_interceptor(LoggingInterceptor)
///     .build()?;
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingInterceptor;

impl RequestInterceptor for LoggingInterceptor {
    fn adapt(&self, request: WireRequest) -> BoxFuture<'_, Result<WireRequest, ClientError>> {
        tracing::debug!(
            request_id = %request.id,
            method = %request.method,
            url = %request.url,
            headers = request.headers.len(),
            body_bytes = request.body.len(),
            "sending request"
        );
        Box::pin(async move { Ok(request) })
    }
}

impl ResponseInterceptor for LoggingInterceptor {
    fn inspect<'a>(&'a self, ctx: &'a InspectContext<'a>) -> BoxFuture<'a, InterceptOutcome> {
        match ctx.outcome {
            Ok(response) => tracing::debug!(
                request_id = %ctx.request.id,
                status = response.status.as_u16(),
                body_bytes = response.body.len(),
                attempts = ctx.attempts,
                is_retry = ctx.is_retry,
                "received response"
            ),
            Err(err) => tracing::warn!(
                request_id = %ctx.request.id,
                error = %err,
                kind = %err.kind(),
                attempts = ctx.attempts,
                is_retry = ctx.is_retry,
                "request failed"
            ),
        }
        Box::pin(async { InterceptOutcome::Proceed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::wire_request;
    use crate::response::RawResponse;
    use http::{Method, StatusCode};

    #[tokio::test]
    async fn test_logging_is_transparent() {
        let request = wire_request(Method::POST, "https://x.test/login");
        let adapted = LoggingInterceptor.adapt(request.clone()).await.unwrap();
        assert_eq!(adapted.url, request.url);
        assert_eq!(adapted.headers, request.headers);

        for outcome in [
            Ok(RawResponse::new(StatusCode::OK, "{}")),
            Err(ClientError::AuthExpired),
        ] {
            let ctx = InspectContext {
                request: &request,
                outcome: &outcome,
                attempts: 2,
                is_retry: false,
            };
            assert!(matches!(
                LoggingInterceptor.inspect(&ctx).await,
                InterceptOutcome::Proceed
            ));
        }
    }
}
