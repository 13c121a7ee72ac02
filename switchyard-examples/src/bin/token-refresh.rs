use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use futures::future::join_all;
use serde_json::{Value, json};
use switchyard_client::{
    BearerAuthInterceptor, Client, RefreshError, RequestDescriptor, SharedToken,
    TokenExpiryInterceptor, TokenRefreshCoordinator,
};
use switchyard_examples::{local_registry, spawn_server};

#[derive(Default)]
struct Auth {
    generation: AtomicU32,
}

impl Auth {
    fn current(&self) -> String {
        format!("token-{}", self.generation.load(Ordering::SeqCst))
    }
}

// Only the latest token is accepted
async fn profile(State(auth): State<Arc<Auth>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let expected = format!("Bearer {}", auth.current());
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(got) if got == expected => (StatusCode::OK, Json(json!({ "name": "alice" }))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "expired" }))),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let auth = Arc::new(Auth::default());
    let router = Router::new()
        .route("/profile", get(profile))
        .with_state(auth.clone());
    let base = spawn_server(router).await?;
    println!("Auth server listening on {}", base);

    // Rotate server-side so the client's token is stale.
    let token = SharedToken::with_token(auth.current());
    auth.generation.fetch_add(1, Ordering::SeqCst);

    let refreshes = Arc::new(AtomicU32::new(0));
    let coordinator = TokenRefreshCoordinator::new();
    {
        let token = token.clone();
        let auth = auth.clone();
        let refreshes = refreshes.clone();
        coordinator.set_handler(move || {
            let token = token.clone();
            let auth = auth.clone();
            let refreshes = refreshes.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                refreshes.fetch_add(1, Ordering::SeqCst);
                token.set(auth.current());
                Ok::<(), RefreshError>(())
            }
        });
    }

    let client = Client::builder()
        .registry(local_registry(&base))
        .with_request_interceptor(BearerAuthInterceptor::new(token.clone()))
        .with_response_interceptor(TokenExpiryInterceptor::new(coordinator.clone()))
        .build()?;

    let descriptor = RequestDescriptor::builder("api", "/profile").build()?;
    let calls = (0..5).map(|_| client.execute::<Value>(&descriptor));
    for (i, result) in join_all(calls).await.into_iter().enumerate() {
        match result {
            Ok(response) => println!(
                "call {}: {} (passes: {})",
                i,
                response["name"],
                response.metrics().passes
            ),
            Err(err) => println!("call {}: failed: {}", i, err),
        }
    }

    println!(
        "refreshes: {}, status: {:?}",
        refreshes.load(Ordering::SeqCst),
        coordinator.status()
    );
    Ok(())
}
