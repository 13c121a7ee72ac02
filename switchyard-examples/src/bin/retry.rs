use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use switchyard_client::{Client, RequestDescriptor, RetryPolicy};
use switchyard_examples::{local_registry, spawn_server};

// Fails twice with 503, then succeeds
async fn flaky(State(hits): State<Arc<AtomicU32>>) -> (StatusCode, Json<Value>) {
    let hit = hits.fetch_add(1, Ordering::SeqCst) + 1;
    if hit < 3 {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "hit": hit })))
    } else {
        (StatusCode::OK, Json(json!({ "hit": hit })))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let hits = Arc::new(AtomicU32::new(0));
    let router = Router::new()
        .route("/flaky", get(flaky))
        .with_state(hits.clone());
    let base = spawn_server(router).await?;
    println!("Flaky server listening on {}", base);

    let client = Client::builder()
        .registry(local_registry(&base))
        .retry_policy(RetryPolicy::fixed(Duration::from_millis(100)).max_attempts(3))
        .build()?;

    let descriptor = RequestDescriptor::builder("api", "/flaky").build()?;
    let response = client.execute::<Value>(&descriptor).await?;
    println!(
        "succeeded on hit {} after {} sends in {:?}",
        response["hit"],
        response.metrics().attempts,
        response.metrics().elapsed
    );

    // Exponential backoff that gives up before the server recovers.
    hits.store(0, Ordering::SeqCst);
    let impatient = RequestDescriptor::builder("api", "/flaky")
        .retry_policy(RetryPolicy::exponential(2.0, Duration::from_secs(1)).max_attempts(1))
        .build()?;
    match client.execute::<Value>(&impatient).await {
        Ok(_) => println!("unexpected success"),
        Err(err) => println!("gave up: {} (kind: {})", err, err.kind()),
    }
    Ok(())
}
