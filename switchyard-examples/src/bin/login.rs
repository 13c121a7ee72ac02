use axum::http::Method;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use switchyard_client::{Client, LoggingInterceptor, RequestDescriptor};
use switchyard_examples::{local_registry, spawn_server};

#[derive(Debug, Deserialize)]
struct Echo {
    url: String,
    json: Value,
}

// Echo the body back the way httpbin does
async fn login(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "url": "/login", "json": body }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let base = spawn_server(Router::new().route("/login", post(login))).await?;
    println!("Echo server listening on {}", base);

    let client = Client::builder()
        .registry(local_registry(&base))
        .common_header("x-app", "switchyard-demo")
        .with_request_interceptor(LoggingInterceptor)
        .with_response_interceptor(LoggingInterceptor)
        .build()?;

    let descriptor = RequestDescriptor::builder("api", "/login")
        .method(Method::POST)
        .parameters(json!({ "username": "u", "password": "p" }))
        .build()?;

    let response = client.execute::<Echo>(&descriptor).await?;
    println!("status: {}", response.status());
    println!("echoed {} -> {}", response.url, response.json);
    println!(
        "attempts: {}, elapsed: {:?}",
        response.metrics().attempts,
        response.metrics().elapsed
    );
    Ok(())
}
