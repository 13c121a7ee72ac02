use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use switchyard_client::{CancellationToken, Client, ErrorKind, RequestDescriptor};
use switchyard_examples::{local_registry, spawn_server};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(30)).await;
    Json(json!({ "done": true }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let base = spawn_server(Router::new().route("/slow", get(slow))).await?;
    println!("Slow server listening on {}", base);

    let client = Client::builder().registry(local_registry(&base)).build()?;
    let descriptor = RequestDescriptor::builder("api", "/slow").build()?;

    // Cancel through a token.
    let token = CancellationToken::new();
    let call = tokio::spawn({
        let client = client.clone();
        let descriptor = descriptor.clone();
        let token = token.clone();
        async move { client.execute_cancellable::<Value>(&descriptor, token).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("in flight: {}", client.in_flight());
    token.cancel();
    match call.await? {
        Err(err) if err.kind() == ErrorKind::Cancelled => println!("token cancel: cancelled"),
        other => println!("token cancel: unexpected {:?}", other.map(|r| r.into_inner())),
    }

    // Cancel through the handle of a callback call.
    let (tx, rx) = oneshot::channel();
    let handle = client.execute_with_callback::<Value, _>(
        descriptor.clone(),
        &Handle::current(),
        move |result| {
            let _ = tx.send(result.map(|r| r.into_inner()));
        },
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();
    println!("callback cancel: {:?}", rx.await?.map_err(|e| e.kind()));

    // Cancel everything, e.g. on logout.
    let calls: Vec<_> = (0..3)
        .map(|_| {
            let client = client.clone();
            let descriptor = descriptor.clone();
            tokio::spawn(async move { client.execute::<Value>(&descriptor).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("in flight before cancel_all: {}", client.in_flight());
    client.cancel_all();
    for call in calls {
        println!("cancel_all: {:?}", call.await?.map(|r| r.into_inner()).map_err(|e| e.kind()));
    }
    println!("in flight after cancel_all: {}", client.in_flight());
    Ok(())
}
