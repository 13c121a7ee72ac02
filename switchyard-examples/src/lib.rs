//! Shared helpers for the demo binaries.
//!
//! Every demo starts a small axum server on a local port and points a
//! `"api"` target at it through a develop environment.

use std::net::SocketAddr;

use axum::Router;
use switchyard_client::{DomainRegistry, DomainTarget, Environment};

/// Returns the server address from the PORT env var, defaulting to an
/// ephemeral port.
pub fn server_addr() -> SocketAddr {
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0u16);
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Serve `router` in the background and return its base URL.
pub async fn spawn_server(router: Router) -> anyhow::Result<String> {
    let listener = tokio::net::TcpListener::bind(server_addr()).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "demo server stopped");
        }
    });
    Ok(format!("http://{}", addr))
}

/// A registry in `develop:local` whose `"api"` target points at `base`.
pub fn local_registry(base: &str) -> DomainRegistry {
    let registry = DomainRegistry::with_environment(Environment::develop("local"));
    registry.register(
        "api",
        DomainTarget::new()
            .develop("local", base)
            .release("https://api.example.com"),
    );
    registry
}
