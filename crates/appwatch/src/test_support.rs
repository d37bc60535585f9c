//! Loopback servers standing in for Consul and the application manager in tests.

use axum::Router;
use std::net::SocketAddr;

/// Serve `app` on an ephemeral loopback port and return its address
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
