//! Shared test harness: serves the fixture pages over real HTTP so the
//! child iframe is same-origin with the parent (file:// URLs are treated
//! as opaque unique origins by Chrome and would block the cross-frame
//! assertions below).

use axum::{response::Html, routing::get, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;

fn fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures");
    path.push(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("missing fixture {:?}: {}", path, e))
}

/// Starts a throwaway HTTP server for the fixture pages on an OS-assigned
/// port and returns its base URL. The server task is detached; it dies
/// with the test process.
pub async fn serve_fixtures() -> String {
    let app = Router::new()
        .route("/", get(|| async { Html(fixture("test_page.html")) }))
        .route("/iframe_page.html", get(|| async { Html(fixture("iframe_page.html")) }));

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    format!("http://{}/", addr)
}
