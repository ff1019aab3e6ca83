use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tasker_sidecar::api::{routes::create_router, state::AppState};
use tasker_sidecar::config::Config;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    // Create application state
    let state = Arc::new(AppState::new());

    // Build router
    let app = create_router(state);

    // Start server
    let host = std::net::IpAddr::from_str(&config.host).unwrap_or_else(|_| [127, 0, 0, 1].into());
    let addr = SocketAddr::from((host, config.port));
    tracing::info!("Tasker Sidecar starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
