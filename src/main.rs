use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use device_authority::{
    api::{self, AppState},
    auth::AuthService,
    clock::SystemClock,
    config::Config,
    open_store,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // -----------------------------
    // Shared state / Dependencies
    // -----------------------------
    let config = Config::from_env()?;
    let store = open_store(&config)?;
    let auth = AuthService::new(store, Arc::new(SystemClock), &config.auth);

    let state = AppState {
        auth,
        admin: config.admin.clone().map(Arc::new),
    };

    // -----------------------------
    // Routers
    // -----------------------------
    let app = api::router(state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods(Any),
    );

    info!(addr = %config.bind_addr, backend = ?config.store, "device authority listening");

    let listener = TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
