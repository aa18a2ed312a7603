use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use trailbound::{app, initialize_state};

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if cfg!(debug_assertions) {
                    EnvFilter::new("trailbound=trace,tower_http=debug")
                } else {
                    EnvFilter::new("trailbound=info")
                }
            }),
        )
        .init();

    let state = match initialize_state().await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "initialization failed");
            std::process::exit(1);
        },
    };

    let port = std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "cannot bind address");
            std::process::exit(1);
        },
    };

    tracing::info!(%addr, "server started");

    if let Err(err) = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server stopped");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("cannot install interrupt handler");
    }
    tracing::info!("shutting down");
}
