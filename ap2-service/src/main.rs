//! Production-ready AP2 service HTTP server.
//!
//! Hosts the merchant agent and the credentials provider behind one router.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p ap2-service --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p ap2-service
//!
//! # Configure logging level
//! RUST_LOG=info cargo run -p ap2-service
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to TOML configuration file (default: `config.toml`)
//! - `HOST` — Override bind address (default: `0.0.0.0`)
//! - `PORT` — Override port (default: `4030`)
//! - `RUST_LOG` — Log level filter (default: `info`)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use axum::Router;
use tower_http::cors;
use tracing_subscriber::EnvFilter;

use ap2::policy::{FixedOtp, WeightedRiskScorer};
use ap2_credentials::directory::demo_directory;
use ap2_credentials::CredentialsService;
use ap2_merchant::catalog::demo_catalog;
use ap2_merchant::MerchantService;

use ap2_service::config::ServiceConfig;
use ap2_service::handlers::{service_router, AppState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("AP2 service failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        merchant = %config.merchant_id,
        "Loaded configuration"
    );

    // Reference data is constructed once at startup and read-only from here.
    let merchant = Arc::new(
        MerchantService::new(config.merchant_id.clone(), Arc::new(demo_catalog()))
            .with_hold_secs(config.reservation_hold_secs),
    );
    let credentials = Arc::new(CredentialsService::with_policies(
        Arc::new(demo_directory()),
        Arc::new(WeightedRiskScorer::new(config.trusted_merchants.clone())),
        Arc::new(FixedOtp {
            code: config.otp_code.clone(),
            risk_threshold: 50,
        }),
    ));

    let state = AppState {
        merchant: Arc::clone(&merchant),
        credentials,
    };

    let app = Router::new().merge(service_router(state)).layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any),
    );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("AP2 service listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background reservation timers before exit.
    merchant.inventory().shutdown();
    tracing::info!("AP2 service shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
