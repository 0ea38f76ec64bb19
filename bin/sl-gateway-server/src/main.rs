//! Shopping-list API gateway
//!
//! Fronts the user, item and list services: request proxying with circuit
//! breaking, cross-service aggregation, and registry introspection. The
//! registry is seeded from the environment and kept current by a periodic
//! health prober; services may also re-register themselves over HTTP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sl_common::ServiceInfo;
use sl_gateway::{
    create_router, Aggregator, AggregatorConfig, AppState, BreakerConfig, CircuitBreakerSet,
    ProxyConfig, ProxyRouter,
};
use sl_registry::{HealthProber, ProberConfig, ServiceRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting API gateway");

    let config = load_gateway_config();

    let registry = Arc::new(ServiceRegistry::new());
    for (name, url) in &config.seeds {
        registry.register(
            name,
            ServiceInfo {
                url: url.clone(),
                version: "unknown".to_string(),
                endpoints: Vec::new(),
            },
        );
    }

    let breakers = Arc::new(CircuitBreakerSet::new(BreakerConfig::default()));
    let proxy = Arc::new(ProxyRouter::new(
        registry.clone(),
        breakers.clone(),
        ProxyConfig {
            strip_prefix: "/api".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: config.proxy_timeout,
        },
    )?);
    let aggregator = Arc::new(Aggregator::new(
        registry.clone(),
        AggregatorConfig {
            call_timeout: config.proxy_timeout,
        },
    )?);

    let state = AppState {
        registry: registry.clone(),
        breakers,
        proxy,
        aggregator,
        started_at: Instant::now(),
    };

    // Health sweeps run on their own timer, never blocking request handling.
    let (shutdown_tx, _) = broadcast::channel(1);
    let prober = Arc::new(HealthProber::new(
        registry,
        ProberConfig {
            interval: config.health_check_interval,
            probe_timeout: Duration::from_secs(5),
        },
    ));
    prober.start(shutdown_tx.subscribe());

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("0.0.0.0:{}", config.port);
    info!(port = config.port, "Gateway listening");

    let listener = TcpListener::bind(&addr).await?;
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Gateway server error");
        }
    });

    info!("API gateway started. Press Ctrl+C to shutdown.");

    shutdown_signal().await;
    info!("Shutdown signal received...");

    let _ = shutdown_tx.send(());
    server_task.abort();

    info!("API gateway shutdown complete");
    Ok(())
}

struct GatewayConfig {
    port: u16,
    proxy_timeout: Duration,
    health_check_interval: Duration,
    seeds: Vec<(String, String)>,
}

/// Load gateway configuration from environment variables.
fn load_gateway_config() -> GatewayConfig {
    let port = std::env::var("GATEWAY_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);

    let proxy_timeout = std::env::var("PROXY_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(15));

    let health_check_interval = std::env::var("HEALTH_CHECK_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30));

    let seeds = vec![
        (
            "user-service".to_string(),
            std::env::var("USER_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3001".to_string()),
        ),
        (
            "list-service".to_string(),
            std::env::var("LIST_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3002".to_string()),
        ),
        (
            "item-service".to_string(),
            std::env::var("ITEM_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3003".to_string()),
        ),
    ];

    GatewayConfig {
        port,
        proxy_timeout,
        health_check_interval,
        seeds,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
