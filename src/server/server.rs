use anyhow::{Context, Result};
use std::time::Instant;

use axum::{
    extract::State,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use super::sse::{make_stream_routes, ConnectionCount};
use super::state::*;
use super::subscription_routes::subscription_routes;
use super::{log_requests, metrics, ServerConfig};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    uptime_secs: u64,
    active_connections: ConnectionCount,
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_connections: state.registry.connection_count().await,
    })
}

/// Builds the public router over already constructed components.
pub fn make_app(
    config: ServerConfig,
    registry: GuardedConnectionRegistry,
    facade: GuardedDispatchFacade,
    ingestor: GuardedWebhookIngestor,
) -> Router {
    let state = ServerState {
        config,
        start_time: Instant::now(),
        registry,
        facade,
        ingestor,
    };

    let api_routes: Router<ServerState> = Router::new()
        .merge(make_stream_routes())
        .nest("/subscription", subscription_routes());

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics::metrics_handler))
}

pub async fn run_server(
    config: ServerConfig,
    registry: GuardedConnectionRegistry,
    facade: GuardedDispatchFacade,
    ingestor: GuardedWebhookIngestor,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, registry, facade, ingestor);

    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(metrics_listener, make_metrics_app()).await {
            error!("Metrics server stopped: {}", err);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on {}", listener.local_addr()?);

    Ok(axum::serve(listener, app).await?)
}
