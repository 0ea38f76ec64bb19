//! Gateway HTTP surface
//!
//! Health and registry introspection, the aggregation endpoints, and the
//! prefix-routed proxy paths toward the user, item and list services.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{OriginalUri, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use sl_common::{RegistryStats, ServiceEntry, ServiceInfo};
use sl_registry::ServiceRegistry;

use crate::aggregate::Aggregator;
use crate::breaker::{BreakerSnapshot, CircuitBreakerSet};
use crate::error::GatewayError;
use crate::proxy::ProxyRouter;
use crate::Result;

const USER_SERVICE: &str = "user-service";
const ITEM_SERVICE: &str = "item-service";
const LIST_SERVICE: &str = "list-service";

/// Shared state cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub breakers: Arc<CircuitBreakerSet>,
    pub proxy: Arc<ProxyRouter>,
    pub aggregator: Arc<Aggregator>,
    pub started_at: Instant,
}

/// Build the gateway router. Layers (tracing, CORS) are applied by the
/// binary so tests exercise the bare routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/registry", get(registry_view).post(register_service))
        .route("/api/search", get(search))
        .route("/api/dashboard", get(dashboard))
        // user service
        .route("/api/auth", any(proxy_user))
        .route("/api/auth/*rest", any(proxy_user))
        .route("/api/users", any(proxy_user))
        .route("/api/users/*rest", any(proxy_user))
        // item service
        .route("/api/items", any(proxy_item))
        .route("/api/items/*rest", any(proxy_item))
        .route("/api/categories", any(proxy_item))
        .route("/api/categories/*rest", any(proxy_item))
        // list service
        .route("/api/lists", any(proxy_list))
        .route("/api/lists/*rest", any(proxy_list))
        .fallback(not_found)
        .with_state(state)
}

// ============================================================================
// Health & Introspection
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: chrono::DateTime<Utc>,
    #[serde(rename = "uptimeSecs")]
    uptime_secs: u64,
    #[serde(rename = "circuitBreakers")]
    circuit_breakers: HashMap<String, BreakerSnapshot>,
    registry: RegistryStats,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        service: "api-gateway",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        circuit_breakers: state.breakers.snapshot(),
        registry: state.registry.stats(),
    })
}

#[derive(Serialize)]
struct RegistryView {
    services: HashMap<String, ServiceEntry>,
    stats: RegistryStats,
    timestamp: chrono::DateTime<Utc>,
}

async fn registry_view(State(state): State<AppState>) -> Json<RegistryView> {
    Json(RegistryView {
        services: state.registry.list_services(),
        stats: state.registry.stats(),
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: String,
    #[serde(flatten)]
    info: ServiceInfo,
}

/// Services announce themselves here on startup; re-registration replaces
/// the previous entry.
async fn register_service(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> impl IntoResponse {
    state.registry.register(&request.name, request.info);
    let entry = state.registry.discover(&request.name).ok();
    (StatusCode::CREATED, Json(entry))
}

async fn banner(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "API Gateway - Shopping List Platform",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /health",
            "GET /registry",
            "GET /api/dashboard",
            "GET /api/search?q=term",
            "ALL /api/auth/* -> user-service",
            "ALL /api/users/* -> user-service",
            "ALL /api/items/* -> item-service",
            "ALL /api/categories/* -> item-service",
            "ALL /api/lists/* -> list-service",
        ],
        "circuitBreakerStatus": state.breakers.snapshot(),
    }))
}

// ============================================================================
// Aggregation
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let term = query
        .q
        .as_deref()
        .filter(|q| !q.is_empty())
        .ok_or(GatewayError::MissingQueryParam("q"))?;

    let body = state
        .aggregator
        .search(term, headers.get(header::AUTHORIZATION))
        .await?;
    Ok(Json(body))
}

async fn dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .ok_or(GatewayError::AuthorizationRequired)?;

    let body = state.aggregator.dashboard(authorization).await?;
    Ok(Json(body))
}

// ============================================================================
// Proxied routes
// ============================================================================

async fn proxy_user(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy_to(&state, USER_SERVICE, method, uri, headers, body).await
}

async fn proxy_item(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy_to(&state, ITEM_SERVICE, method, uri, headers, body).await
}

async fn proxy_list(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy_to(&state, LIST_SERVICE, method, uri, headers, body).await
}

async fn proxy_to(
    state: &AppState,
    service: &str,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.proxy.forward(service, method, &uri, &headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn not_found(OriginalUri(uri): OriginalUri) -> GatewayError {
    info!(path = %uri.path(), "No route matched");
    GatewayError::RouteNotFound(uri.path().to_string())
}
