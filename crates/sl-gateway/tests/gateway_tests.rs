//! Gateway integration tests
//!
//! Exercise the full router against wiremock dependencies: prefix rewriting,
//! verbatim relay, breaker behavior, partial-failure aggregation and the
//! uniform error envelope.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sl_common::ServiceInfo;
use sl_gateway::{
    create_router, AggregatorConfig, AppState, Aggregator, BreakerConfig, CircuitBreakerSet,
    CircuitState, ProxyConfig, ProxyRouter,
};
use sl_registry::ServiceRegistry;

fn service_info(url: &str) -> ServiceInfo {
    ServiceInfo {
        url: url.to_string(),
        version: "1.0.0".to_string(),
        endpoints: vec!["/health".to_string()],
    }
}

fn state_with(timeout: Duration, breaker: BreakerConfig) -> AppState {
    let registry = Arc::new(ServiceRegistry::new());
    let breakers = Arc::new(CircuitBreakerSet::new(breaker));
    let proxy = Arc::new(
        ProxyRouter::new(
            registry.clone(),
            breakers.clone(),
            ProxyConfig {
                strip_prefix: "/api".to_string(),
                connect_timeout: timeout,
                request_timeout: timeout,
            },
        )
        .unwrap(),
    );
    let aggregator = Arc::new(
        Aggregator::new(registry.clone(), AggregatorConfig { call_timeout: timeout }).unwrap(),
    );

    AppState {
        registry,
        breakers,
        proxy,
        aggregator,
        started_at: Instant::now(),
    }
}

fn test_state() -> AppState {
    state_with(Duration::from_millis(500), BreakerConfig::default())
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let app = create_router(state.clone());
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn get(state: &AppState, uri: &str) -> (StatusCode, Value) {
    send(state, Request::get(uri).body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn proxy_strips_api_prefix_and_relays_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/42"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "42", "name": "Rice"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let state = test_state();
    state.registry.register("item-service", service_info(&server.uri()));

    let (status, body) = get(&state, "/api/items/42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Rice");
}

#[tokio::test]
async fn proxy_forwards_query_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/lists"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "L1"})))
        .mount(&server)
        .await;

    let state = test_state();
    state.registry.register("list-service", service_info(&server.uri()));

    let request = Request::post("/api/lists")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"name":"Groceries"}"#))
        .unwrap();
    let (status, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "L1");
}

#[tokio::test]
async fn remote_4xx_relays_verbatim_and_never_trips_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/99"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "Item not found"})))
        .mount(&server)
        .await;

    let state = test_state();
    state.registry.register("item-service", service_info(&server.uri()));

    for _ in 0..5 {
        let (status, body) = get(&state, "/api/items/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Item not found");
    }

    assert_eq!(state.breakers.state("item-service"), CircuitState::Closed);
    let snapshot = state.breakers.snapshot();
    assert_eq!(snapshot["item-service"].consecutive_failures, 0);
}

#[tokio::test]
async fn remote_5xx_counts_toward_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .mount(&server)
        .await;

    let state = test_state();
    state.registry.register("item-service", service_info(&server.uri()));

    for _ in 0..3 {
        let (status, _) = get(&state, "/api/items").await;
        // dependency answers are relayed verbatim, even 5xx
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    assert_eq!(state.breakers.state("item-service"), CircuitState::Open);
}

#[tokio::test]
async fn refused_connection_maps_to_503_and_marks_unhealthy() {
    let state = test_state();
    // nothing listens here
    state
        .registry
        .register("user-service", service_info("http://127.0.0.1:1"));

    let (status, body) = get(&state, "/api/users/me").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["status"], 503);
    assert!(!state.registry.discover("user-service").unwrap().healthy);
}

#[tokio::test]
async fn upstream_timeout_maps_to_504() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let state = state_with(Duration::from_millis(200), BreakerConfig::default());
    state.registry.register("item-service", service_info(&server.uri()));

    let (status, body) = get(&state, "/api/items").await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["status"], 504);
}

#[tokio::test]
async fn open_breaker_fails_fast_without_touching_the_dependency() {
    let state = test_state();
    state
        .registry
        .register("item-service", service_info("http://127.0.0.1:1"));

    for _ in 0..3 {
        let (status, _) = get(&state, "/api/items").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
    assert_eq!(state.breakers.state("item-service"), CircuitState::Open);

    // service recovers, but the open circuit must short-circuit before it
    let server = MockServer::start().await;
    state.registry.register("item-service", service_info(&server.uri()));

    let (status, body) = get(&state, "/api/items").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["retryAfter"].as_u64().unwrap() > 0);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn circuit_open_reports_remaining_cooldown() {
    let state = state_with(
        Duration::from_millis(500),
        BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(10),
        },
    );
    state
        .registry
        .register("item-service", service_info("http://127.0.0.1:1"));

    for _ in 0..3 {
        let _ = get(&state, "/api/items").await;
    }

    let (status, body) = get(&state, "/api/items").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let retry_after = body["retryAfter"].as_u64().unwrap();
    assert!((9..=10).contains(&retry_after), "retryAfter = {}", retry_after);
}

#[tokio::test]
async fn breaker_recovers_through_half_open_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let state = state_with(
        Duration::from_millis(500),
        BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_millis(50),
        },
    );
    state
        .registry
        .register("item-service", service_info("http://127.0.0.1:1"));
    for _ in 0..3 {
        let _ = get(&state, "/api/items").await;
    }
    assert_eq!(state.breakers.state("item-service"), CircuitState::Open);

    // after the cooldown the probe goes through to the recovered service
    state.registry.register("item-service", service_info(&server.uri()));
    tokio::time::sleep(Duration::from_millis(70)).await;

    let (status, _) = get(&state, "/api/items").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.breakers.state("item-service"), CircuitState::Closed);
}

#[tokio::test]
async fn search_merges_partial_results_when_one_branch_times_out() {
    let items = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "rice"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "1", "name": "Rice"}])),
        )
        .mount(&items)
        .await;

    let lists = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lists"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&lists)
        .await;

    let state = state_with(Duration::from_millis(200), BreakerConfig::default());
    state.registry.register("item-service", service_info(&items.uri()));
    state.registry.register("list-service", service_info(&lists.uri()));

    let (status, body) = get(&state, "/api/search?q=rice").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["searchTerm"], "rice");
    assert!(body["items"].is_array());
    assert!(body.get("lists").is_none());
}

#[tokio::test]
async fn search_filters_lists_by_term() {
    let items = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&items)
        .await;

    let lists = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "Groceries", "description": "weekly run"},
            {"name": "Books", "description": "fiction"},
        ])))
        .mount(&lists)
        .await;

    let state = test_state();
    state.registry.register("item-service", service_info(&items.uri()));
    state.registry.register("list-service", service_info(&lists.uri()));

    let (status, body) = get(&state, "/api/search?q=grocer").await;

    assert_eq!(status, StatusCode::OK);
    let matched = body["lists"].as_array().unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0]["name"], "Groceries");
}

#[tokio::test]
async fn search_without_query_param_is_rejected() {
    let state = test_state();
    let (status, body) = get(&state, "/api/search").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["status"], 400);
}

#[tokio::test]
async fn dashboard_requires_authorization() {
    let state = test_state();
    let (status, body) = get(&state, "/api/dashboard").await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["status"], 401);
}

#[tokio::test]
async fn dashboard_composes_user_and_list_statistics() {
    let users = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
        .mount(&users)
        .await;

    let lists = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"status": "active", "summary": {"totalItems": 3, "purchasedItems": 1, "estimatedTotal": 10.25}},
            {"status": "completed", "summary": {"totalItems": 2, "purchasedItems": 2, "estimatedTotal": 32.25}},
        ])))
        .mount(&lists)
        .await;

    let state = test_state();
    state.registry.register("user-service", service_info(&users.uri()));
    state.registry.register("list-service", service_info(&lists.uri()));

    let request = Request::get("/api/dashboard")
        .header("authorization", "Bearer token")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], "u1");
    assert_eq!(body["lists"]["total"], 2);
    assert_eq!(body["lists"]["active"], 1);
    assert_eq!(body["lists"]["completed"], 1);
    assert_eq!(body["lists"]["items"], 5.0);
    assert_eq!(body["statistics"]["totalEstimated"], 42.5);
    assert_eq!(body["statistics"]["purchasedItems"], 3.0);
}

#[tokio::test]
async fn dashboard_tolerates_missing_user_branch() {
    let lists = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&lists)
        .await;

    let state = test_state();
    // user-service never registered
    state.registry.register("list-service", service_info(&lists.uri()));

    let request = Request::get("/api/dashboard")
        .header("authorization", "Bearer token")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["user"].is_null());
    assert_eq!(body["lists"]["total"], 0);
}

#[tokio::test]
async fn unmatched_route_returns_404_envelope() {
    let state = test_state();
    let (status, body) = get(&state, "/nope/nothing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["status"], 404);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("/nope/nothing"));
}

#[tokio::test]
async fn health_reports_breakers_and_registry() {
    let state = test_state();
    state
        .registry
        .register("item-service", service_info("http://127.0.0.1:9"));
    state.breakers.record("item-service", false);

    let (status, body) = get(&state, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["service"], "api-gateway");
    assert_eq!(body["circuitBreakers"]["item-service"]["state"], "CLOSED");
    assert_eq!(
        body["circuitBreakers"]["item-service"]["consecutiveFailures"],
        1
    );
    assert_eq!(body["registry"]["totalServices"], 1);
}

#[tokio::test]
async fn register_endpoint_makes_service_discoverable() {
    let state = test_state();

    let request = Request::post("/registry")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "name": "item-service",
                "url": "http://localhost:3003",
                "version": "1.2.0",
                "endpoints": ["/health", "/items"],
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["url"], "http://localhost:3003");

    let (status, body) = get(&state, "/registry").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services"]["item-service"]["version"], "1.2.0");
    assert_eq!(body["stats"]["totalServices"], 1);
}
