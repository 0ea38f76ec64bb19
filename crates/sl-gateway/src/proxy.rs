//! Request proxying
//!
//! Forwards an inbound gateway request to a downstream service by name:
//! breaker gate, registry lookup, `/api` prefix strip, bounded-timeout
//! forward, verbatim relay. Every outcome feeds the breaker before the
//! response is produced, so the next request observes the updated state.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::Response;
use metrics::counter;
use tracing::{debug, error, warn};

use sl_registry::ServiceRegistry;

use crate::breaker::{retry_after_secs, CircuitBreakerSet, Gate};
use crate::error::GatewayError;
use crate::Result;

/// Headers never copied toward the downstream service (or back out):
/// host identification and hop-by-hop framing are rebuilt per leg.
const SKIP_HEADERS: [HeaderName; 4] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
];

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Externally visible prefix stripped before forwarding.
    pub strip_prefix: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            strip_prefix: "/api".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Result of one forwarded attempt, before it is mapped onto the HTTP
/// response and the breaker.
#[derive(Debug)]
pub enum ProxyOutcome {
    /// The dependency answered; any status is relayed verbatim.
    Responded { status: StatusCode },
    /// TCP connect failed (service down).
    Refused,
    TimedOut,
    Transport(String),
}

impl ProxyOutcome {
    /// Breaker accounting: connectivity problems and 5xx count, application
    /// 4xx responses pass through without tripping anything.
    pub fn counts_as_failure(&self) -> bool {
        match self {
            ProxyOutcome::Responded { status } => status.is_server_error(),
            ProxyOutcome::Refused | ProxyOutcome::TimedOut | ProxyOutcome::Transport(_) => true,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ProxyOutcome::Responded { status } if status.is_server_error() => "remote_error",
            ProxyOutcome::Responded { .. } => "relayed",
            ProxyOutcome::Refused => "refused",
            ProxyOutcome::TimedOut => "timeout",
            ProxyOutcome::Transport(_) => "transport_error",
        }
    }
}

/// Routes inbound requests to downstream services by name.
pub struct ProxyRouter {
    registry: Arc<ServiceRegistry>,
    breakers: Arc<CircuitBreakerSet>,
    client: reqwest::Client,
    config: ProxyConfig,
}

impl ProxyRouter {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        breakers: Arc<CircuitBreakerSet>,
        config: ProxyConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("http client: {}", e)))?;

        Ok(Self {
            registry,
            breakers,
            client,
            config,
        })
    }

    /// Forward one request to `service` and relay the answer.
    pub async fn forward(
        &self,
        service: &str,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response> {
        if let Gate::Open { retry_after } = self.breakers.check(service) {
            let seconds = retry_after_secs(retry_after);
            debug!(service = %service, retry_after = seconds, "Circuit open, failing fast");
            counter!("sl_gateway_proxy_outcomes_total",
                "service" => service.to_string(), "outcome" => "circuit_open")
            .increment(1);
            return Err(GatewayError::CircuitOpen {
                service: service.to_string(),
                retry_after: seconds,
            });
        }

        let entry = self.registry.discover(service)?;
        let target = self.build_target_url(&entry.url, uri);
        debug!(service = %service, method = %method, target = %target, "Proxying request");

        let request = self
            .client
            .request(method, &target)
            .headers(filter_headers(headers))
            .body(body);

        match request.send().await {
            Ok(response) => {
                let outcome = ProxyOutcome::Responded {
                    status: response.status(),
                };
                counter!("sl_gateway_proxy_outcomes_total",
                    "service" => service.to_string(), "outcome" => outcome.label())
                .increment(1);

                // Breaker state must be updated before any response leaves.
                self.breakers.record(service, !outcome.counts_as_failure());
                relay_response(response).await
            }
            Err(e) => {
                let (outcome, err) = if e.is_timeout() {
                    warn!(service = %service, "Proxied request timed out");
                    (
                        ProxyOutcome::TimedOut,
                        GatewayError::Timeout {
                            service: service.to_string(),
                        },
                    )
                } else if e.is_connect() {
                    warn!(service = %service, "Connection refused, marking unhealthy");
                    self.registry.mark_health(service, false);
                    (
                        ProxyOutcome::Refused,
                        GatewayError::ServiceUnavailable {
                            service: service.to_string(),
                        },
                    )
                } else {
                    error!(service = %service, error = %e, "Transport error while proxying");
                    (
                        ProxyOutcome::Transport(e.to_string()),
                        GatewayError::internal(e.to_string()),
                    )
                };

                counter!("sl_gateway_proxy_outcomes_total",
                    "service" => service.to_string(), "outcome" => outcome.label())
                .increment(1);

                // Breaker state must be updated before any response leaves.
                self.breakers.record(service, false);
                Err(err)
            }
        }
    }

    fn build_target_url(&self, base_url: &str, uri: &Uri) -> String {
        let path = uri.path();
        let stripped = path
            .strip_prefix(self.config.strip_prefix.as_str())
            .unwrap_or(path);
        let stripped = if stripped.is_empty() { "/" } else { stripped };

        match uri.query() {
            Some(query) => format!("{}{}?{}", base_url.trim_end_matches('/'), stripped, query),
            None => format!("{}{}", base_url.trim_end_matches('/'), stripped),
        }
    }
}

fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if SKIP_HEADERS.contains(name) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

/// Turn a downstream reqwest response into the relayed axum response.
async fn relay_response(response: reqwest::Response) -> Result<Response> {
    let status = response.status();
    let mut builder = Response::builder().status(status);

    for (name, value) in response.headers() {
        if SKIP_HEADERS.contains(name) {
            continue;
        }
        builder = builder.header(name.clone(), value.clone());
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| GatewayError::internal(format!("reading upstream body: {}", e)))?;

    builder
        .body(Body::from(bytes))
        .map_err(|e| GatewayError::internal(format!("building relay response: {}", e)))
}
