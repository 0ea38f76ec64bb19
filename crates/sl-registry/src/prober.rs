//! Periodic health sweep
//!
//! Probes every registered service's /health endpoint on a timer and updates
//! the registry. The sweep snapshots the target list first so no registry
//! guard is held while probes are in flight, and it runs fully independently
//! of request traffic.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::registry::ServiceRegistry;

#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// How often to sweep all registered services.
    pub interval: Duration,
    /// Per-probe request timeout.
    pub probe_timeout: Duration,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Background liveness prober for the service registry.
pub struct HealthProber {
    registry: Arc<ServiceRegistry>,
    client: reqwest::Client,
    config: ProberConfig,
}

impl HealthProber {
    pub fn new(registry: Arc<ServiceRegistry>, config: ProberConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(config.probe_timeout)
            .timeout(config.probe_timeout)
            .build()
            .unwrap_or_default();

        Self {
            registry,
            client,
            config,
        }
    }

    /// Spawn the periodic sweep. Stops when the shutdown channel fires.
    pub fn start(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let interval = self.config.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("Running registry health sweep");
                        self.perform_health_checks().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Health prober shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Probe every registered service once and record the outcome.
    pub async fn perform_health_checks(&self) {
        let targets = self.registry.snapshot_targets();
        if targets.is_empty() {
            return;
        }

        for (name, base_url) in targets {
            let healthy = self.probe(&base_url).await;
            if !healthy {
                warn!(service = %name, url = %base_url, "Health probe failed");
            }
            self.registry.mark_health(&name, healthy);
        }
    }

    async fn probe(&self, base_url: &str) -> bool {
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        let request = self.client.get(&url).timeout(self.config.probe_timeout);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_common::ServiceInfo;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn info(url: &str) -> ServiceInfo {
        ServiceInfo {
            url: url.to_string(),
            version: "1.0.0".to_string(),
            endpoints: vec![],
        }
    }

    fn prober(registry: Arc<ServiceRegistry>) -> HealthProber {
        HealthProber::new(
            registry,
            ProberConfig {
                interval: Duration::from_secs(30),
                probe_timeout: Duration::from_millis(500),
            },
        )
    }

    #[tokio::test]
    async fn sweep_marks_responsive_service_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let registry = Arc::new(ServiceRegistry::new());
        registry.register("item-service", info(&server.uri()));
        registry.mark_health("item-service", false);

        prober(registry.clone()).perform_health_checks().await;

        let entry = registry.discover("item-service").unwrap();
        assert!(entry.healthy);
        assert!(entry.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn sweep_marks_erroring_service_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = Arc::new(ServiceRegistry::new());
        registry.register("list-service", info(&server.uri()));

        prober(registry.clone()).perform_health_checks().await;

        assert!(!registry.discover("list-service").unwrap().healthy);
    }

    #[tokio::test]
    async fn sweep_marks_unreachable_service_unhealthy() {
        let registry = Arc::new(ServiceRegistry::new());
        // nothing listens on port 1
        registry.register("user-service", info("http://127.0.0.1:1"));

        prober(registry.clone()).perform_health_checks().await;

        assert!(!registry.discover("user-service").unwrap().healthy);
    }
}
