//! In-memory service directory
//!
//! One entry per service name. Registration is last-write-wins: services
//! re-register on every startup and the newest address simply replaces the
//! old one. Entries are never deleted; a dead service shows up as unhealthy
//! until it comes back.

use std::collections::HashMap;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, warn};

use sl_common::{RegistryStats, ServiceEntry, ServiceInfo};

use crate::{RegistryError, Result};

/// Directory of downstream services, shared across all request handlers.
pub struct ServiceRegistry {
    entries: DashMap<String, ServiceEntry>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert or replace the entry for `name`. No conflict error: the most
    /// recent registration wins and the entry is immediately discoverable.
    pub fn register(&self, name: &str, info: ServiceInfo) {
        let entry = ServiceEntry::from_info(name, info);
        let replaced = self.entries.insert(name.to_string(), entry).is_some();

        info!(
            service = %name,
            replaced = replaced,
            "Service registered"
        );
    }

    /// Look up a service by name. Health is deliberately not filtered here;
    /// callers route to unhealthy entries as well (see the gateway docs).
    pub fn discover(&self, name: &str) -> Result<ServiceEntry> {
        self.entries
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Snapshot of every registered service for introspection endpoints.
    pub fn list_services(&self) -> HashMap<String, ServiceEntry> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Derived aggregate, computed fresh on each call.
    pub fn stats(&self) -> RegistryStats {
        let total = self.entries.len();
        let healthy = self.entries.iter().filter(|e| e.value().healthy).count();

        RegistryStats {
            total_services: total,
            healthy_services: healthy,
            unhealthy_services: total - healthy,
            last_updated_at: Utc::now(),
        }
    }

    /// Flip the health flag for a service and stamp the check time. Called by
    /// the prober and by the proxy when a connection is refused.
    pub fn mark_health(&self, name: &str, healthy: bool) {
        match self.entries.get_mut(name) {
            Some(mut entry) => {
                if entry.healthy != healthy {
                    warn!(service = %name, healthy = healthy, "Service health changed");
                }
                entry.healthy = healthy;
                entry.last_checked_at = Some(Utc::now());
            }
            None => {
                warn!(service = %name, "Health update for unknown service ignored");
            }
        }
    }

    /// Names and base URLs of every entry, for the prober to sweep without
    /// holding any map guard across network calls.
    pub(crate) fn snapshot_targets(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().url.clone()))
            .collect()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(url: &str) -> ServiceInfo {
        ServiceInfo {
            url: url.to_string(),
            version: "1.0.0".to_string(),
            endpoints: vec!["/health".to_string(), "/items".to_string()],
        }
    }

    #[test]
    fn register_then_discover_round_trips() {
        let registry = ServiceRegistry::new();
        registry.register("item-service", info("http://localhost:3003"));

        let entry = registry.discover("item-service").unwrap();
        assert_eq!(entry.name, "item-service");
        assert_eq!(entry.url, "http://localhost:3003");
        assert_eq!(entry.version, "1.0.0");
        assert!(entry.healthy);
        assert!(entry.last_checked_at.is_none());
    }

    #[test]
    fn discover_unregistered_fails_with_not_found() {
        let registry = ServiceRegistry::new();
        let err = registry.discover("user-service").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(name) if name == "user-service"));
    }

    #[test]
    fn reregistration_last_write_wins() {
        let registry = ServiceRegistry::new();
        registry.register("list-service", info("http://old:3002"));
        registry.mark_health("list-service", false);
        registry.register("list-service", info("http://new:3002"));

        let entry = registry.discover("list-service").unwrap();
        assert_eq!(entry.url, "http://new:3002");
        // a fresh registration starts healthy again
        assert!(entry.healthy);
    }

    #[test]
    fn stats_reflect_health_flags() {
        let registry = ServiceRegistry::new();
        registry.register("user-service", info("http://localhost:3001"));
        registry.register("item-service", info("http://localhost:3003"));
        registry.mark_health("item-service", false);

        let stats = registry.stats();
        assert_eq!(stats.total_services, 2);
        assert_eq!(stats.healthy_services, 1);
        assert_eq!(stats.unhealthy_services, 1);
    }

    #[test]
    fn mark_health_stamps_check_time() {
        let registry = ServiceRegistry::new();
        registry.register("user-service", info("http://localhost:3001"));
        registry.mark_health("user-service", true);

        let entry = registry.discover("user-service").unwrap();
        assert!(entry.last_checked_at.is_some());
    }

    #[test]
    fn mark_health_unknown_service_is_ignored() {
        let registry = ServiceRegistry::new();
        registry.mark_health("ghost-service", false);
        assert_eq!(registry.stats().total_services, 0);
    }
}
