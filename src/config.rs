//! Environment configuration.
//!
//! Each binary builds its config once at startup and threads it (inside the
//! service state) into every component — no process-wide mutable singletons,
//! no init-order coupling. Lookups are injected so tests never touch the
//! real environment.

/// Configuration for the gateway service.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub controlplane_url: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub nats_url: Option<String>,
    pub otlp_endpoint: Option<String>,
    /// Size of the drain worker pool behind the admission queue.
    pub dispatch_workers: usize,
}

impl GatewayConfig {
    /// Read from process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read from an arbitrary lookup (tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: parse_or(get("PORT"), 8080),
            controlplane_url: get("CONTROLPLANE_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "http://controlplane:8081".to_string()),
            database_url: get("DATABASE_URL").filter(|v| !v.is_empty()),
            redis_url: get("REDIS_URL").filter(|v| !v.is_empty()),
            nats_url: get("NATS_URL").filter(|v| !v.is_empty()),
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.is_empty()),
            dispatch_workers: parse_or(get("GATEWAY_DISPATCH_WORKERS"), 1).max(1),
        }
    }
}

/// Configuration for the controlplane service.
#[derive(Debug, Clone)]
pub struct ControlplaneConfig {
    pub port: u16,
    pub tier0_url: String,
    pub tier1_url: String,
    pub tier2_url: String,
    pub prometheus_url: String,
    pub otlp_endpoint: Option<String>,
}

impl ControlplaneConfig {
    /// Read from process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read from an arbitrary lookup (tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: parse_or(get("PORT"), 8081),
            tier0_url: url_or(get("TIER0_URL"), "http://tier0-fast:8090"),
            tier1_url: url_or(get("TIER1_URL"), "http://tier1-mid:8091"),
            tier2_url: url_or(get("TIER2_URL"), "http://tier2-best:8092"),
            prometheus_url: url_or(get("PROMETHEUS_URL"), "http://prometheus:9090"),
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.is_empty()),
        }
    }
}

fn url_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_gateway_defaults() {
        let config = GatewayConfig::from_lookup(|_| None);
        assert_eq!(config.port, 8080);
        assert_eq!(config.controlplane_url, "http://controlplane:8081");
        assert_eq!(config.database_url, None);
        assert_eq!(config.redis_url, None);
        assert_eq!(config.dispatch_workers, 1);
    }

    #[test]
    fn test_gateway_reads_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("PORT", "9999"),
            ("CONTROLPLANE_URL", "http://cp.internal:8081"),
            ("REDIS_URL", "redis://cache:6379"),
            ("GATEWAY_DISPATCH_WORKERS", "4"),
        ]));
        assert_eq!(config.port, 9999);
        assert_eq!(config.controlplane_url, "http://cp.internal:8081");
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.dispatch_workers, 4);
    }

    #[test]
    fn test_gateway_worker_pool_floor_is_one() {
        let config = GatewayConfig::from_lookup(lookup(&[("GATEWAY_DISPATCH_WORKERS", "0")]));
        assert_eq!(config.dispatch_workers, 1);
    }

    #[test]
    fn test_controlplane_defaults() {
        let config = ControlplaneConfig::from_lookup(|_| None);
        assert_eq!(config.port, 8081);
        assert_eq!(config.tier0_url, "http://tier0-fast:8090");
        assert_eq!(config.tier1_url, "http://tier1-mid:8091");
        assert_eq!(config.tier2_url, "http://tier2-best:8092");
        assert_eq!(config.prometheus_url, "http://prometheus:9090");
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let config = ControlplaneConfig::from_lookup(lookup(&[("TIER0_URL", "")]));
        assert_eq!(config.tier0_url, "http://tier0-fast:8090");

        let config = GatewayConfig::from_lookup(lookup(&[("PORT", "not-a-number")]));
        assert_eq!(config.port, 8080);
    }
}
