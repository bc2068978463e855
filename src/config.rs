//! Configuration types for node-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::Error;
use crate::index::AddressClass;

/// TTL to apply to all answers when none is configured.
pub const DEFAULT_TTL: u32 = 5;

/// Largest accepted TTL, in seconds.
pub const MAX_TTL: u32 = 3600;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Zones answered authoritatively. The first entry is the canonical
    /// zone used for SOA and PTR target names. Reverse zones
    /// (`in-addr.arpa.`, `ip6.arpa.`) belong here too when PTR answers
    /// are wanted.
    pub zones: Vec<String>,

    /// Which node address class to serve: internal or external.
    #[serde(default = "default_address_class")]
    pub address_class: AddressClass,

    /// Fallthrough zones: `None` disables fallthrough, an empty list
    /// falls through for every in-zone miss, a non-empty list only for
    /// names under one of the listed zones.
    #[serde(default)]
    pub fallthrough: Option<Vec<String>>,

    /// TTL for DNS records in seconds, at most [`MAX_TTL`].
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Whether name-kind node addresses are expanded through the system
    /// resolver.
    #[serde(default = "default_true")]
    pub resolve_node_dns_names: bool,

    /// Kubernetes API access.
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
}

/// How to reach the Kubernetes API. All fields optional; the default is
/// in-cluster (or environment) inference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Explicit API server URL, overriding the inferred one.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Path to a kubeconfig file to use instead of inference.
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Context within the kubeconfig file.
    #[serde(default)]
    pub context: Option<String>,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "node_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

impl DnsConfig {
    /// Validate bounds and normalize zone names to FQDN form.
    pub fn validate(&mut self) -> Result<(), Error> {
        if self.zones.is_empty() {
            return Err(Error::Config("at least one zone is required".into()));
        }
        if self.ttl > MAX_TTL {
            return Err(Error::Config(format!(
                "ttl must be in range [0, {}]: {}",
                MAX_TTL, self.ttl
            )));
        }
        for zone in self.zones.iter_mut() {
            normalize_zone(zone);
        }
        if let Some(zones) = self.fallthrough.as_mut() {
            for zone in zones.iter_mut() {
                normalize_zone(zone);
            }
        }
        Ok(())
    }
}

fn normalize_zone(zone: &mut String) {
    if !zone.ends_with('.') {
        zone.push('.');
    }
}

fn default_address_class() -> AddressClass {
    AddressClass::Internal
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}
