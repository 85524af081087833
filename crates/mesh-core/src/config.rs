use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub rate: RateSettings,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Reject values that would make the grid or the pacing meaningless.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.topology.namespaces == 0 {
            bail!("topology.namespaces must be at least 1");
        }
        if self.topology.deployments == 0 {
            bail!("topology.deployments must be at least 1");
        }
        if self.topology.replicas == 0 {
            bail!("topology.replicas must be at least 1");
        }
        if !(0.0..=100.0).contains(&self.topology.same_ns_ratio) {
            bail!(
                "topology.same_ns_ratio must be within [0, 100], got {}",
                self.topology.same_ns_ratio
            );
        }
        stats_interval(self.rate.stats_interval_secs)?;
        if self.rate.batch_size == 0 {
            bail!("rate.batch_size must be at least 1");
        }
        if self.rate.connections_per_interval == Some(0) {
            bail!("rate.connections_per_interval must be at least 1");
        }
        if self.retry.attempts == 0 {
            bail!("retry.attempts must be at least 1");
        }
        Ok(())
    }

    /// Resolve the rate section into the immutable pacing parameters.
    pub fn rate_config(&self) -> anyhow::Result<RateConfig> {
        self.validate()?;
        let connections_per_interval = match self.rate.connections_per_interval {
            Some(n) => n,
            None => match self.rate.total_connections {
                Some(total) => {
                    let instances = self
                        .topology
                        .instance_count()
                        .context("namespaces x deployments x replicas overflows")?;
                    per_instance_connections(total, instances)
                }
                None => DEFAULT_CONNECTIONS_PER_INTERVAL,
            },
        };
        Ok(RateConfig {
            stats_interval: stats_interval(self.rate.stats_interval_secs)?,
            connections_per_interval,
            batch_size: self.rate.batch_size,
        })
    }
}

const DEFAULT_CONNECTIONS_PER_INTERVAL: u64 = 100;

/// Convert the configured interval, rejecting anything that is not a
/// representable, non-zero `Duration`.
fn stats_interval(secs: f64) -> anyhow::Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(interval) if !interval.is_zero() => Ok(interval),
        _ => bail!("rate.stats_interval_secs must be a positive number of seconds, got {secs}"),
    }
}

/// Split a cluster-wide connection budget evenly across all instances,
/// never dropping an instance below one connection per interval.
pub fn per_instance_connections(total: u64, instances: u64) -> u64 {
    if instances == 0 {
        return total.max(1);
    }
    (total / instances).max(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Assigned instance name; falls back to the HOSTNAME environment variable
    #[serde(default)]
    pub name: Option<String>,
    /// Address the inbound responder binds to
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: None,
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Number of namespaces in the grid (gc-ns-1 .. gc-ns-N)
    #[serde(default = "default_namespaces")]
    pub namespaces: u32,
    /// Number of deployments per namespace
    #[serde(default = "default_deployments")]
    pub deployments: u32,
    /// Percentage of requests sent to the same namespace, next deployment
    #[serde(default = "default_same_ns_ratio")]
    pub same_ns_ratio: f64,
    /// Replicas per deployment, only used to split `rate.total_connections`
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

impl TopologyConfig {
    pub fn instance_count(&self) -> Option<u64> {
        (self.namespaces as u64)
            .checked_mul(self.deployments as u64)?
            .checked_mul(self.replicas as u64)
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            namespaces: default_namespaces(),
            deployments: default_deployments(),
            same_ns_ratio: default_same_ns_ratio(),
            replicas: default_replicas(),
        }
    }
}

fn default_namespaces() -> u32 {
    10
}

fn default_deployments() -> u32 {
    5
}

fn default_same_ns_ratio() -> f64 {
    50.0
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSettings {
    /// Statistics logging interval in seconds
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: f64,
    /// Connections this instance sends per stats interval
    #[serde(default)]
    pub connections_per_interval: Option<u64>,
    /// Cluster-wide connections per stats interval, split across all instances
    #[serde(default)]
    pub total_connections: Option<u64>,
    /// Concurrent requests per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            stats_interval_secs: default_stats_interval_secs(),
            connections_per_interval: None,
            total_connections: None,
            batch_size: default_batch_size(),
        }
    }
}

fn default_stats_interval_secs() -> f64 {
    10.0
}

fn default_batch_size() -> u32 {
    5
}

/// Resolved, immutable pacing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateConfig {
    pub stats_interval: Duration,
    pub connections_per_interval: u64,
    pub batch_size: u32,
}

impl RateConfig {
    /// Wall-clock budget for a single request.
    pub fn target_cycle_time(&self) -> Duration {
        self.stats_interval
            .div_f64(self.connections_per_interval.max(1) as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per request, including the first one
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Delay between attempts in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Port every simulated service listens on
    #[serde(default = "default_service_port")]
    pub service_port: u16,
    /// DNS suffix appended after the target namespace
    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,
    /// Send every request to this host instead of the canonical service name
    #[serde(default)]
    pub host_override: Option<String>,
    /// Per-request client timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            service_port: default_service_port(),
            cluster_domain: default_cluster_domain(),
            host_override: None,
            timeout_ms: None,
        }
    }
}

fn default_service_port() -> u16 {
    8000
}

fn default_cluster_domain() -> String {
    "svc.cluster.local".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Seed for the routing RNG; entropy-seeded when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serde() {
        let config_str = r#"
[node]
name = "gc-ns-2-rs-3-abcde"
bind = "127.0.0.1:9000"

[topology]
namespaces = 4
deployments = 3
same_ns_ratio = 30.0

[rate]
stats_interval_secs = 5.0
connections_per_interval = 50
batch_size = 10

[retry]
attempts = 2
delay_ms = 250

[target]
service_port = 9000
host_override = "127.0.0.1"

[scenario]
seed = 42
        "#;

        let config: Config = toml::from_str(config_str).unwrap();
        assert_eq!(config.node.name.as_deref(), Some("gc-ns-2-rs-3-abcde"));
        assert_eq!(config.topology.namespaces, 4);
        assert_eq!(config.topology.same_ns_ratio, 30.0);
        assert_eq!(config.rate.batch_size, 10);
        assert_eq!(config.retry.delay_ms, 250);
        assert_eq!(config.target.cluster_domain, "svc.cluster.local");
        assert_eq!(config.target.host_override.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.scenario.seed, Some(42));

        let rate = config.rate_config().unwrap();
        assert_eq!(rate.connections_per_interval, 50);
        assert_eq!(rate.target_cycle_time(), Duration::from_millis(100));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.node.bind, "0.0.0.0:8000");
        assert_eq!(config.topology.namespaces, 10);
        assert_eq!(config.topology.deployments, 5);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.target.service_port, 8000);

        let rate = config.rate_config().unwrap();
        assert_eq!(rate.stats_interval, Duration::from_secs(10));
        assert_eq!(rate.connections_per_interval, 100);
        assert_eq!(rate.batch_size, 5);
    }

    #[test]
    fn test_total_connections_split_across_grid() {
        let config: Config = toml::from_str(
            r#"
[topology]
namespaces = 10
deployments = 5
replicas = 2

[rate]
total_connections = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_config().unwrap().connections_per_interval, 10);
        assert_eq!(per_instance_connections(3, 100), 1);
    }

    #[test]
    fn test_example_configs_parse() {
        let local: Config = toml::from_str(include_str!("../../../config/example.local.toml")).unwrap();
        assert_eq!(local.target.host_override.as_deref(), Some("127.0.0.1"));
        assert!(local.validate().is_ok());

        let cluster: Config =
            toml::from_str(include_str!("../../../config/example.cluster.toml")).unwrap();
        assert!(cluster.node.name.is_none());
        assert_eq!(cluster.rate_config().unwrap().connections_per_interval, 100);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.topology.same_ns_ratio = 101.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate.stats_interval_secs = 0.0;
        assert!(config.rate_config().is_err());

        // Rounds down to a zero-length interval
        let mut config = Config::default();
        config.rate.stats_interval_secs = 1e-10;
        assert!(config.validate().is_err());
        assert!(config.rate_config().is_err());

        // Too large for a Duration
        let mut config = Config::default();
        config.rate.stats_interval_secs = 1e30;
        assert!(config.validate().is_err());
        assert!(config.rate_config().is_err());

        for bad in [f64::NAN, f64::INFINITY, -1.0] {
            let mut config = Config::default();
            config.rate.stats_interval_secs = bad;
            assert!(config.validate().is_err(), "{bad} accepted");
        }

        let mut config = Config::default();
        config.rate.stats_interval_secs = 0.5;
        assert_eq!(
            config.rate_config().unwrap().stats_interval,
            Duration::from_millis(500)
        );

        let mut config = Config::default();
        config.topology.deployments = 0;
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }
}
