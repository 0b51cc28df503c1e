use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::history::retention::RetentionConfig;
use crate::history::writer::HistoryWriterConfig;
use crate::hub::HubConfig;
use crate::sampler::SamplerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    #[serde(default = "default_flush_rate")]
    pub flush_rate: u64,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Max rows deleted by one retention sweep transaction.
    #[serde(default = "default_sweep_batch_limit")]
    pub sweep_batch_limit: u32,
    #[serde(default = "default_write_retry_attempts")]
    pub write_retry_attempts: u32,
    #[serde(default = "default_write_retry_backoff_ms")]
    pub write_retry_backoff_ms: u64,
    /// Cron expression with seconds field (e.g. "0 0 3 * * *" = 03:00 daily), local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

fn default_flush_rate() -> u64 {
    10
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_retention_hours() -> u32 {
    24
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_sweep_batch_limit() -> u32 {
    50_000
}

fn default_write_retry_attempts() -> u32 {
    3
}

fn default_write_retry_backoff_ms() -> u64 {
    200
}

fn default_vacuum_interval_secs() -> u64 {
    24 * 3600
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval_ms: u64,
    pub jitter_ms: u64,
    pub timeout_ms: u64,
    pub failure_threshold: u32,
    pub max_backoff_ms: u64,
    /// Ingress channel depth between samplers and the aggregator.
    pub ingress_capacity: usize,
    /// Per-source base interval, keyed by source id (e.g. "containers" = 2000).
    pub interval_overrides_ms: HashMap<String, u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            jitter_ms: 250,
            timeout_ms: 3000,
            failure_threshold: 5,
            max_backoff_ms: 60_000,
            ingress_capacity: 256,
            interval_overrides_ms: HashMap::new(),
        }
    }
}

impl SamplingConfig {
    pub fn sampler_config(&self, source_id: &str) -> SamplerConfig {
        let interval_ms = self
            .interval_overrides_ms
            .get(source_id)
            .copied()
            .unwrap_or(self.interval_ms);
        SamplerConfig {
            interval: Duration::from_millis(interval_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            failure_threshold: self.failure_threshold,
            max_interval: Duration::from_millis(self.max_backoff_ms.max(interval_ms)),
        }
    }
}

/// Backend for the containers source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerBackend {
    /// Docker Engine API if the socket answers a ping, else the CLI.
    #[default]
    Auto,
    Api,
    Cli,
    Disabled,
}

/// Backend for the host source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostBackend {
    #[default]
    Auto,
    Sysinfo,
    Procfs,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSource {
    pub name: String,
    pub path: String,
    #[serde(default = "default_log_lines")]
    pub lines: usize,
}

fn default_log_lines() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub containers: ContainerBackend,
    pub docker_binary: String,
    pub host: HostBackend,
    /// Mount point reported by the procfs host backend.
    pub disk_mount: String,
    pub port_host: String,
    pub ports: Vec<u16>,
    pub port_timeout_ms: u64,
    pub services: Vec<String>,
    pub systemctl_binary: String,
    pub logs: Vec<LogSource>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            containers: ContainerBackend::Auto,
            docker_binary: "docker".into(),
            host: HostBackend::Auto,
            disk_mount: "/".into(),
            port_host: "127.0.0.1".into(),
            ports: Vec::new(),
            port_timeout_ms: 500,
            services: Vec::new(),
            systemctl_binary: "systemctl".into(),
            logs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Outbound queue depth per viewer before updates coalesce into a resync marker.
    pub queue_depth: usize,
    pub heartbeat_interval_secs: u64,
    /// Consecutive unanswered heartbeats before a viewer is evicted.
    pub missed_heartbeats: u32,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_depth: 32,
            heartbeat_interval_secs: 15,
            missed_heartbeats: 3,
        }
    }
}

impl HubSettings {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_depth: self.queue_depth,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            missed_heartbeats: self.missed_heartbeats,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// How often to log app stats (viewers, samples, history counters) at INFO level.
    pub stats_log_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            stats_log_interval_secs: 60,
        }
    }
}

impl DatabaseConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours as u64 * 3600)
    }

    pub fn writer_config(&self) -> HistoryWriterConfig {
        HistoryWriterConfig {
            flush_rate: self.flush_rate as usize,
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            retry_attempts: self.write_retry_attempts,
            retry_backoff: Duration::from_millis(self.write_retry_backoff_ms),
        }
    }

    pub fn retention_config(&self) -> RetentionConfig {
        RetentionConfig {
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            vacuum_schedule: self.vacuum_schedule.clone(),
            vacuum_interval: Duration::from_secs(self.vacuum_interval_secs),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.flush_rate > 0,
            "database.flush_rate must be > 0, got {}",
            self.database.flush_rate
        );
        anyhow::ensure!(
            self.database.flush_interval_secs > 0,
            "database.flush_interval_secs must be > 0, got {}",
            self.database.flush_interval_secs
        );
        anyhow::ensure!(
            self.database.retention_hours > 0,
            "database.retention_hours must be > 0, got {}",
            self.database.retention_hours
        );
        anyhow::ensure!(
            self.database.sweep_interval_secs > 0,
            "database.sweep_interval_secs must be > 0, got {}",
            self.database.sweep_interval_secs
        );
        anyhow::ensure!(
            self.database.sweep_batch_limit > 0,
            "database.sweep_batch_limit must be > 0, got {}",
            self.database.sweep_batch_limit
        );
        anyhow::ensure!(
            self.database.write_retry_attempts > 0,
            "database.write_retry_attempts must be > 0, got {}",
            self.database.write_retry_attempts
        );
        anyhow::ensure!(
            self.database.vacuum_interval_secs > 0,
            "database.vacuum_interval_secs must be > 0, got {}",
            self.database.vacuum_interval_secs
        );
        if let Some(schedule) = &self.database.vacuum_schedule {
            cron::Schedule::from_str(schedule).map_err(|e| {
                anyhow::anyhow!("database.vacuum_schedule {:?} is invalid: {}", schedule, e)
            })?;
        }
        anyhow::ensure!(
            self.sampling.interval_ms > 0,
            "sampling.interval_ms must be > 0, got {}",
            self.sampling.interval_ms
        );
        anyhow::ensure!(
            self.sampling.timeout_ms > 0,
            "sampling.timeout_ms must be > 0, got {}",
            self.sampling.timeout_ms
        );
        anyhow::ensure!(
            self.sampling.failure_threshold > 0,
            "sampling.failure_threshold must be > 0, got {}",
            self.sampling.failure_threshold
        );
        anyhow::ensure!(
            self.sampling.ingress_capacity > 0,
            "sampling.ingress_capacity must be > 0, got {}",
            self.sampling.ingress_capacity
        );
        for (source_id, ms) in &self.sampling.interval_overrides_ms {
            anyhow::ensure!(
                *ms > 0,
                "sampling.interval_overrides_ms.{} must be > 0",
                source_id
            );
        }
        anyhow::ensure!(
            self.sources.port_timeout_ms > 0,
            "sources.port_timeout_ms must be > 0, got {}",
            self.sources.port_timeout_ms
        );
        for log in &self.sources.logs {
            anyhow::ensure!(
                !log.name.is_empty() && !log.path.is_empty(),
                "sources.logs entries need a name and a path"
            );
        }
        anyhow::ensure!(
            self.hub.queue_depth > 0,
            "hub.queue_depth must be > 0, got {}",
            self.hub.queue_depth
        );
        anyhow::ensure!(
            self.hub.heartbeat_interval_secs > 0,
            "hub.heartbeat_interval_secs must be > 0, got {}",
            self.hub.heartbeat_interval_secs
        );
        anyhow::ensure!(
            self.hub.missed_heartbeats > 0,
            "hub.missed_heartbeats must be > 0, got {}",
            self.hub.missed_heartbeats
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        Ok(())
    }
}
