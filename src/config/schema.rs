use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Heartbeat check / failover settings
    #[serde(default)]
    pub failover: FailoverConfig,
    /// Seed for the standalone in-memory cluster
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Prometheus endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Address to serve `/metrics` on; disabled when unset
    #[serde(default)]
    pub listen_addr: Option<String>,
}

// ============================================================================
// Failover Configuration
// ============================================================================

/// Heartbeat check configuration for the master process
#[derive(Debug, Clone, Deserialize)]
pub struct FailoverConfig {
    /// Whether the check loop is started at all
    #[serde(default = "default_failover_enabled")]
    pub enabled: bool,
    /// Delay between the end of one tick and the start of the next (seconds)
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,
    /// Suspicious ticks tolerated before a worker is failed over
    #[serde(default = "default_failure_threshold_ticks")]
    pub failure_threshold_ticks: u32,
    /// Sequence a live worker publishes to opt out of health checking
    #[serde(default = "default_stopped_sequence_sentinel")]
    pub stopped_sequence_sentinel: i64,
    /// Emit a progress line every N leader ticks (0 disables)
    #[serde(default = "default_progress_log_every_ticks")]
    pub progress_log_every_ticks: u64,
}

fn default_failover_enabled() -> bool {
    true
}

fn default_check_interval_seconds() -> u64 {
    2
}

fn default_failure_threshold_ticks() -> u32 {
    30
}

fn default_stopped_sequence_sentinel() -> i64 {
    -1
}

fn default_progress_log_every_ticks() -> u64 {
    5
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: default_failover_enabled(),
            check_interval_seconds: default_check_interval_seconds(),
            failure_threshold_ticks: default_failure_threshold_ticks(),
            stopped_sequence_sentinel: default_stopped_sequence_sentinel(),
            progress_log_every_ticks: default_progress_log_every_ticks(),
        }
    }
}

impl FailoverConfig {
    /// Tick period as a Duration
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    /// Approximate time from first suspicious tick to failover
    pub fn detection_latency(&self) -> Duration {
        self.check_interval() * (self.failure_threshold_ticks + 1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "check_interval_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Standalone Cluster Seed
// ============================================================================

/// In-memory cluster used when no external registry is wired in
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Whether this process considers itself the leader
    #[serde(default = "default_leader")]
    pub leader: bool,
    /// Worker ids registered at startup
    #[serde(default)]
    pub workers: Vec<String>,
}

fn default_leader() -> bool {
    true
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            leader: default_leader(),
            workers: Vec::new(),
        }
    }
}
