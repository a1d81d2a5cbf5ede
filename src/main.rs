use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use broker_failover::config::{self, Config};
use broker_failover::health::{FailoverController, HealthCheckLoop};
use broker_failover::metrics::start_metrics_server;
use broker_failover::registry::{
    MemoryCoordination, MemoryMachineRegistry, MemoryMigrator, StaticLeader,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = load_or_default_config();

    if let Some(addr) = config.metrics.listen_addr.clone() {
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&addr).await {
                error!(addr = %addr, error = %e, "Metrics server stopped");
            }
        });
    }

    if !config.failover.enabled {
        info!("Heartbeat checks are disabled");
        return Ok(());
    }

    // Standalone cluster held in memory
    let coordination = Arc::new(MemoryCoordination::new());
    for worker in &config.cluster.workers {
        coordination.register(worker);
    }
    let leader = Arc::new(StaticLeader::new(config.cluster.leader));
    let machines = Arc::new(MemoryMachineRegistry::new());
    let migrator = Arc::new(MemoryMigrator::new());

    info!(
        workers = config.cluster.workers.len(),
        leader = config.cluster.leader,
        detection_secs = config.failover.detection_latency().as_secs(),
        "Broker failover checker configured"
    );

    let controller = FailoverController::new(coordination.clone(), machines, migrator);
    let checker = HealthCheckLoop::new(coordination, leader, controller, config.failover.clone());

    let shutdown = CancellationToken::new();
    let handle = checker.start(shutdown.clone());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    shutdown.cancel();
    handle.await?;

    Ok(())
}

fn load_or_default_config() -> Config {
    // Try to load from config file
    let config_paths = ["config/failover.toml", "failover.toml"];

    for path in config_paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path = path, "Loaded configuration");
                return config;
            }
            Err(e) => {
                warn!(path = path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    Config::default()
}
