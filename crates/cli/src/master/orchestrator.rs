//! Master orchestrator - wires the cluster together and runs it.

use std::future::Future;
use std::time::Instant;

use anyhow::{Context, Result};
use contracts::ClusterBlueprint;
use dispatcher::ClusterBuilder;
use observability::LifecycleAggregator;
use supervisor::{ProcessLauncher, SupervisorEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::RunStats;
use crate::error::CliError;

/// Environment variable carrying the resolved blueprint to workers
pub const BLUEPRINT_ENV: &str = "STICKY_CLUSTER_BLUEPRINT";

/// Master configuration
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Resolved, validated configuration
    pub blueprint: ClusterBlueprint,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Global flags repeated on every worker command line
    pub worker_args: Vec<String>,
}

/// The master process
pub struct Master {
    config: MasterConfig,
}

impl Master {
    pub fn new(config: MasterConfig) -> Self {
        Self { config }
    }

    /// Re-execute this binary as the worker entry point
    fn launcher(&self) -> Result<ProcessLauncher> {
        let blueprint = config_loader::ConfigLoader::to_json(&self.config.blueprint)
            .context("Failed to serialize blueprint for workers")?;

        let mut launcher = ProcessLauncher::current_exe()?;
        for arg in &self.config.worker_args {
            launcher = launcher.arg(arg);
        }
        Ok(launcher.arg("worker").env(BLUEPRINT_ENV, blueprint))
    }

    /// Serve until `shutdown` resolves, then stop every worker
    pub async fn run<F>(self, shutdown: F) -> Result<RunStats>
    where
        F: Future<Output = ()>,
    {
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let launcher = self.launcher()?;
        let cluster = ClusterBuilder::from_blueprint(launcher, &self.config.blueprint)?
            .bind()
            .await
            .context("Failed to bind public listener")?;

        info!(
            addr = %cluster.local_addr()?,
            workers = self.config.blueprint.worker_count(),
            transport = ?self.config.blueprint.broadcast.transport,
            "Cluster listening"
        );

        let lifecycle = tokio::spawn(track_lifecycle(cluster.subscribe()));
        let start_time = Instant::now();

        let report = cluster
            .run_until(shutdown)
            .await
            .map_err(|e| CliError::cluster_execution(e.to_string()))?;

        // The event channel closes once the cluster is gone
        let lifecycle = lifecycle.await.context("Lifecycle tracker panicked")?;

        Ok(RunStats {
            duration: start_time.elapsed(),
            dispatch: report.dispatch,
            held_dropped: report.held_dropped,
            lifecycle: lifecycle.summary(),
        })
    }
}

/// Fold supervisor events into a lifecycle aggregator until the cluster stops
async fn track_lifecycle(mut events: broadcast::Receiver<SupervisorEvent>) -> LifecycleAggregator {
    let mut aggregator = LifecycleAggregator::new();
    loop {
        match events.recv().await {
            Ok(event) => apply_event(&mut aggregator, &event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "lifecycle tracker lagged behind supervisor events");
            }
            Err(RecvError::Closed) => break,
        }
    }
    aggregator
}

fn apply_event(aggregator: &mut LifecycleAggregator, event: &SupervisorEvent) {
    match event {
        SupervisorEvent::Spawned {
            slot, generation, ..
        } => aggregator.on_spawn(*slot, *generation),
        SupervisorEvent::Exited {
            status, lifetime, ..
        } => aggregator.on_exit(lifetime.as_secs_f64(), status.code != Some(0)),
        SupervisorEvent::Degraded { .. } => aggregator.on_degraded(),
        SupervisorEvent::LaunchFailed { .. } => aggregator.on_launch_failure(),
    }
}
