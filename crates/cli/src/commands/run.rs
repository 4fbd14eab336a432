//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::{ClusterBlueprint, RestartPolicy};
use tracing::{info, warn};

use crate::cli::{Cli, RunArgs};
use crate::error::CliError;
use crate::master::{Master, MasterConfig};

/// Execute the `run` command
pub async fn run_cluster(args: &RunArgs, cli: &Cli) -> Result<()> {
    let blueprint = resolve_blueprint(args)?;

    info!(
        host = %blueprint.server.host,
        port = blueprint.server.port,
        workers = blueprint.worker_count(),
        transport = ?blueprint.broadcast.transport,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let master = Master::new(MasterConfig {
        blueprint,
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
        worker_args: cli.worker_args(),
    });

    info!("Starting cluster...");
    let stats = master.run(shutdown_signal()).await?;

    info!(
        routed = stats.dispatch.routed,
        dropped = stats.dispatch.dropped,
        spawns = stats.lifecycle.total_spawns,
        duration_secs = stats.duration.as_secs_f64(),
        "Cluster stopped"
    );
    stats.print_summary();

    Ok(())
}

/// Load the configuration file (or defaults) and apply CLI overrides
pub(crate) fn resolve_blueprint(args: &RunArgs) -> Result<ClusterBlueprint> {
    let mut blueprint = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration");
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()).into());
            }
            config_loader::ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => {
            info!("No configuration file given, using defaults");
            ClusterBlueprint::default()
        }
    };

    if let Some(ref host) = args.host {
        info!(host = %host, "Overriding listen host from CLI");
        blueprint.server.host = host.clone();
    }
    if let Some(port) = args.port {
        info!(port, "Overriding listen port from CLI");
        blueprint.server.port = port;
    }
    if let Some(workers) = args.workers {
        info!(workers, "Overriding worker count from CLI");
        blueprint.workers.count = Some(workers);
    }
    if let Some(transport) = args.broadcast_transport {
        info!(transport = ?transport, "Overriding broadcast transport from CLI");
        blueprint.broadcast.transport = transport.into();
    }
    if let Some(ref host) = args.broadcast_host {
        info!(host = %host, "Overriding broadcast host from CLI");
        blueprint.broadcast.host = host.clone();
    }
    if let Some(port) = args.broadcast_port {
        info!(port, "Overriding broadcast port from CLI");
        blueprint.broadcast.port = port;
    }

    // Overrides bypass the loader, so validate again
    config_loader::ConfigLoader::validate(&blueprint)
        .map_err(|e| CliError::config_validation(e.to_string()))?;

    if matches!(blueprint.broadcast.transport, contracts::TransportKind::Local)
        && blueprint.worker_count() > 1
    {
        warn!("Local broadcast transport with several workers: broadcasts stay inside each worker");
    }

    Ok(blueprint)
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("Received shutdown signal, stopping cluster...");
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &ClusterBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Listen: {}:{}", blueprint.server.host, blueprint.server.port);
    println!(
        "Workers: {} (local host {})",
        blueprint.worker_count(),
        blueprint.workers.local_host
    );
    match &blueprint.supervisor.restart {
        RestartPolicy::Immediate => println!("Restart: immediate"),
        RestartPolicy::Backoff(backoff) => println!(
            "Restart: backoff {}ms..{}ms x{}, degraded after {} failures",
            backoff.initial_delay_ms,
            backoff.max_delay_ms,
            backoff.multiplier,
            backoff.failure_threshold
        ),
    }
    println!("Transfer policy: {:?}", blueprint.dispatcher.transfer_policy);
    println!(
        "Broadcast: {:?} at {}:{} topics {:?}",
        blueprint.broadcast.transport,
        blueprint.broadcast.host,
        blueprint.broadcast.port,
        blueprint.broadcast.topics
    );
    println!();
}
