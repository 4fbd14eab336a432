//! `info` command implementation.

use std::net::IpAddr;

use anyhow::{Context, Result};
use contracts::{ClusterBlueprint, RestartPolicy};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    server: ServerInfo,
    workers: WorkersInfo,
    restart: RestartInfo,
    transfer_policy: String,
    broadcast: BroadcastInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    routes: Vec<RouteInfo>,
}

#[derive(Serialize)]
struct ServerInfo {
    host: String,
    port: u16,
}

#[derive(Serialize)]
struct WorkersInfo {
    count: usize,
    count_configured: bool,
    local_host: String,
    shutdown_grace_ms: u64,
}

#[derive(Serialize)]
struct RestartInfo {
    policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    initial_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_threshold: Option<u32>,
}

#[derive(Serialize)]
struct BroadcastInfo {
    transport: String,
    endpoint: String,
    topics: Vec<String>,
    channel_capacity: usize,
}

#[derive(Serialize)]
struct RouteInfo {
    address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    slot: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let info = build_config_info(&blueprint, args);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn build_config_info(blueprint: &ClusterBlueprint, args: &InfoArgs) -> ConfigInfo {
    let slot_count = blueprint.worker_count();
    let restart = match &blueprint.supervisor.restart {
        RestartPolicy::Immediate => RestartInfo {
            policy: "immediate".to_string(),
            initial_delay_ms: None,
            max_delay_ms: None,
            failure_threshold: None,
        },
        RestartPolicy::Backoff(backoff) => RestartInfo {
            policy: "backoff".to_string(),
            initial_delay_ms: Some(backoff.initial_delay_ms),
            max_delay_ms: Some(backoff.max_delay_ms),
            failure_threshold: Some(backoff.failure_threshold),
        },
    };

    let routes = args
        .route
        .iter()
        .map(|address| match address.parse::<IpAddr>() {
            Ok(ip) => RouteInfo {
                address: address.clone(),
                slot: Some(router::route_ip(ip, slot_count)),
                error: None,
            },
            Err(e) => RouteInfo {
                address: address.clone(),
                slot: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        server: ServerInfo {
            host: blueprint.server.host.clone(),
            port: blueprint.server.port,
        },
        workers: WorkersInfo {
            count: slot_count,
            count_configured: blueprint.workers.count.is_some(),
            local_host: blueprint.workers.local_host.clone(),
            shutdown_grace_ms: blueprint.workers.shutdown_grace_ms,
        },
        restart,
        transfer_policy: format!("{:?}", blueprint.dispatcher.transfer_policy),
        broadcast: BroadcastInfo {
            transport: format!("{:?}", blueprint.broadcast.transport),
            endpoint: blueprint.broadcast.redis_url(),
            topics: blueprint.broadcast.topics.clone(),
            channel_capacity: blueprint.broadcast.channel_capacity,
        },
        routes,
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("\n=== Cluster Configuration ===\n");
    println!("Version: {}", info.version);
    println!("Listen: {}:{}", info.server.host, info.server.port);

    println!("\nWorkers:");
    println!(
        "  Count: {}{}",
        info.workers.count,
        if info.workers.count_configured {
            ""
        } else {
            " (available parallelism)"
        }
    );
    println!("  Local host: {}", info.workers.local_host);
    println!("  Shutdown grace: {}ms", info.workers.shutdown_grace_ms);

    println!("\nSupervision:");
    println!("  Restart: {}", info.restart.policy);
    if let (Some(initial), Some(max)) = (info.restart.initial_delay_ms, info.restart.max_delay_ms)
    {
        println!("  Delay: {}ms..{}ms", initial, max);
    }
    if let Some(threshold) = info.restart.failure_threshold {
        println!("  Degraded after: {} rapid failures", threshold);
    }
    println!("  Transfer policy: {}", info.transfer_policy);

    println!("\nBroadcast:");
    println!("  Transport: {}", info.broadcast.transport);
    println!("  Endpoint: {}", info.broadcast.endpoint);
    println!("  Topics: {:?}", info.broadcast.topics);
    println!("  Channel capacity: {}", info.broadcast.channel_capacity);

    if !info.routes.is_empty() {
        println!("\nRouting:");
        for route in &info.routes {
            match (&route.slot, &route.error) {
                (Some(slot), _) => println!("  {} -> slot {}", route.address, slot),
                (None, Some(error)) => println!("  {} -> error: {}", route.address, error),
                (None, None) => {}
            }
        }
    }

    println!();
}
