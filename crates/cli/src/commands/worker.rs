//! Hidden `worker` command - the process the master re-executes per slot.

use anyhow::Result;
use config_loader::{ConfigFormat, ConfigLoader};
use control_channel::ControlReceiver;
use fanout::Fanout;
use tracing::{debug, info, info_span, Instrument};
use worker::{LineChat, LocalServer, WorkerRuntime, CHAT_TOPIC};

use crate::cli::WorkerArgs;
use crate::error::CliError;

/// Execute the `worker` command
pub async fn run_worker(args: &WorkerArgs) -> Result<()> {
    let blueprint = ConfigLoader::load_from_str(&args.blueprint, ConfigFormat::Json)
        .map_err(|e| CliError::worker_environment(format!("bad blueprint: {e}")))?;

    let slot_count = blueprint.worker_count();
    if args.slot >= slot_count {
        return Err(CliError::worker_environment(format!(
            "slot {} outside a pool of {}",
            args.slot, slot_count
        ))
        .into());
    }

    let span = info_span!("worker", slot = args.slot, pid = std::process::id());
    async move {
        // An interactive Ctrl-C reaches the whole process group; the master
        // decides when workers stop.
        tokio::spawn(async {
            while tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupt ignored, waiting for the master");
            }
        });

        let control = ControlReceiver::from_inherited()
            .map_err(|e| CliError::worker_environment(e.to_string()))?;
        let server = LocalServer::bind(blueprint.worker_local_addr()?).await?;

        let fanout = Fanout::from_config(&blueprint.broadcast);

        let topic = blueprint
            .broadcast
            .topics
            .first()
            .map_or(CHAT_TOPIC, String::as_str);
        let runtime = WorkerRuntime::new(args.slot, LineChat::new(topic), fanout)
            .topics(blueprint.broadcast.topics.clone());

        let report = runtime.run(server, control).await?;
        info!(%report, "Worker finished");
        Ok::<_, anyhow::Error>(())
    }
    .instrument(span)
    .await
}
