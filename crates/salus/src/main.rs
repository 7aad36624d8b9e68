use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use tidepool_common::config::{load_config, SalusConfig};
use tidepool_common::health::health_port;
use tidepool_common::logging::init_logging;

mod collection;
mod monitor;
mod status;

use monitor::{monitor_collector, SharedCollections};
use status::{actions_per_second, status};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Watches the health streams of every collector and reports per-collector
/// status and throughput.
#[derive(Parser)]
#[command(name = "salus")]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let _log_guard = init_logging("salus", args.verbose, args.debug);

    let (cfg, cfg_path): (SalusConfig, _) = match load_config(SalusConfig::FILE_NAME) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config — refusing to start");
            std::process::exit(1);
        }
    };

    tracing::info!(
        config = %cfg_path.display(),
        host = %cfg.host,
        indices = ?cfg.indices,
        window = cfg.window,
        "loaded config"
    );

    let collections: SharedCollections = Arc::new(RwLock::new(HashMap::new()));

    let mut monitors: Vec<(JoinHandle<()>, watch::Sender<bool>)> = Vec::new();
    for &index in &cfg.indices {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor_collector(
            cfg.host.clone(),
            health_port(index),
            Arc::clone(&collections),
            shutdown_rx,
        ));
        monitors.push((handle, shutdown_tx));
    }

    tokio::select! {
        _ = report_loop(&cfg, &collections) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
    }

    for (handle, shutdown_tx) in monitors {
        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }
    tracing::info!("stopped");
}

/// Emit per-collector status and stage throughput on a fixed cadence.
async fn report_loop(cfg: &SalusConfig, collections: &SharedCollections) {
    loop {
        tokio::time::sleep(REPORT_INTERVAL).await;

        let collections = collections.read().await;
        for &index in &cfg.indices {
            let collection = collections.get(&health_port(index));
            let collector_status = status(collection);

            let (collected, validated, pushed) = match collection {
                Some(collection) => (
                    actions_per_second(
                        collection,
                        |s| s.data_collector.action_count as f64,
                        cfg.window,
                    ),
                    actions_per_second(
                        collection,
                        |s| s.data_validator.action_count as f64,
                        cfg.window,
                    ),
                    actions_per_second(
                        collection,
                        |s| s.data_pusher.action_count as f64,
                        cfg.window,
                    ),
                ),
                None => (0.0, 0.0, 0.0),
            };

            tracing::info!(
                collector = index,
                code = collector_status.code,
                status = %collector_status.message,
                collected_per_s = %format!("{collected:.2}"),
                validated_per_s = %format!("{validated:.2}"),
                pushed_per_s = %format!("{pushed:.2}"),
                "collector status"
            );
        }
    }
}
