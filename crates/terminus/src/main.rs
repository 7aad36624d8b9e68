use clap::Parser;

use tidepool_common::config::{load_config, TerminusConfig};
use tidepool_common::logging::init_logging;

mod dedupe;
mod intake;
mod packet;
mod pipeline;
mod process;
mod record;

use pipeline::DbPipeline;

/// Receives collector output, deduplicates it, and records it in the
/// document store.
#[derive(Parser)]
#[command(name = "terminus")]
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
    let _log_guard = init_logging("terminus", args.verbose, args.debug);

    let (cfg, cfg_path): (TerminusConfig, _) = match load_config(TerminusConfig::FILE_NAME) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config — refusing to start");
            std::process::exit(1);
        }
    };

    tracing::info!(
        config = %cfg_path.display(),
        intake_ports = ?cfg.data_intake_ports,
        db_host = %cfg.db_host,
        db_port = cfg.db_port,
        dedupe_raw = cfg.dedupe_raw,
        "loaded config"
    );

    let mut pipeline = DbPipeline::new(&cfg);

    tokio::select! {
        _ = pipeline.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
    }

    pipeline.stop().await;
    tracing::info!("stopped");
}
