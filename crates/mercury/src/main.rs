use std::sync::Arc;

use clap::Parser;

use tidepool_common::config::{load_config, MercuryConfig};
use tidepool_common::logging::init_logging;
use tidepool_common::oanda::OandaClient;

mod collect;
mod pipeline;
mod publisher;
mod push;
mod validate;

use pipeline::DataCollector;

/// Collects pricing data from the upstream stream and pushes it to the
/// terminus sink.
#[derive(Parser)]
#[command(name = "mercury")]
struct Args {
    /// Index of the config file to use.
    #[arg(short = 'i')]
    index: Option<u16>,

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
    let _log_guard = init_logging("mercury", args.verbose, args.debug);

    let Some(index) = args.index else {
        tracing::error!("no config file index provided, use -i to specify one");
        std::process::exit(1);
    };

    let (mut cfg, cfg_path): (MercuryConfig, _) =
        match load_config(&MercuryConfig::file_name(index)) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(error = %e, "failed to load config — refusing to start");
                std::process::exit(1);
            }
        };

    let client = match OandaClient::new(cfg.token.clone(), cfg.live) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "failed to build upstream client");
            std::process::exit(1);
        }
    };

    let account = match client.account_by_alias(&cfg.alias).await {
        Ok(account) => account,
        Err(e) => {
            tracing::error!(alias = %cfg.alias, error = %e, "failed to resolve account");
            std::process::exit(1);
        }
    };

    if !cfg.use_instruments {
        cfg.instruments = match client.instruments(&account.id).await {
            Ok(instruments) => instruments.into_iter().map(|i| i.name).collect(),
            Err(e) => {
                tracing::error!(error = %e, "failed to list instruments");
                std::process::exit(1);
            }
        };
    }

    let instrument_preview = if cfg.instruments.len() > 3 {
        format!(
            "{}, {}, {}...+{}",
            cfg.instruments[0],
            cfg.instruments[1],
            cfg.instruments[2],
            cfg.instruments.len() - 3
        )
    } else {
        cfg.instruments.join(", ")
    };
    tracing::info!(
        config = %cfg_path.display(),
        account = %cfg.alias,
        live = cfg.live,
        data_port = cfg.data_pusher.port,
        health_port = cfg.health.port,
        instruments = %instrument_preview,
        "loaded config"
    );

    let mut collector = DataCollector::new(
        client,
        account.id,
        cfg.instruments.clone(),
        &cfg,
    );

    tokio::select! {
        _ = collector.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
    }

    collector.stop().await;
    tracing::info!("stopped");
}
