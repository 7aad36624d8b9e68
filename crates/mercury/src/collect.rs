use std::sync::Arc;

use tidepool_common::oanda::OandaClient;
use tidepool_common::queue::WorkQueue;
use tidepool_common::scaling::{ShutdownSignal, WorkerFactory};
use tidepool_common::telemetry::StageTelemetry;

/// Build the stream-reader factory. Each worker owns one streaming HTTP
/// connection for its whole lifetime and emits one queue item per line.
///
/// A worker that loses its stream (upstream close, read error, auth
/// failure) simply exits; the supervisor's prune-and-min step replaces it
/// on the next autoscale tick.
pub fn stream_reader_factory(
    client: Arc<OandaClient>,
    account_id: String,
    instruments: Arc<Vec<String>>,
    queue: WorkQueue<String>,
    telemetry: StageTelemetry,
) -> WorkerFactory {
    Arc::new(move |shutdown| {
        let client = Arc::clone(&client);
        let account_id = account_id.clone();
        let instruments = Arc::clone(&instruments);
        let queue = queue.clone();
        let telemetry = telemetry.clone();
        Box::pin(collect_data(
            client,
            account_id,
            instruments,
            queue,
            telemetry,
            shutdown,
        ))
    })
}

async fn collect_data(
    client: Arc<OandaClient>,
    account_id: String,
    instruments: Arc<Vec<String>>,
    queue: WorkQueue<String>,
    telemetry: StageTelemetry,
    mut shutdown: ShutdownSignal,
) {
    let mut stream = match client.stream_prices(&account_id, &instruments).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "failed to open pricing stream");
            return;
        }
    };

    tracing::debug!(instruments = instruments.len(), "pricing stream opened");

    loop {
        if *shutdown.borrow() {
            return;
        }

        tokio::select! {
            _ = shutdown.changed() => return,
            line = stream.next_line() => match line {
                Ok(Some(line)) => {
                    if queue.put(line).await.is_err() {
                        return;
                    }
                    telemetry.record();
                }
                Ok(None) => {
                    tracing::info!("pricing stream closed by upstream");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "pricing stream read failed");
                    return;
                }
            }
        }
    }
}
