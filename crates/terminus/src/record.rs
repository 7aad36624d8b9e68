use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::Document;
use mongodb::options::ClientOptions;
use mongodb::Client;

use tidepool_common::error::TidepoolError;
use tidepool_common::queue::{WorkQueue, GET_TIMEOUT};
use tidepool_common::scaling::{ShutdownSignal, WorkerFactory};
use tidepool_common::telemetry::StageTelemetry;

use crate::packet::DbPacket;

const DATABASE: &str = "tidepool";
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(1);
const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Build the recorder factory. Each worker owns its own client connection
/// to the document store; a worker that cannot connect exits and is
/// respawned by the supervisor.
pub fn recorder_factory(
    write_queue: WorkQueue<DbPacket>,
    connection_string: String,
    telemetry: StageTelemetry,
) -> WorkerFactory {
    Arc::new(move |shutdown| {
        let write_queue = write_queue.clone();
        let connection_string = connection_string.clone();
        let telemetry = telemetry.clone();
        Box::pin(write_data(
            write_queue,
            connection_string,
            telemetry,
            shutdown,
        ))
    })
}

async fn connect(connection_string: &str) -> tidepool_common::Result<Client> {
    let mut options = ClientOptions::parse(connection_string)
        .await
        .map_err(|e| TidepoolError::Database(e.to_string()))?;
    options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
    Client::with_options(options).map_err(|e| TidepoolError::Database(e.to_string()))
}

async fn write_data(
    write_queue: WorkQueue<DbPacket>,
    connection_string: String,
    telemetry: StageTelemetry,
    mut shutdown: ShutdownSignal,
) {
    let client = match connect(&connection_string).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to document store");
            return;
        }
    };
    tracing::info!("connected to document store");

    let db = client.database(DATABASE);
    let mut written: u64 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let packet = match write_queue.get(GET_TIMEOUT).await {
            Ok(packet) => packet,
            Err(TidepoolError::Empty) => continue,
            Err(_) => return,
        };

        tracing::debug!(dest = %packet.dest, "writing document");
        let collection = db.collection::<Document>(&packet.dest);
        if let Err(e) = collection.insert_one(packet.data).await {
            // Transient write failure drops the one packet; the worker
            // stays up.
            tracing::error!(dest = %packet.dest, error = %e, "failed to write document");
            continue;
        }

        written += 1;
        if written % PROGRESS_LOG_INTERVAL == 0 {
            tracing::info!(written, "documents written");
        }
        telemetry.record();
    }
}
