use std::sync::Arc;

use zeromq::{PushSocket, Socket, SocketSend};

use tidepool_common::error::TidepoolError;
use tidepool_common::queue::{WorkQueue, GET_TIMEOUT};
use tidepool_common::scaling::{ShutdownSignal, WorkerFactory};
use tidepool_common::telemetry::StageTelemetry;

/// Build the pusher factory. Each worker binds its own PUSH socket on the
/// data port; a bind failure is fatal to that worker only (the supervisor
/// keeps retrying through its prune-and-min step).
pub fn pusher_factory(
    queue: WorkQueue<String>,
    port: u16,
    telemetry: StageTelemetry,
) -> WorkerFactory {
    Arc::new(move |shutdown| {
        let queue = queue.clone();
        let telemetry = telemetry.clone();
        Box::pin(push_data(queue, port, telemetry, shutdown))
    })
}

async fn push_data(
    queue: WorkQueue<String>,
    port: u16,
    telemetry: StageTelemetry,
    mut shutdown: ShutdownSignal,
) {
    let endpoint = format!("tcp://0.0.0.0:{port}");
    let mut socket = PushSocket::new();
    if let Err(e) = socket.bind(&endpoint).await {
        tracing::error!(endpoint = %endpoint, error = %e, "failed to bind data socket");
        return;
    }
    tracing::info!(port, "output data socket bound");

    loop {
        if *shutdown.borrow() {
            return;
        }

        let item = match queue.get(GET_TIMEOUT).await {
            Ok(item) => item,
            Err(TidepoolError::Empty) => continue,
            Err(_) => return,
        };

        // Transient send failure drops the one frame; the worker stays up.
        if let Err(e) = socket.send(item.into()).await {
            tracing::error!(error = %e, "failed to send data frame");
            continue;
        }
        telemetry.record();
    }
}
