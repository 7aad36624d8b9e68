use std::time::Duration;

use zeromq::{PullSocket, Socket, SocketRecv};

use tidepool_common::queue::WorkQueue;
use tidepool_common::scaling::ShutdownSignal;
use tidepool_common::telemetry::StageTelemetry;

/// Recv timeout so the task can notice shutdown between frames.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Intake task for one collector data port. Connects a PULL socket and
/// pushes every received frame into the shared raw queue.
pub async fn read_data(
    port: u16,
    queue: WorkQueue<String>,
    telemetry: StageTelemetry,
    mut shutdown: ShutdownSignal,
) {
    let endpoint = format!("tcp://127.0.0.1:{port}");
    let mut socket = PullSocket::new();
    if let Err(e) = socket.connect(&endpoint).await {
        tracing::error!(endpoint = %endpoint, error = %e, "failed to connect data intake");
        return;
    }
    tracing::info!(port, "data intake connected");

    loop {
        if *shutdown.borrow() {
            return;
        }

        let msg = match tokio::time::timeout(RECV_TIMEOUT, socket.recv()).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => {
                tracing::error!(port, error = %e, "intake recv failed");
                continue;
            }
            Err(_) => continue,
        };

        let Some(bytes) = msg.get(0) else {
            continue;
        };
        let frame = String::from_utf8_lossy(bytes).into_owned();

        if queue.put(frame).await.is_err() {
            return;
        }
        telemetry.record();
        tracing::debug!(port, "received data frame");
    }
}
