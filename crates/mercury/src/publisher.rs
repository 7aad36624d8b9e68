use std::time::Duration;

use tokio::sync::watch;
use zeromq::{PubSocket, Socket, SocketSend};

use tidepool_common::health::{publish_due, HealthSnapshot};
use tidepool_common::scaling::ShutdownSignal;

/// Cadence at which the publisher re-checks the shared snapshot.
const PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

/// Health publisher task. Binds the PUB socket once, then forwards the
/// latest snapshot whenever its timestamp crosses a whole second, so
/// subscribers see roughly one message per second.
pub async fn publish_health(
    endpoint: String,
    health: watch::Receiver<HealthSnapshot>,
    mut shutdown: ShutdownSignal,
) {
    let mut socket = PubSocket::new();
    if let Err(e) = socket.bind(&endpoint).await {
        tracing::error!(endpoint = %endpoint, error = %e, "failed to bind health socket");
        return;
    }
    tracing::info!(endpoint = %endpoint, "publishing health data");

    let mut previous_timestamp = -1.0;
    loop {
        if *shutdown.borrow() {
            return;
        }

        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(PUBLISH_INTERVAL) => {}
        }

        let snapshot = health.borrow().clone();
        if !publish_due(previous_timestamp, snapshot.timestamp) {
            continue;
        }

        match serde_json::to_string(&snapshot) {
            Ok(payload) => {
                if let Err(e) = socket.send(payload.into()).await {
                    tracing::error!(error = %e, "failed to publish health snapshot");
                    continue;
                }
                previous_timestamp = snapshot.timestamp;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to encode health snapshot");
            }
        }
    }
}
