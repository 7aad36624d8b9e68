use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use zeromq::{Socket, SocketRecv, SubSocket};

use tidepool_common::health::HealthSnapshot;
use tidepool_common::scaling::ShutdownSignal;

use crate::collection::{HealthCollection, COLLECTION_CAPACITY};

/// Recv timeout so the task can notice shutdown between messages.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Health collections keyed by health port, written by the SUB tasks and
/// read by the report loop.
pub type SharedCollections = Arc<RwLock<HashMap<u16, HealthCollection>>>;

/// SUB task for one collector: subscribe to everything on its health port
/// and append each decoded snapshot to that port's collection.
pub async fn monitor_collector(
    host: String,
    port: u16,
    collections: SharedCollections,
    mut shutdown: ShutdownSignal,
) {
    let endpoint = format!("{host}:{port}");
    let mut socket = SubSocket::new();
    if let Err(e) = socket.connect(&endpoint).await {
        tracing::error!(endpoint = %endpoint, error = %e, "failed to connect to health data");
        return;
    }
    if let Err(e) = socket.subscribe("").await {
        tracing::error!(endpoint = %endpoint, error = %e, "failed to subscribe");
        return;
    }
    tracing::info!(endpoint = %endpoint, "connected to health data");

    loop {
        if *shutdown.borrow() {
            return;
        }

        let msg = match tokio::time::timeout(RECV_TIMEOUT, socket.recv()).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => {
                tracing::warn!(port, error = %e, "health recv failed");
                continue;
            }
            Err(_) => continue,
        };

        let Some(bytes) = msg.get(0) else {
            continue;
        };

        match serde_json::from_slice::<HealthSnapshot>(bytes) {
            Ok(snapshot) => {
                collections
                    .write()
                    .await
                    .entry(port)
                    .or_insert_with(|| HealthCollection::new(COLLECTION_CAPACITY))
                    .update(snapshot);
            }
            Err(e) => {
                tracing::warn!(port, error = %e, "failed to decode health snapshot");
            }
        }
    }
}
