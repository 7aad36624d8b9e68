use std::sync::Arc;

use serde_json::Value;

use tidepool_common::error::TidepoolError;
use tidepool_common::queue::{WorkQueue, GET_TIMEOUT};
use tidepool_common::scaling::{ShutdownSignal, WorkerFactory};
use tidepool_common::telemetry::StageTelemetry;

/// Fields a PRICE data point must carry to be forwarded downstream.
const PRICE_REQUIRED_FIELDS: &[&str] = &[
    "time",
    "bids",
    "asks",
    "closeoutBid",
    "closeoutAsk",
    "status",
    "tradeable",
    "instrument",
];

const HEARTBEAT_REQUIRED_FIELDS: &[&str] = &["time"];

/// Build the validator factory: decode each frame, check required fields
/// per type, and forward the original string untouched.
pub fn validator_factory(
    unvalidated: WorkQueue<String>,
    validated: WorkQueue<String>,
    telemetry: StageTelemetry,
) -> WorkerFactory {
    Arc::new(move |shutdown| {
        let unvalidated = unvalidated.clone();
        let validated = validated.clone();
        let telemetry = telemetry.clone();
        Box::pin(validate_data(unvalidated, validated, telemetry, shutdown))
    })
}

async fn validate_data(
    unvalidated: WorkQueue<String>,
    validated: WorkQueue<String>,
    telemetry: StageTelemetry,
    mut shutdown: ShutdownSignal,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let item = match unvalidated.get(GET_TIMEOUT).await {
            Ok(item) => item,
            Err(TidepoolError::Empty) => continue,
            Err(_) => return,
        };

        if let Err(e) = validate(&item) {
            tracing::warn!(error = %e, "dropping invalid data point");
            continue;
        }

        // Forwarded byte-identical; only the check touches the decoded form.
        if validated.put(item).await.is_err() {
            return;
        }
        telemetry.record();
    }
}

/// Check one frame against the required-field sets. Frames of unknown type
/// pass through as-is.
pub(crate) fn validate(frame: &str) -> tidepool_common::Result<()> {
    let datapoint: Value = serde_json::from_str(frame)?;

    let kind = datapoint
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| TidepoolError::Validation("type".to_string()))?;

    let required = match kind {
        "PRICE" => PRICE_REQUIRED_FIELDS,
        "HEARTBEAT" => HEARTBEAT_REQUIRED_FIELDS,
        _ => return Ok(()),
    };

    for field in required {
        if datapoint.get(*field).is_none() {
            return Err(TidepoolError::Validation(field.to_string()));
        }
    }

    Ok(())
}
