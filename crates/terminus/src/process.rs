use std::sync::Arc;

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, DateTime as BsonDateTime};
use serde_json::Value;

use tidepool_common::error::TidepoolError;
use tidepool_common::queue::{WorkQueue, GET_TIMEOUT};
use tidepool_common::scaling::{ShutdownSignal, WorkerFactory};
use tidepool_common::telemetry::StageTelemetry;

use crate::packet::{DbPacket, RAW_COLLECTION};

/// Build the processor factory. Every frame yields a raw record; PRICE
/// frames additionally yield a derived tick destined for the instrument's
/// own collection.
pub fn processor_factory(
    raw_queue: WorkQueue<String>,
    processed_queue: WorkQueue<DbPacket>,
    telemetry: StageTelemetry,
) -> WorkerFactory {
    Arc::new(move |shutdown| {
        let raw_queue = raw_queue.clone();
        let processed_queue = processed_queue.clone();
        let telemetry = telemetry.clone();
        Box::pin(process_data(raw_queue, processed_queue, telemetry, shutdown))
    })
}

async fn process_data(
    raw_queue: WorkQueue<String>,
    processed_queue: WorkQueue<DbPacket>,
    telemetry: StageTelemetry,
    mut shutdown: ShutdownSignal,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let frame = match raw_queue.get(GET_TIMEOUT).await {
            Ok(frame) => frame,
            Err(TidepoolError::Empty) => continue,
            Err(_) => return,
        };

        let raw_packet = DbPacket {
            dest: RAW_COLLECTION.to_string(),
            data: doc! {
                "time": BsonDateTime::now(),
                "data": frame.as_str(),
            },
        };
        if processed_queue.put(raw_packet).await.is_err() {
            return;
        }

        match derive_tick(&frame) {
            Ok(Some(packet)) => {
                if processed_queue.put(packet).await.is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                // The collector validated upstream; anything reaching here
                // still gets its raw record, only the derived tick is lost.
                tracing::warn!(error = %e, "failed to derive tick from frame");
            }
        }

        telemetry.record();
    }
}

/// Derive the normalized tick from a PRICE frame. HEARTBEAT and unknown
/// types produce nothing.
pub(crate) fn derive_tick(frame: &str) -> tidepool_common::Result<Option<DbPacket>> {
    let datapoint: Value = serde_json::from_str(frame)?;

    match datapoint.get("type").and_then(Value::as_str) {
        Some("PRICE") => {}
        Some("HEARTBEAT") => {
            tracing::debug!("received heartbeat");
            return Ok(None);
        }
        _ => return Ok(None),
    }

    let field_str = |name: &str| {
        datapoint
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| TidepoolError::Validation(name.to_string()))
    };

    let time: DateTime<Utc> = DateTime::parse_from_rfc3339(&field_str("time")?)
        .map_err(|_| TidepoolError::Validation("time".to_string()))?
        .with_timezone(&Utc);
    let tradeable = datapoint
        .get("tradeable")
        .and_then(Value::as_bool)
        .ok_or_else(|| TidepoolError::Validation("tradeable".to_string()))?;
    let instrument = field_str("instrument")?;

    Ok(Some(DbPacket {
        dest: instrument.clone(),
        data: doc! {
            "time": BsonDateTime::from_millis(time.timestamp_millis()),
            "bid": field_str("closeoutBid")?,
            "ask": field_str("closeoutAsk")?,
            "status": field_str("status")?,
            "tradeable": tradeable,
            "instrument": instrument,
        },
    }))
}
