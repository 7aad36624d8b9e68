use crate::collection::{HealthCollection, Window};

/// A collector that has gone this long without a snapshot is in error.
const STALE_AFTER: f64 = 5.0;

const QUEUE_DEGRADED: usize = 1000;
const QUEUE_ERROR: usize = 10000;

/// Throughput floor, in actions per second over the past minute.
const THROUGHPUT_WINDOW: f64 = 60.0;
const THROUGHPUT_FLOOR: f64 = 5.0;

/// Status of one monitored collector: a severity code (0 OK, 1 Degraded,
/// 2 Error, 3 Unknown) and a human-readable message.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectorStatus {
    pub code: u8,
    pub message: String,
}

impl CollectorStatus {
    fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Classify a collector from its health collection. `None` means no
/// snapshot has ever been received for that port.
pub fn status(collection: Option<&HealthCollection>) -> CollectorStatus {
    let Some(collection) = collection else {
        return CollectorStatus::new(3, "Unknown");
    };
    let Some(latest) = collection.latest() else {
        return CollectorStatus::new(3, "Unknown");
    };

    if collection.time_since_last().unwrap_or(f64::MAX) > STALE_AFTER {
        return CollectorStatus::new(2, "Error");
    }

    // Error thresholds are checked before degraded ones so the worse
    // classification wins.
    let pusher_queue = latest.data_pusher.queue_size.unwrap_or(0);
    if pusher_queue > QUEUE_ERROR {
        return CollectorStatus::new(2, "Error: Data pusher queue size is too large");
    }
    if pusher_queue > QUEUE_DEGRADED {
        return CollectorStatus::new(1, "Degraded: Data pusher queue size is too large");
    }

    let validator_queue = latest.data_validator.queue_size.unwrap_or(0);
    if validator_queue > QUEUE_ERROR {
        return CollectorStatus::new(2, "Error: Data validator queue size is too large");
    }
    if validator_queue > QUEUE_DEGRADED {
        return CollectorStatus::new(1, "Degraded: Data validator queue size is too large");
    }

    let rate = collection
        .velocity(
            |s| s.data_collector.action_count as f64,
            Window::Past(THROUGHPUT_WINDOW),
        )
        .unwrap_or(0.0);
    if rate < THROUGHPUT_FLOOR {
        return CollectorStatus::new(
            1,
            format!("Degraded: Average number of actions per second is too low ({rate:.2} aps)"),
        );
    }

    CollectorStatus::new(0, "OK")
}

/// Actions per second for one stage over the given window, defaulting to
/// zero until enough snapshots exist.
pub fn actions_per_second(
    collection: &HealthCollection,
    key: impl Fn(&tidepool_common::health::HealthSnapshot) -> f64,
    window: f64,
) -> f64 {
    collection.velocity(key, Window::Past(window)).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::COLLECTION_CAPACITY;
    use tidepool_common::health::{unix_time, HealthSnapshot};

    /// A collection whose latest snapshot is fresh and whose collector
    /// counter grows fast enough to clear the throughput floor.
    fn healthy_collection() -> HealthCollection {
        let now = unix_time();
        let mut collection = HealthCollection::new(COLLECTION_CAPACITY);
        collection.update(healthy_snapshot(now - 30.0, 0));
        collection.update(healthy_snapshot(now, 400));
        collection
    }

    fn healthy_snapshot(timestamp: f64, action_count: u64) -> HealthSnapshot {
        let mut snapshot = HealthSnapshot::default();
        snapshot.timestamp = timestamp;
        snapshot.data_collector.action_count = action_count;
        snapshot.data_validator.queue_size = Some(0);
        snapshot.data_pusher.queue_size = Some(0);
        snapshot
    }

    #[test]
    fn test_no_data_is_unknown() {
        assert_eq!(status(None), CollectorStatus::new(3, "Unknown"));

        let empty = HealthCollection::new(COLLECTION_CAPACITY);
        assert_eq!(status(Some(&empty)), CollectorStatus::new(3, "Unknown"));
    }

    #[test]
    fn test_healthy_collector_is_ok() {
        let collection = healthy_collection();
        assert_eq!(status(Some(&collection)), CollectorStatus::new(0, "OK"));
    }

    #[test]
    fn test_stale_collector_is_error() {
        let mut collection = HealthCollection::new(COLLECTION_CAPACITY);
        collection.update(healthy_snapshot(unix_time() - 6.0, 400));
        assert_eq!(status(Some(&collection)), CollectorStatus::new(2, "Error"));
    }

    #[test]
    fn test_pusher_queue_thresholds() {
        let mut collection = healthy_collection();

        let mut snapshot = healthy_snapshot(unix_time(), 800);
        snapshot.data_pusher.queue_size = Some(1500);
        collection.update(snapshot);
        assert_eq!(
            status(Some(&collection)),
            CollectorStatus::new(1, "Degraded: Data pusher queue size is too large")
        );

        let mut snapshot = healthy_snapshot(unix_time(), 1200);
        snapshot.data_pusher.queue_size = Some(15000);
        collection.update(snapshot);
        assert_eq!(
            status(Some(&collection)),
            CollectorStatus::new(2, "Error: Data pusher queue size is too large")
        );
    }

    #[test]
    fn test_validator_queue_thresholds() {
        let mut collection = healthy_collection();

        let mut snapshot = healthy_snapshot(unix_time(), 800);
        snapshot.data_validator.queue_size = Some(1001);
        collection.update(snapshot);
        assert_eq!(
            status(Some(&collection)),
            CollectorStatus::new(1, "Degraded: Data validator queue size is too large")
        );

        let mut snapshot = healthy_snapshot(unix_time(), 1200);
        snapshot.data_validator.queue_size = Some(10001);
        collection.update(snapshot);
        assert_eq!(
            status(Some(&collection)),
            CollectorStatus::new(2, "Error: Data validator queue size is too large")
        );
    }

    #[test]
    fn test_queue_exactly_at_threshold_is_fine() {
        let mut collection = healthy_collection();
        let mut snapshot = healthy_snapshot(unix_time(), 800);
        snapshot.data_pusher.queue_size = Some(1000);
        snapshot.data_validator.queue_size = Some(1000);
        collection.update(snapshot);
        assert_eq!(status(Some(&collection)).code, 0);
    }

    #[test]
    fn test_low_throughput_is_degraded() {
        let now = unix_time();
        let mut collection = HealthCollection::new(COLLECTION_CAPACITY);
        // 60 actions over 30 seconds: 1 action/s, under the 5/s floor.
        collection.update(healthy_snapshot(now - 30.0, 0));
        collection.update(healthy_snapshot(now, 60));

        let result = status(Some(&collection));
        assert_eq!(result.code, 1);
        assert!(result.message.contains("too low"));
    }
}
