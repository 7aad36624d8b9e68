use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// First port of the health plane. Health ports occupy 7100-7199.
pub const HEALTH_PORT_BASE: u16 = 7100;

/// Health data port for the collector with the given config index.
pub fn health_port(index: u16) -> u16 {
    HEALTH_PORT_BASE + index
}

/// Seconds since the Unix epoch, as published in snapshot timestamps.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs_f64()
}

/// Whether a snapshot stamped `timestamp` should go out on the PUB socket
/// given the previously published stamp. Publishing is gated on the whole
/// second changing, so the wire carries about one snapshot per second even
/// though snapshots are recomputed every 100 ms.
pub fn publish_due(previous_timestamp: f64, timestamp: f64) -> bool {
    timestamp.floor() != previous_timestamp.floor()
}

/// Point-in-time aggregation of pool sizes, queue depths, and action
/// counts, published by each collector and consumed by the monitor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: f64,
    pub server: ServerHealth,
    pub data_collector: StageHealth,
    pub data_validator: StageHealth,
    pub data_pusher: StageHealth,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerHealth {
    pub uptime: f64,
}

/// Health of one pool. `queue_size` is absent for stages that do not read
/// from a load queue (the stream readers).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageHealth {
    pub num_processes: usize,
    pub action_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_port_offsets() {
        assert_eq!(health_port(0), 7100);
        assert_eq!(health_port(1), 7101);
        assert_eq!(health_port(99), 7199);
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let snapshot = HealthSnapshot {
            timestamp: 1704067200.25,
            server: ServerHealth { uptime: 12.5 },
            data_collector: StageHealth {
                num_processes: 2,
                action_count: 40,
                queue_size: None,
            },
            data_validator: StageHealth {
                num_processes: 1,
                action_count: 38,
                queue_size: Some(2),
            },
            data_pusher: StageHealth {
                num_processes: 1,
                action_count: 38,
                queue_size: Some(0),
            },
        };

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&snapshot).unwrap()).unwrap();

        assert_eq!(value["server"]["uptime"], 12.5);
        assert_eq!(value["data_collector"]["num_processes"], 2);
        // Stream readers have no load queue.
        assert!(value["data_collector"].get("queue_size").is_none());
        assert_eq!(value["data_validator"]["queue_size"], 2);
        assert_eq!(value["data_pusher"]["action_count"], 38);

        let back: HealthSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_publish_gated_on_whole_second() {
        assert!(!publish_due(100.1, 100.9));
        assert!(publish_due(100.9, 101.0));
        assert!(publish_due(100.9, 101.1));
        // First publish: previous stamp is the -1 sentinel.
        assert!(publish_due(-1.0, 0.5));
    }
}
