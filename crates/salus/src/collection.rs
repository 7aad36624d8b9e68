use std::collections::VecDeque;

use tidepool_common::health::{unix_time, HealthSnapshot};

/// Snapshots retained per monitored collector.
pub const COLLECTION_CAPACITY: usize = 1000;

/// Subset selector for the derived statistics.
#[derive(Clone, Copy, Debug)]
pub enum Window {
    /// The most recent `n` snapshots.
    Count(usize),
    /// Snapshots from the past `secs` seconds.
    Past(f64),
}

/// Bounded ring of the health snapshots received from one collector,
/// oldest evicted on overflow.
pub struct HealthCollection {
    snapshots: VecDeque<HealthSnapshot>,
    capacity: usize,
}

impl HealthCollection {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn update(&mut self, snapshot: HealthSnapshot) {
        self.snapshots.push_back(snapshot);
        if self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&HealthSnapshot> {
        self.snapshots.back()
    }

    /// Seconds since the newest snapshot was stamped, or `None` before the
    /// first one arrives.
    pub fn time_since_last(&self) -> Option<f64> {
        self.latest().map(|s| unix_time() - s.timestamp)
    }

    fn select(&self, window: Window) -> Vec<&HealthSnapshot> {
        match window {
            Window::Count(n) => {
                let skip = self.snapshots.len().saturating_sub(n);
                self.snapshots.iter().skip(skip).collect()
            }
            Window::Past(secs) => {
                let cutoff = unix_time() - secs;
                self.snapshots
                    .iter()
                    .filter(|s| s.timestamp > cutoff)
                    .collect()
            }
        }
    }

    /// Arithmetic mean of `key` over the selected subset.
    pub fn average(&self, key: impl Fn(&HealthSnapshot) -> f64, window: Window) -> Option<f64> {
        let subset = self.select(window);
        if subset.is_empty() {
            return None;
        }
        Some(subset.iter().map(|s| key(s)).sum::<f64>() / subset.len() as f64)
    }

    /// Change in `key` across the selected subset — per snapshot for a
    /// `Count` window, per second for a `Past` window.
    pub fn velocity(&self, key: impl Fn(&HealthSnapshot) -> f64, window: Window) -> Option<f64> {
        let subset = self.select(window);
        let first = key(subset.first()?);
        let last = key(subset.last()?);
        let denominator = match window {
            Window::Count(_) => subset.len() as f64,
            Window::Past(secs) => secs,
        };
        Some((last - first) / denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(timestamp: f64, action_count: u64) -> HealthSnapshot {
        let mut snapshot = HealthSnapshot::default();
        snapshot.timestamp = timestamp;
        snapshot.data_collector.action_count = action_count;
        snapshot
    }

    fn collector_actions(s: &HealthSnapshot) -> f64 {
        s.data_collector.action_count as f64
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let mut collection = HealthCollection::new(3);
        for i in 0..5 {
            collection.update(snapshot(i as f64, i));
        }
        assert_eq!(collection.len(), 3);
        assert_eq!(collection.latest().unwrap().timestamp, 4.0);
        // The oldest survivor is #2.
        assert_eq!(
            collection.average(|s| s.timestamp, Window::Count(3)).unwrap(),
            3.0
        );
    }

    #[test]
    fn test_average_over_count_window() {
        let mut collection = HealthCollection::new(COLLECTION_CAPACITY);
        for count in [10, 20, 30, 40] {
            collection.update(snapshot(count as f64, count));
        }

        assert_eq!(
            collection.average(collector_actions, Window::Count(2)).unwrap(),
            35.0
        );
        // A window larger than the collection covers all of it.
        assert_eq!(
            collection
                .average(collector_actions, Window::Count(100))
                .unwrap(),
            25.0
        );
    }

    #[test]
    fn test_average_over_past_window() {
        let now = unix_time();
        let mut collection = HealthCollection::new(COLLECTION_CAPACITY);
        collection.update(snapshot(now - 100.0, 10));
        collection.update(snapshot(now - 2.0, 20));
        collection.update(snapshot(now - 1.0, 40));

        // Only the two recent snapshots fall inside the window.
        assert_eq!(
            collection
                .average(collector_actions, Window::Past(10.0))
                .unwrap(),
            30.0
        );
    }

    #[test]
    fn test_velocity_per_snapshot_and_per_second() {
        let now = unix_time();
        let mut collection = HealthCollection::new(COLLECTION_CAPACITY);
        collection.update(snapshot(now - 2.0, 100));
        collection.update(snapshot(now - 1.0, 250));
        collection.update(snapshot(now, 400));

        assert_eq!(
            collection
                .velocity(collector_actions, Window::Count(3))
                .unwrap(),
            100.0
        );
        assert_eq!(
            collection
                .velocity(collector_actions, Window::Past(10.0))
                .unwrap(),
            30.0
        );
    }

    #[test]
    fn test_empty_subset_yields_none() {
        let collection = HealthCollection::new(COLLECTION_CAPACITY);
        assert!(collection.average(collector_actions, Window::Count(5)).is_none());
        assert!(collection
            .velocity(collector_actions, Window::Past(60.0))
            .is_none());
        assert!(collection.time_since_last().is_none());
    }
}
