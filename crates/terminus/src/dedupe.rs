use std::collections::VecDeque;

use tidepool_common::error::TidepoolError;
use tidepool_common::queue::{WorkQueue, GET_TIMEOUT};
use tidepool_common::scaling::ShutdownSignal;
use tidepool_common::telemetry::StageTelemetry;

use crate::packet::{DbPacket, RAW_COLLECTION};

/// Number of recent packets a duplicate is tested against.
pub const DEDUPE_WINDOW: usize = 1000;

/// Bounded ring of recently forwarded packets. Membership is structural
/// equality over the whole packet.
///
/// Raw records carry an ingest timestamp and never structurally repeat,
/// so they bypass the window unless `dedupe_raw` opts them back in.
pub struct DedupeWindow {
    recent: VecDeque<DbPacket>,
    capacity: usize,
    dedupe_raw: bool,
}

impl DedupeWindow {
    pub fn new(capacity: usize, dedupe_raw: bool) -> Self {
        Self {
            recent: VecDeque::with_capacity(capacity),
            capacity,
            dedupe_raw,
        }
    }

    /// Whether the packet should be forwarded. Fresh packets are recorded
    /// in the window, evicting the oldest entry once full.
    pub fn admit(&mut self, packet: &DbPacket) -> bool {
        if !self.dedupe_raw && packet.dest == RAW_COLLECTION {
            return true;
        }

        if self.recent.contains(packet) {
            return false;
        }

        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(packet.clone());
        true
    }
}

/// The deduplicator stage. A single task owns the window, so no locking
/// is needed while it stays bounded.
pub async fn deduplicate_data(
    processed_queue: WorkQueue<DbPacket>,
    write_queue: WorkQueue<DbPacket>,
    dedupe_raw: bool,
    actions: StageTelemetry,
    duplicates: StageTelemetry,
    mut shutdown: ShutdownSignal,
) {
    let mut window = DedupeWindow::new(DEDUPE_WINDOW, dedupe_raw);

    loop {
        if *shutdown.borrow() {
            return;
        }

        let packet = match processed_queue.get(GET_TIMEOUT).await {
            Ok(packet) => packet,
            Err(TidepoolError::Empty) => continue,
            Err(_) => return,
        };

        if window.admit(&packet) {
            if write_queue.put(packet).await.is_err() {
                return;
            }
        } else {
            duplicates.record();
        }
        actions.record();
    }
}
