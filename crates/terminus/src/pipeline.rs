use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use tidepool_common::config::TerminusConfig;
use tidepool_common::queue::WorkQueue;
use tidepool_common::scaling::LoadBalancer;
use tidepool_common::telemetry::StageTelemetry;

use crate::dedupe::deduplicate_data;
use crate::intake::read_data;
use crate::packet::DbPacket;
use crate::process::processor_factory;
use crate::record::recorder_factory;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const AUTOSCALE_TICKS: u64 = 2;
const STATUS_TICKS: u64 = 5;

const POOL_MIN_PROCESSES: usize = 1;
const POOL_MAX_PROCESSES: usize = 16;
const MAX_QUEUE_SIZE: usize = 100;

/// Grace period for plain tasks (intakes, deduplicator) at stop.
const TASK_STOP_GRACE: Duration = Duration::from_millis(500);

type TaskHandle = (JoinHandle<()>, watch::Sender<bool>);

/// The sink pipeline: intake tasks feeding the raw queue, a processor
/// pool, the single deduplicator task, and a recorder pool writing to the
/// document store.
pub struct DbPipeline {
    intake_ports: Vec<u16>,
    dedupe_raw: bool,

    raw_queue: WorkQueue<String>,
    processed_queue: WorkQueue<DbPacket>,
    write_queue: WorkQueue<DbPacket>,

    intakes: Vec<TaskHandle>,
    processor: LoadBalancer,
    deduplicator: Option<TaskHandle>,
    recorder: LoadBalancer,

    intake_telemetry: StageTelemetry,
    processor_telemetry: StageTelemetry,
    dedupe_telemetry: StageTelemetry,
    duplicate_telemetry: StageTelemetry,
    recorder_telemetry: StageTelemetry,
}

impl DbPipeline {
    pub fn new(cfg: &TerminusConfig) -> Self {
        let raw_queue: WorkQueue<String> = WorkQueue::unbounded();
        let processed_queue: WorkQueue<DbPacket> = WorkQueue::unbounded();
        let write_queue: WorkQueue<DbPacket> = WorkQueue::unbounded();

        let intake_telemetry = StageTelemetry::new();
        let processor_telemetry = StageTelemetry::new();
        let dedupe_telemetry = StageTelemetry::new();
        let duplicate_telemetry = StageTelemetry::new();
        let recorder_telemetry = StageTelemetry::new();

        let processor = LoadBalancer::new(
            processor_factory(
                raw_queue.clone(),
                processed_queue.clone(),
                processor_telemetry.clone(),
            ),
            raw_queue.depth_probe(),
            MAX_QUEUE_SIZE,
            POOL_MIN_PROCESSES,
            POOL_MAX_PROCESSES,
        );

        let recorder = LoadBalancer::new(
            recorder_factory(
                write_queue.clone(),
                cfg.connection_string(),
                recorder_telemetry.clone(),
            ),
            write_queue.depth_probe(),
            MAX_QUEUE_SIZE,
            POOL_MIN_PROCESSES,
            POOL_MAX_PROCESSES,
        );

        Self {
            intake_ports: cfg.data_intake_ports.clone(),
            dedupe_raw: cfg.dedupe_raw,
            raw_queue,
            processed_queue,
            write_queue,
            intakes: Vec::new(),
            processor,
            deduplicator: None,
            recorder,
            intake_telemetry,
            processor_telemetry,
            dedupe_telemetry,
            duplicate_telemetry,
            recorder_telemetry,
        }
    }

    /// Launch every stage. Called exactly once.
    pub fn start(&mut self) {
        for &port in &self.intake_ports {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(read_data(
                port,
                self.raw_queue.clone(),
                self.intake_telemetry.clone(),
                shutdown_rx,
            ));
            self.intakes.push((handle, shutdown_tx));
        }
        tracing::info!(ports = self.intake_ports.len(), "started data intakes");

        self.processor.start();
        tracing::info!("started processor workers");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(deduplicate_data(
            self.processed_queue.clone(),
            self.write_queue.clone(),
            self.dedupe_raw,
            self.dedupe_telemetry.clone(),
            self.duplicate_telemetry.clone(),
            shutdown_rx,
        ));
        self.deduplicator = Some((handle, shutdown_tx));
        tracing::info!("started deduplicator task");

        self.recorder.start();
        tracing::info!("started recorder workers");
    }

    async fn autoscale(&mut self) {
        if let Err(e) = self.processor.autoscale().await {
            tracing::warn!(error = %e, "processor autoscale failed");
        }
        if let Err(e) = self.recorder.autoscale().await {
            tracing::warn!(error = %e, "recorder autoscale failed");
        }
    }

    async fn tick(&mut self, tick_number: u64) {
        if tick_number % AUTOSCALE_TICKS == 0 {
            tracing::debug!("autoscaling pools");
            self.autoscale().await;
        }

        if tick_number % STATUS_TICKS == 0 {
            tracing::info!(
                raw_queue = self.raw_queue.len(),
                processed_queue = self.processed_queue.len(),
                write_queue = self.write_queue.len(),
                processor_processes = self.processor.process_count(),
                recorder_processes = self.recorder.process_count(),
                received = self.intake_telemetry.count(),
                processed = self.processor_telemetry.count(),
                deduped = self.dedupe_telemetry.count(),
                duplicates = self.duplicate_telemetry.count(),
                written = self.recorder_telemetry.count(),
                "pipeline status"
            );
        }
    }

    /// Supervisor loop: 1 s ticks until externally cancelled.
    pub async fn run(&mut self) {
        self.start();

        let mut tick_number: u64 = 1;
        loop {
            let tick_start = Instant::now();
            self.tick(tick_number).await;
            tick_number += 1;

            let tick_time = tick_start.elapsed();
            if tick_time > TICK_INTERVAL {
                tracing::warn!(
                    tick_ms = tick_time.as_millis() as u64,
                    "supervisor tick overran its interval"
                );
            } else {
                tokio::time::sleep(TICK_INTERVAL - tick_time).await;
            }
        }
    }

    async fn stop_task((mut handle, shutdown_tx): TaskHandle) {
        let _ = shutdown_tx.send(true);
        if tokio::time::timeout(TASK_STOP_GRACE, &mut handle)
            .await
            .is_err()
        {
            handle.abort();
        }
    }

    /// Stop every stage in flow order, waiting for workers to exit.
    pub async fn stop(&mut self) {
        for intake in self.intakes.drain(..) {
            Self::stop_task(intake).await;
        }
        self.processor.stop().await;
        if let Some(deduplicator) = self.deduplicator.take() {
            Self::stop_task(deduplicator).await;
        }
        self.recorder.stop().await;
    }
}
