use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use tidepool_common::config::MercuryConfig;
use tidepool_common::health::{unix_time, HealthSnapshot, ServerHealth, StageHealth};
use tidepool_common::oanda::OandaClient;
use tidepool_common::queue::WorkQueue;
use tidepool_common::scaling::{LoadBalancer, ScalableGroup};
use tidepool_common::telemetry::StageTelemetry;

use crate::collect::stream_reader_factory;
use crate::publisher::publish_health;
use crate::push::pusher_factory;
use crate::validate::validator_factory;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const HEALTH_INTERVAL: Duration = Duration::from_millis(100);

const AUTOSCALE_TICKS: u64 = 2;
const STATUS_TICKS: u64 = 5;
/// Stream readers are rolled every 10 minutes to stay ahead of
/// server-side connection timeouts.
const REFRESH_TICKS: u64 = 600;

/// Two concurrent readers so a respawn never leaves the feed unread.
const COLLECTOR_PROCESSES: usize = 2;

/// Load queue depth above which a balanced pool grows.
const MAX_QUEUE_SIZE: usize = 100;

/// The collector pipeline: stream readers feeding the unvalidated queue,
/// validators feeding the validated queue, pushers draining it onto the
/// PUSH socket, and a supervisor that autoscales, logs status, and keeps
/// the health snapshot fresh.
pub struct DataCollector {
    data_collector: ScalableGroup,
    data_validator: LoadBalancer,
    data_pusher: LoadBalancer,

    unvalidated_queue: WorkQueue<String>,
    validated_queue: WorkQueue<String>,

    collection_telemetry: StageTelemetry,
    validation_telemetry: StageTelemetry,
    push_telemetry: StageTelemetry,

    health_endpoint: String,
    health_tx: watch::Sender<HealthSnapshot>,
    health_rx: watch::Receiver<HealthSnapshot>,
    publisher: Option<(JoinHandle<()>, watch::Sender<bool>)>,

    start_time: f64,
}

impl DataCollector {
    pub fn new(
        client: Arc<OandaClient>,
        account_id: String,
        instruments: Vec<String>,
        cfg: &MercuryConfig,
    ) -> Self {
        let unvalidated_queue: WorkQueue<String> = WorkQueue::unbounded();
        let validated_queue: WorkQueue<String> = WorkQueue::unbounded();

        let collection_telemetry = StageTelemetry::new();
        let validation_telemetry = StageTelemetry::new();
        let push_telemetry = StageTelemetry::new();

        let data_collector = ScalableGroup::new(
            stream_reader_factory(
                client,
                account_id,
                Arc::new(instruments),
                unvalidated_queue.clone(),
                collection_telemetry.clone(),
            ),
            COLLECTOR_PROCESSES,
            COLLECTOR_PROCESSES,
        );

        let data_validator = LoadBalancer::new(
            validator_factory(
                unvalidated_queue.clone(),
                validated_queue.clone(),
                validation_telemetry.clone(),
            ),
            unvalidated_queue.depth_probe(),
            MAX_QUEUE_SIZE,
            cfg.data_validator.min_processes,
            cfg.data_validator.max_processes,
        );

        let data_pusher = LoadBalancer::new(
            pusher_factory(
                validated_queue.clone(),
                cfg.data_pusher.port,
                push_telemetry.clone(),
            ),
            validated_queue.depth_probe(),
            MAX_QUEUE_SIZE,
            cfg.data_pusher.min_processes,
            cfg.data_pusher.max_processes,
        );

        let (health_tx, health_rx) = watch::channel(HealthSnapshot::default());

        Self {
            data_collector,
            data_validator,
            data_pusher,
            unvalidated_queue,
            validated_queue,
            collection_telemetry,
            validation_telemetry,
            push_telemetry,
            health_endpoint: cfg.health.endpoint(),
            health_tx,
            health_rx,
            publisher: None,
            start_time: -1.0,
        }
    }

    /// Launch the publisher and every pool. Called exactly once.
    pub fn start(&mut self) {
        self.start_time = unix_time();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(publish_health(
            self.health_endpoint.clone(),
            self.health_rx.clone(),
            shutdown_rx,
        ));
        self.publisher = Some((handle, shutdown_tx));
        tracing::info!("started health publisher task");

        self.data_pusher.start();
        tracing::info!("started data pusher workers");

        self.data_validator.start();
        tracing::info!("started data validator workers");

        self.data_collector.start();
        tracing::info!("started data collector workers");
    }

    async fn autoscale(&mut self) {
        if let Err(e) = self.data_pusher.autoscale().await {
            tracing::warn!(error = %e, "data pusher autoscale failed");
        }
        if let Err(e) = self.data_validator.autoscale().await {
            tracing::warn!(error = %e, "data validator autoscale failed");
        }
        if let Err(e) = self.data_collector.autoscale().await {
            tracing::warn!(error = %e, "data collector autoscale failed");
        }
    }

    /// Rebuild the shared health snapshot from pool sizes, queue depths,
    /// and action counters.
    fn update_health(&self) {
        let snapshot = HealthSnapshot {
            timestamp: unix_time(),
            server: ServerHealth {
                uptime: unix_time() - self.start_time,
            },
            data_collector: StageHealth {
                num_processes: self.data_collector.process_count(),
                action_count: self.collection_telemetry.count(),
                queue_size: None,
            },
            data_validator: StageHealth {
                num_processes: self.data_validator.process_count(),
                action_count: self.validation_telemetry.count(),
                queue_size: Some(self.data_validator.queue_size()),
            },
            data_pusher: StageHealth {
                num_processes: self.data_pusher.process_count(),
                action_count: self.push_telemetry.count(),
                queue_size: Some(self.data_pusher.queue_size()),
            },
        };

        let _ = self.health_tx.send(snapshot);
    }

    /// One supervisor tick. All periodic logic hangs off the tick counter.
    async fn tick(&mut self, tick_number: u64) {
        if tick_number % AUTOSCALE_TICKS == 0 {
            tracing::debug!("autoscaling pools");
            self.autoscale().await;
        }

        if tick_number % STATUS_TICKS == 0 {
            tracing::info!(
                collector_processes = self.data_collector.process_count(),
                validator_processes = self.data_validator.process_count(),
                validator_queue = self.unvalidated_queue.len(),
                pusher_processes = self.data_pusher.process_count(),
                pusher_queue = self.validated_queue.len(),
                collected = self.collection_telemetry.count(),
                validated = self.validation_telemetry.count(),
                pushed = self.push_telemetry.count(),
                "pipeline status"
            );
        }

        if tick_number % REFRESH_TICKS == 0 {
            tracing::info!("refreshing stream readers");
            self.data_collector.refresh().await;
        }
    }

    /// Supervisor loop: 1 s ticks, with the health snapshot recomputed at
    /// a 100 ms cadence between them. Runs until externally cancelled.
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
            }

            while tick_start.elapsed() < TICK_INTERVAL {
                self.update_health();
                tokio::time::sleep(HEALTH_INTERVAL).await;
            }
        }
    }

    /// Stop every pool and the publisher, waiting for workers to exit.
    pub async fn stop(&mut self) {
        self.data_collector.stop().await;
        self.data_validator.stop().await;
        self.data_pusher.stop().await;

        if let Some((handle, shutdown_tx)) = self.publisher.take() {
            let _ = shutdown_tx.send(true);
            let _ = handle.await;
        }
    }
}
