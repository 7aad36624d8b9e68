use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::queue::DepthProbe;

/// Grace period between signalling a worker to stop and aborting it.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Smoothing factor for the load queue depth average. Fixed so late samples
/// keep their weight over long process lifetimes.
const QUEUE_AVERAGE_ALPHA: f64 = 0.2;

/// Cooperative shutdown signal handed to every worker. Workers poll it at
/// each suspension point (queue read, socket recv) and treat a raised flag
/// as a clean end, never a failure.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Future run by a single worker task.
pub type WorkerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Factory invoked once per spawned worker. Captures clones of the queues
/// and telemetry the worker needs.
pub type WorkerFactory = Arc<dyn Fn(ShutdownSignal) -> WorkerFuture + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ScalingError {
    #[error("cannot autoscale a stopped group, call start() first")]
    NotRunning,
}

struct WorkerHandle {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Dynamic set of worker tasks all running the same target routine.
///
/// The supervisor is the only caller of every method here; workers never
/// resize their own pool.
pub struct ScalableGroup {
    factory: WorkerFactory,
    min_processes: usize,
    max_processes: usize,
    workers: Vec<WorkerHandle>,
    is_running: bool,
}

impl ScalableGroup {
    pub fn new(factory: WorkerFactory, min_processes: usize, max_processes: usize) -> Self {
        Self {
            factory,
            min_processes,
            max_processes: max_processes.max(min_processes),
            workers: Vec::new(),
            is_running: false,
        }
    }

    fn spawn_worker(&mut self) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn((self.factory)(shutdown_rx));
        self.workers.push(WorkerHandle {
            handle,
            shutdown_tx,
        });
    }

    /// Retire the most recently spawned worker: signal shutdown, wait a
    /// bounded grace period, then abort. In-flight items held by the worker
    /// are lost (at-most-once semantics).
    async fn retire_worker(&mut self) {
        let Some(mut worker) = self.workers.pop() else {
            return;
        };
        let _ = worker.shutdown_tx.send(true);
        if tokio::time::timeout(STOP_GRACE, &mut worker.handle)
            .await
            .is_err()
        {
            worker.handle.abort();
        }
    }

    /// Drop workers whose task has already exited.
    fn prune(&mut self) {
        self.workers.retain(|worker| !worker.handle.is_finished());
    }

    async fn scale_to_bounds(&mut self) {
        while self.process_count() < self.min_processes {
            self.spawn_worker();
        }
        while self.process_count() > self.max_processes {
            self.retire_worker().await;
        }
    }

    /// Live worker count.
    pub fn process_count(&self) -> usize {
        self.workers.len()
    }

    pub fn min_processes(&self) -> usize {
        self.min_processes
    }

    pub fn max_processes(&self) -> usize {
        self.max_processes
    }

    /// Launch exactly `min_processes` workers.
    pub fn start(&mut self) {
        self.is_running = true;
        for _ in 0..self.min_processes {
            self.spawn_worker();
        }
    }

    /// Terminate every worker and wait for exit.
    pub async fn stop(&mut self) {
        while !self.workers.is_empty() {
            self.retire_worker().await;
        }
        self.is_running = false;
    }

    /// Prune dead workers, then restore `min <= live <= max`.
    pub async fn autoscale(&mut self) -> Result<(), ScalingError> {
        if !self.is_running {
            return Err(ScalingError::NotRunning);
        }
        self.prune();
        self.scale_to_bounds().await;
        Ok(())
    }

    /// Recycle every current worker, one-for-one. Used to roll workers
    /// whose upstream connection has been alive too long.
    pub async fn refresh(&mut self) {
        for _ in 0..self.process_count() {
            self.retire_worker().await;
            self.spawn_worker();
        }
    }
}

/// A `ScalableGroup` driven by a hysteretic policy on a load queue.
///
/// Queue depth is the only signal. Growth happens whenever the depth
/// exceeds `max_queue_size`; shrinking additionally requires that the
/// depth is not growing, which prevents thrashing while load briefly dips
/// below the threshold on its way up.
pub struct LoadBalancer {
    group: ScalableGroup,
    depth: DepthProbe,
    max_queue_size: usize,
    previous_queue_size: usize,
    queue_average: f64,
}

impl LoadBalancer {
    pub fn new(
        factory: WorkerFactory,
        depth: DepthProbe,
        max_queue_size: usize,
        min_processes: usize,
        max_processes: usize,
    ) -> Self {
        Self {
            group: ScalableGroup::new(factory, min_processes, max_processes),
            depth,
            max_queue_size,
            previous_queue_size: 0,
            queue_average: 0.0,
        }
    }

    pub fn start(&mut self) {
        self.group.start();
    }

    pub async fn stop(&mut self) {
        self.group.stop().await;
    }

    pub async fn refresh(&mut self) {
        self.group.refresh().await;
    }

    pub fn process_count(&self) -> usize {
        self.group.process_count()
    }

    /// Instantaneous depth of the load queue.
    pub fn queue_size(&self) -> usize {
        (self.depth)()
    }

    /// Exponentially weighted average of the observed queue depth.
    pub fn queue_average(&self) -> f64 {
        self.queue_average
    }

    /// Base pruning/min-scaling, then one step of the load policy.
    pub async fn autoscale(&mut self) -> Result<(), ScalingError> {
        self.group.autoscale().await?;
        self.balance_load().await;
        Ok(())
    }

    async fn balance_load(&mut self) {
        let queue_size = (self.depth)();
        let growing = queue_size > self.previous_queue_size;

        if queue_size > self.max_queue_size && self.group.process_count() < self.group.max_processes
        {
            tracing::debug!(
                queue_size,
                live = self.group.process_count(),
                "load queue over threshold, adding worker"
            );
            self.group.spawn_worker();
        } else if queue_size <= self.max_queue_size
            && !growing
            && self.group.process_count() > self.group.min_processes
        {
            tracing::debug!(
                queue_size,
                live = self.group.process_count(),
                "load queue drained, removing worker"
            );
            self.group.retire_worker().await;
        }

        self.previous_queue_size = queue_size;
        self.queue_average += QUEUE_AVERAGE_ALPHA * (queue_size as f64 - self.queue_average);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::queue::{WorkQueue, GET_TIMEOUT};

    /// Worker that parks until its shutdown signal is raised.
    fn idle_factory() -> WorkerFactory {
        Arc::new(|mut shutdown: ShutdownSignal| {
            Box::pin(async move {
                let _ = shutdown.changed().await;
            })
        })
    }

    /// Worker that exits immediately, as a crashed worker would.
    fn dying_factory() -> WorkerFactory {
        Arc::new(|_shutdown: ShutdownSignal| Box::pin(async {}))
    }

    /// Worker that ignores the shutdown signal entirely.
    fn stubborn_factory() -> WorkerFactory {
        Arc::new(|_shutdown: ShutdownSignal| {
            Box::pin(async {
                loop {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            })
        })
    }

    #[tokio::test]
    async fn test_start_spawns_min_and_stop_drains() {
        let mut group = ScalableGroup::new(idle_factory(), 2, 4);
        group.start();
        assert_eq!(group.process_count(), 2);

        group.stop().await;
        assert_eq!(group.process_count(), 0);
    }

    #[tokio::test]
    async fn test_autoscale_before_start_fails() {
        let mut group = ScalableGroup::new(idle_factory(), 1, 1);
        assert!(matches!(
            group.autoscale().await,
            Err(ScalingError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_autoscale_replaces_dead_workers() {
        let mut group = ScalableGroup::new(dying_factory(), 2, 4);
        group.start();
        // Let the workers run to completion.
        tokio::time::sleep(Duration::from_millis(20)).await;

        group.autoscale().await.unwrap();
        assert_eq!(group.process_count(), 2);
    }

    #[tokio::test]
    async fn test_stop_aborts_stubborn_workers() {
        let mut group = ScalableGroup::new(stubborn_factory(), 1, 1);
        group.start();
        group.stop().await;
        assert_eq!(group.process_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_recycles_one_for_one() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let factory: WorkerFactory = {
            let spawned = Arc::clone(&spawned);
            Arc::new(move |mut shutdown: ShutdownSignal| {
                spawned.fetch_add(1, Ordering::Relaxed);
                Box::pin(async move {
                    let _ = shutdown.changed().await;
                })
            })
        };

        let mut group = ScalableGroup::new(factory, 2, 4);
        group.start();
        assert_eq!(spawned.load(Ordering::Relaxed), 2);

        group.refresh().await;
        assert_eq!(group.process_count(), 2);
        assert_eq!(spawned.load(Ordering::Relaxed), 4);

        group.stop().await;
    }

    #[tokio::test]
    async fn test_max_clamps_below_min() {
        let group = ScalableGroup::new(idle_factory(), 4, 1);
        assert_eq!(group.max_processes(), 4);
    }

    #[tokio::test]
    async fn test_balancer_grows_one_per_tick_until_max() {
        let queue: WorkQueue<u32> = WorkQueue::unbounded();
        for i in 0..20 {
            queue.put(i).await.unwrap();
        }

        let mut balancer = LoadBalancer::new(idle_factory(), queue.depth_probe(), 10, 1, 5);
        balancer.start();
        assert_eq!(balancer.process_count(), 1);

        for expected in 2..=5 {
            balancer.autoscale().await.unwrap();
            assert_eq!(balancer.process_count(), expected);
        }

        // Saturated at max.
        balancer.autoscale().await.unwrap();
        assert_eq!(balancer.process_count(), 5);

        balancer.stop().await;
    }

    #[tokio::test]
    async fn test_balancer_shrinks_when_drained_and_not_growing() {
        let queue: WorkQueue<u32> = WorkQueue::unbounded();
        for i in 0..20 {
            queue.put(i).await.unwrap();
        }

        let mut balancer = LoadBalancer::new(idle_factory(), queue.depth_probe(), 10, 1, 3);
        balancer.start();
        balancer.autoscale().await.unwrap();
        balancer.autoscale().await.unwrap();
        assert_eq!(balancer.process_count(), 3);

        while queue.get(GET_TIMEOUT).await.is_ok() {}

        // Depth fell from 20 to 0: not growing, below threshold.
        balancer.autoscale().await.unwrap();
        assert_eq!(balancer.process_count(), 2);
        balancer.autoscale().await.unwrap();
        assert_eq!(balancer.process_count(), 1);

        // Never drops below min.
        balancer.autoscale().await.unwrap();
        assert_eq!(balancer.process_count(), 1);

        balancer.stop().await;
    }

    #[tokio::test]
    async fn test_balancer_oscillation_moves_at_most_one_per_tick() {
        let queue: WorkQueue<u32> = WorkQueue::unbounded();
        let mut balancer = LoadBalancer::new(idle_factory(), queue.depth_probe(), 10, 1, 5);
        balancer.start();

        // Oscillate between max/2 and max+1 across ticks.
        for tick in 0..6 {
            let target = if tick % 2 == 0 { 11 } else { 5 };
            while queue.len() < target {
                queue.put(0).await.unwrap();
            }
            while queue.len() > target {
                let _ = queue.get(GET_TIMEOUT).await;
            }

            let before = balancer.process_count();
            balancer.autoscale().await.unwrap();
            let after = balancer.process_count();
            assert!(after.abs_diff(before) <= 1);
        }

        balancer.stop().await;
    }

    #[tokio::test]
    async fn test_queue_average_tracks_recent_depth() {
        let queue: WorkQueue<u32> = WorkQueue::unbounded();
        let mut balancer = LoadBalancer::new(idle_factory(), queue.depth_probe(), 100, 1, 1);
        balancer.start();

        for _ in 0..10 {
            queue.put(0).await.unwrap();
        }
        // With a fixed smoothing factor the average keeps converging toward
        // the current depth no matter how many ticks have elapsed.
        for _ in 0..40 {
            balancer.autoscale().await.unwrap();
        }
        assert!((balancer.queue_average() - 10.0).abs() < 0.1);

        balancer.stop().await;
    }
}
