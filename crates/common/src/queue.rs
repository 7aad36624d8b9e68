use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TidepoolError};

/// Poll timeout used by workers on queue reads so termination is noticed
/// promptly.
pub const GET_TIMEOUT: Duration = Duration::from_millis(100);

/// Probe returning the instantaneous depth of a queue without naming its
/// item type. Handed to the load balancer as its only load signal.
pub type DepthProbe = Arc<dyn Fn() -> usize + Send + Sync>;

/// FIFO multi-producer/multi-consumer hand-off queue between pipeline
/// stages. The only permitted medium for moving items between a stage and
/// the pool that consumes it.
///
/// Cloning is cheap; every clone refers to the same underlying channel.
#[derive(Clone)]
pub struct WorkQueue<T> {
    tx: async_channel::Sender<T>,
    rx: async_channel::Receiver<T>,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Queue with no capacity limit; `put` never waits.
    pub fn unbounded() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }

    /// Queue holding at most `capacity` items; `put` waits for space.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity);
        Self { tx, rx }
    }

    /// Enqueue an item, waiting until space is available.
    pub async fn put(&self, item: T) -> Result<()> {
        self.tx.send(item).await.map_err(|_| TidepoolError::Closed)
    }

    /// Dequeue the next item, failing with `Empty` after `timeout`.
    pub async fn get(&self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Ok(item)) => Ok(item),
            Ok(Err(_)) => Err(TidepoolError::Closed),
            Err(_) => Err(TidepoolError::Empty),
        }
    }

    /// Best-effort instantaneous depth.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Type-erased depth accessor for the load balancer.
    pub fn depth_probe(&self) -> DepthProbe {
        let rx = self.rx.clone();
        Arc::new(move || rx.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_fifo() {
        let queue = WorkQueue::unbounded();
        queue.put(1u32).await.unwrap();
        queue.put(2u32).await.unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get(GET_TIMEOUT).await.unwrap(), 1);
        assert_eq!(queue.get(GET_TIMEOUT).await.unwrap(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_times_out_empty() {
        let queue: WorkQueue<u32> = WorkQueue::unbounded();
        let err = queue.get(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, TidepoolError::Empty));
    }

    #[tokio::test]
    async fn test_bounded_put_waits_for_space() {
        let queue = WorkQueue::bounded(1);
        queue.put("a").await.unwrap();

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                queue.get(GET_TIMEOUT).await.unwrap()
            })
        };

        // Blocks until the consumer frees a slot.
        queue.put("b").await.unwrap();
        assert_eq!(consumer.await.unwrap(), "a");
        assert_eq!(queue.get(GET_TIMEOUT).await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_depth_probe_tracks_len() {
        let queue = WorkQueue::unbounded();
        let probe = queue.depth_probe();
        assert_eq!(probe(), 0);

        queue.put(()).await.unwrap();
        queue.put(()).await.unwrap();
        assert_eq!(probe(), 2);

        queue.get(GET_TIMEOUT).await.unwrap();
        assert_eq!(probe(), 1);
    }
}
