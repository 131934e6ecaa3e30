use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

type FlushHandler<T> = Box<dyn Fn(Vec<T>) -> BoxFuture<'static, ()> + Send + Sync>;

struct Inner<T> {
    buffer: Mutex<Vec<T>>,
    timer_armed: AtomicBool,
    batch_size: usize,
    flush_interval: Duration,
    handler: FlushHandler<T>,
}

/// Coalesces many small writes into periodic bulk flushes.
///
/// `add` flushes immediately once the buffer reaches `batch_size`, otherwise
/// arms a single `flush_interval` timer. A flush atomically swaps out the
/// buffer and hands the handler one FIFO batch; each item is flushed exactly
/// once. Retrying a failed batch is the handler's concern; wrap the write in
/// a [`crate::RetryPolicy`] when wiring the handler.
pub struct BatchQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BatchQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> BatchQueue<T> {
    pub fn new<F, Fut>(batch_size: usize, flush_interval: Duration, handler: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Vec::new()),
                timer_armed: AtomicBool::new(false),
                batch_size: batch_size.max(1),
                flush_interval,
                handler: Box::new(move |batch| Box::pin(handler(batch))),
            }),
        }
    }

    /// Appends an item, flushing in the background once the buffer is full.
    ///
    /// Must be called from within a tokio runtime; flushes run as spawned
    /// tasks so the caller never blocks on the sink.
    pub fn add(&self, item: T) {
        let full = {
            let mut buffer = self.inner.buffer.lock();
            buffer.push(item);
            if buffer.len() >= self.inner.batch_size {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };

        if let Some(batch) = full {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                (inner.handler)(batch).await;
            });
            return;
        }

        if !self.inner.timer_armed.swap(true, Ordering::SeqCst) {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(inner.flush_interval).await;
                inner.timer_armed.store(false, Ordering::SeqCst);
                let batch = std::mem::take(&mut *inner.buffer.lock());
                if !batch.is_empty() {
                    (inner.handler)(batch).await;
                }
            });
        }
    }

    /// Flushes whatever is buffered right now and waits for the handler.
    pub async fn flush(&self) {
        let batch = std::mem::take(&mut *self.inner.buffer.lock());
        if !batch.is_empty() {
            (self.inner.handler)(batch).await;
        }
    }

    pub fn buffered(&self) -> usize {
        self.inner.buffer.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_queue(
        batch_size: usize,
        flush_interval: Duration,
    ) -> (BatchQueue<u32>, Arc<Mutex<Vec<Vec<u32>>>>) {
        let flushed: Arc<Mutex<Vec<Vec<u32>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = flushed.clone();
        let queue = BatchQueue::new(batch_size, flush_interval, move |batch| {
            let sink = sink.clone();
            async move {
                sink.lock().push(batch);
            }
        });
        (queue, flushed)
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_immediately_at_batch_size() {
        let (queue, flushed) = collecting_queue(3, Duration::from_secs(60));
        queue.add(1);
        queue.add(2);
        queue.add(3);
        tokio::task::yield_now().await;

        let flushed = flushed.lock();
        assert_eq!(*flushed, vec![vec![1, 2, 3]]);
        assert_eq!(queue.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_a_partial_batch() {
        let (queue, flushed) = collecting_queue(10, Duration::from_millis(500));
        queue.add(1);
        queue.add(2);
        assert!(flushed.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(501)).await;
        tokio::task::yield_now().await;
        assert_eq!(*flushed.lock(), vec![vec![1, 2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn items_flush_exactly_once_in_fifo_order() {
        let (queue, flushed) = collecting_queue(2, Duration::from_secs(60));
        for n in 0..6 {
            queue.add(n);
        }
        tokio::task::yield_now().await;

        let batches = flushed.lock().clone();
        let items: Vec<u32> = batches.iter().flatten().copied().collect();
        assert_eq!(items, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_flush_drains_the_buffer() {
        let (queue, flushed) = collecting_queue(10, Duration::from_secs(60));
        queue.add(7);
        queue.flush().await;
        assert_eq!(*flushed.lock(), vec![vec![7]]);

        // The armed timer later finds an empty buffer and flushes nothing.
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert_eq!(flushed.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_is_rearmed_by_the_next_add() {
        let (queue, flushed) = collecting_queue(10, Duration::from_millis(100));
        queue.add(1);
        tokio::time::sleep(Duration::from_millis(101)).await;
        tokio::task::yield_now().await;
        assert_eq!(flushed.lock().len(), 1);

        queue.add(2);
        tokio::time::sleep(Duration::from_millis(101)).await;
        tokio::task::yield_now().await;
        assert_eq!(*flushed.lock(), vec![vec![1], vec![2]]);
    }
}
