//! Bounded worker pool over corpus items.
//!
//! At most `workers` pipelines run at once. Results are yielded in completion
//! order through a [`ResultStream`]; the receiving side is the only place
//! results are accumulated.

use futures::Stream;
use parity_core::obs::emit_worker_lost;
use parity_core::{CorpusItem, PipelineResult};
use std::any::Any;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tracing::debug;

use crate::pipeline::ParityPipeline;

/// Per-pool counters, flushed once at the end of a run.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl PoolMetrics {
    fn start(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn finish(&self, panicked: bool) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::Relaxed);
        if panicked {
            self.panicked.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of items observed in flight at once.
    pub fn peak_in_flight(&self) -> u64 {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Emit all counters as one `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "pool.flush",
            in_flight = self.in_flight(),
            peak_in_flight = self.peak_in_flight(),
            completed = self.completed(),
            panicked = self.panicked(),
        );
    }
}

/// Completed results, in completion order.
pub struct ResultStream {
    rx: mpsc::Receiver<PipelineResult>,
}

impl Stream for ResultStream {
    type Item = PipelineResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Fixed-size pool running one [`ParityPipeline`] per item.
pub struct WorkerPool {
    pipeline: ParityPipeline,
    workers: usize,
    metrics: Arc<PoolMetrics>,
}

impl WorkerPool {
    pub fn new(pipeline: ParityPipeline, workers: usize) -> Self {
        Self {
            pipeline,
            workers: workers.max(1),
            metrics: Arc::new(PoolMetrics::default()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn metrics(&self) -> Arc<PoolMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Start processing `items`; must be called inside a tokio runtime.
    ///
    /// Every item yields exactly one result. A pipeline that panics is
    /// reported as an `InternalError` result for its item.
    pub fn spawn(&self, items: Vec<Arc<CorpusItem>>) -> ResultStream {
        let (tx, rx) = mpsc::channel(self.workers * 2);
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let pipeline = self.pipeline.clone();
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            for item in items {
                // The semaphore is never closed.
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let tx = tx.clone();
                let pipeline = pipeline.clone();
                let metrics = Arc::clone(&metrics);

                tokio::spawn(async move {
                    metrics.start();
                    let worker_item = Arc::clone(&item);
                    let joined =
                        tokio::spawn(async move { pipeline.run_item(worker_item).await }).await;
                    let (result, panicked) = match joined {
                        Ok(result) => (result, false),
                        Err(e) => (lost_worker_result(item, e), true),
                    };
                    metrics.finish(panicked);
                    drop(permit);

                    if tx.send(result).await.is_err() {
                        debug!("result receiver dropped");
                    }
                });
            }
        });

        ResultStream { rx }
    }

    /// Process every item and collect results in completion order.
    pub async fn run_all(&self, items: Vec<Arc<CorpusItem>>) -> Vec<PipelineResult> {
        use futures::StreamExt;

        let expected = items.len();
        let results: Vec<PipelineResult> = self.spawn(items).collect().await;
        debug_assert_eq!(results.len(), expected);
        results
    }
}

fn lost_worker_result(item: Arc<CorpusItem>, error: JoinError) -> PipelineResult {
    let message = if error.is_panic() {
        format!("worker panicked: {}", panic_text(error.into_panic()))
    } else {
        "worker cancelled".to_string()
    };
    emit_worker_lost(&item.id, &message);
    PipelineResult::internal_error(item, message)
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_track_peak() {
        let m = PoolMetrics::default();
        m.start();
        m.start();
        m.finish(false);
        m.start();
        m.finish(true);
        m.finish(false);
        assert_eq!(m.in_flight(), 0);
        assert_eq!(m.peak_in_flight(), 2);
        assert_eq!(m.completed(), 3);
        assert_eq!(m.panicked(), 1);
        m.flush();
    }

    #[test]
    fn test_panic_text() {
        assert_eq!(panic_text(Box::new("boom")), "boom");
        assert_eq!(panic_text(Box::new("owned".to_string())), "owned");
        assert_eq!(panic_text(Box::new(7_u8)), "non-string panic payload");
    }
}
