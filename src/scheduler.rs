// scheduler.rs - Batched concurrent dispatch
// Purpose: Run every credential pair of a run through a bounded worker pool,
//          one batch at a time, reporting each result as it completes
// Features:
//  - Batch size derived from the run size
//  - Semaphore-bounded tokio workers within a batch
//  - Exact, monotonic progress after every attempt
//  - Panicking workers reported as error results
//  - Stops scheduling new batches once the consumer is gone

use crate::events::RunEvent;
use crate::executor::AttemptRunner;
use crate::types::{AttemptResult, CredentialPair, RunProgress};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinError;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Runs up to this size go out as a single batch
pub const SINGLE_BATCH_LIMIT: usize = 100;
/// Runs up to this size use `MEDIUM_BATCH_SIZE`
pub const MEDIUM_RUN_LIMIT: usize = 5_000;
pub const MEDIUM_BATCH_SIZE: usize = 50;
pub const LARGE_BATCH_SIZE: usize = 25;

pub fn batch_size_for(total: usize) -> usize {
    if total <= SINGLE_BATCH_LIMIT {
        total.max(1)
    } else if total <= MEDIUM_RUN_LIMIT {
        MEDIUM_BATCH_SIZE
    } else {
        LARGE_BATCH_SIZE
    }
}

/// What happened to a scheduled run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub processed: usize,
    pub batches_run: usize,
    /// The consumer went away before every batch was scheduled
    pub cancelled: bool,
}

pub struct BatchScheduler {
    concurrency: usize,
    batch_pause: Duration,
}

impl BatchScheduler {
    pub fn new(concurrency: usize, batch_pause: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            batch_pause,
        }
    }

    /// Run all `pairs`, sending `batch_info` and `result` events to `sink`.
    /// Batches run strictly one after another; attempts within a batch run
    /// concurrently and are reported in completion order.
    pub async fn run(
        &self,
        pairs: Vec<CredentialPair>,
        runner: Arc<dyn AttemptRunner>,
        sink: &mpsc::Sender<RunEvent>,
    ) -> ScheduleOutcome {
        let total = pairs.len();
        let batch_size = batch_size_for(total);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let mut outcome = ScheduleOutcome {
            processed: 0,
            batches_run: 0,
            cancelled: false,
        };

        for (index, batch) in pairs.chunks(batch_size).enumerate() {
            if outcome.cancelled {
                break;
            }
            if index > 0 && !self.batch_pause.is_zero() {
                sleep(self.batch_pause).await;
            }

            let start = index * batch_size + 1;
            let end = start + batch.len() - 1;
            info!(batch = index + 1, start, end, total, "Starting batch");

            if sink.send(RunEvent::batch_info(index + 1, start, end, total)).await.is_err() {
                warn!("Event consumer closed, no further batches will be scheduled");
                outcome.cancelled = true;
                break;
            }

            let mut in_flight = FuturesUnordered::new();
            for pair in batch.iter().cloned() {
                let semaphore = Arc::clone(&semaphore);
                let runner = Arc::clone(&runner);
                let worker_pair = pair.clone();

                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire().await;
                    runner.run(worker_pair).await
                });
                in_flight.push(async move { (pair, handle.await) });
            }

            while let Some((pair, joined)) = in_flight.next().await {
                let result = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        let detail = join_failure_detail(e);
                        warn!(identifier = %pair.identifier, "Attempt worker failed: {}", detail);
                        AttemptResult::errored(&pair, format!("Worker failed: {}", detail))
                    }
                };

                outcome.processed += 1;
                let event = RunEvent::Result {
                    result,
                    progress: RunProgress::new(outcome.processed, total),
                };

                // Keep draining after a closed sink so in-flight attempts finish
                if !outcome.cancelled && sink.send(event).await.is_err() {
                    warn!("Event consumer closed, finishing the current batch only");
                    outcome.cancelled = true;
                }
            }

            outcome.batches_run += 1;
            debug!(batch = index + 1, processed = outcome.processed, "Batch complete");
        }

        outcome
    }
}

fn join_failure_detail(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }

    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic with non-string payload".to_string()
    }
}
