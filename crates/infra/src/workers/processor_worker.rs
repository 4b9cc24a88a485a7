use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskpipe_core::TASKS_INPUT_TOPIC;
use taskpipe_queue::{MessageQueue, QueueError, Subscription};

use crate::processor::{ProcessOutcome, TaskProcessor};

const BATCH_SIZE: usize = 16;
const POLL_WAIT: Duration = Duration::from_millis(250);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Handle to stop and join a running worker.
///
/// Dropping the handle also stops the loops, without waiting for them.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Number of partition loops this worker runs.
    pub fn partitions(&self) -> usize {
        self.joins.len()
    }

    /// Request graceful shutdown and wait for every partition loop to stop.
    ///
    /// A loop finishes the delivery it is handling before it exits.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "processor loop ended abnormally");
            }
        }
    }
}

/// Consumes `tasks-input` and feeds each record to a [`TaskProcessor`].
///
/// - One tokio task per partition; partitions are processed concurrently,
///   records within a partition strictly in order
/// - Every delivery is acknowledged once handled, whatever the outcome
/// - Transport errors are logged and the loop keeps polling
#[derive(Debug)]
pub struct ProcessorWorker;

impl ProcessorWorker {
    /// Join `group` on every partition of `tasks-input` and start consuming.
    ///
    /// All subscriptions are established before this returns, so records
    /// published afterwards are seen even with a latest-offset reset.
    pub async fn spawn(
        queue: Arc<dyn MessageQueue>,
        group: &str,
        processor: TaskProcessor,
    ) -> Result<WorkerHandle, QueueError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let partitions = queue.partition_count();
        let mut subscriptions = Vec::with_capacity(partitions as usize);
        for partition in 0..partitions {
            subscriptions.push((
                partition,
                queue.subscribe(TASKS_INPUT_TOPIC, group, partition).await?,
            ));
        }

        let joins = subscriptions
            .into_iter()
            .map(|(partition, sub)| {
                tokio::spawn(worker_loop(
                    partition,
                    sub,
                    processor.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(group, partitions, topic = TASKS_INPUT_TOPIC, "processor worker started");

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            joins,
        })
    }
}

async fn worker_loop(
    partition: u32,
    mut sub: Box<dyn Subscription>,
    processor: TaskProcessor,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let batch = tokio::select! {
            _ = shutdown.changed() => break,
            batch = sub.next_batch(BATCH_SIZE, POLL_WAIT) => batch,
        };

        let deliveries = match batch {
            Ok(deliveries) => deliveries,
            Err(e) => {
                warn!(partition, error = %e, "failed to poll tasks-input");
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }
        };

        for delivery in deliveries {
            if let ProcessOutcome::Dropped = processor.handle(&delivery.value).await {
                debug!(partition, id = %delivery.id, "input record dropped");
            }
            if let Err(e) = sub.ack(&delivery).await {
                warn!(partition, id = %delivery.id, error = %e, "failed to acknowledge input record");
            }
        }
    }

    debug!(partition, "processor loop stopped");
}
