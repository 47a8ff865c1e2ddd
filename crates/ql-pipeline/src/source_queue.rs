//! Queue-poll source stage: long-polls configured SQS queues, extracts the
//! S3 object references each notification announces, and feeds them into the
//! shared object-refs channel.
//!
//! Grounded in `original_source/pipeline/sqsconsumer.go`'s `SQSConsumerWorker`
//! (`sqsConsumerWorkers = 2`) and `input/sqs/input.go` (one long-lived
//! queue handle per configured queue, assigned to whichever worker picks it
//! up first and held for that worker's whole lifetime).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

use ql_common::{Counters, NotificationMessage};
use ql_queue::NotificationQueue;

use crate::context::{ParserContext, WorkItem};
use crate::tracker::CompletionTracker;

pub const DEFAULT_QUEUE_POLL_WORKERS: usize = 2;
const RECEIVE_BATCH_SIZE: u32 = 10;

/// One configured SQS queue plus the parsing context events read from it use.
pub struct QueueSource {
    pub queue: Arc<dyn NotificationQueue>,
    pub context: Arc<ParserContext>,
    pub keep_messages: bool,
    pub poll_frequency: Duration,
    pub counters: Arc<dyn Counters>,
}

pub struct QueuePollSourceStage {
    objects_tx: mpsc::Sender<WorkItem>,
    shutdown: broadcast::Sender<()>,
    once: bool,
}

impl QueuePollSourceStage {
    pub fn new(objects_tx: mpsc::Sender<WorkItem>, shutdown: broadcast::Sender<()>, once: bool) -> Self {
        Self {
            objects_tx,
            shutdown,
            once,
        }
    }

    /// Hands `sources` out across `workers` long-lived tasks; a worker that
    /// finishes one queue (shutdown aside, this only happens in `--once`
    /// mode) picks up the next configured queue, if any remain.
    pub fn spawn(
        self: Arc<Self>,
        sources: Vec<QueueSource>,
        workers: usize,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let (tx, rx) = mpsc::unbounded_channel();
        for source in sources {
            let _ = tx.send(source);
        }
        drop(tx);

        let rx = Arc::new(AsyncMutex::new(rx));
        (0..workers)
            .map(|_| {
                let stage = self.clone();
                let rx = rx.clone();
                tokio::spawn(async move { stage.run(rx).await })
            })
            .collect()
    }

    async fn run(self: Arc<Self>, rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<QueueSource>>>) {
        loop {
            let source = {
                let mut guard = rx.lock().await;
                guard.recv().await
            };
            let Some(source) = source else {
                return;
            };
            self.drive(source).await;
        }
    }

    async fn drive(&self, source: QueueSource) {
        // A single receiver threaded sequentially through drain()/
        // handle_message() rather than a second one raced against the whole
        // drain() future from out here: two independent receivers listening
        // for the same broadcast can both become ready on the same poll, and
        // tokio::select! would be free to pick this outer one, cancelling
        // drain() out from under its own in-progress accounting. Cancellation
        // is only safe at the specific points drain()/handle_message() select
        // on this receiver themselves (queue receive, and between each
        // dispatched ref), never around the compound operation as a whole.
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            let Some(more) = self.drain(&source, &mut shutdown_rx).await else {
                info!(queue = %source.queue.identifier(), "stopping queue poll, shutdown requested");
                return;
            };

            if self.once && !more {
                return;
            }
            if !self.once {
                tokio::select! {
                    _ = tokio::time::sleep(source.poll_frequency) => {},
                    _ = shutdown_rx.recv() => {
                        info!(queue = %source.queue.identifier(), "stopping queue poll, shutdown requested");
                        return;
                    }
                }
            }
        }
    }

    /// Drains full batches back-to-back; returns whether the last receive
    /// call returned a full batch (a `receive` error ends the tick early,
    /// relying on the next scheduled poll rather than retrying in-process),
    /// or `None` if shutdown was observed, either while blocked on `receive`
    /// (nothing in flight yet, safe to cancel) or while dispatching a
    /// notification's objects (every ref already counted against its
    /// tracker has either been sent or explicitly marked processed, so no
    /// tracker is left partially incremented).
    async fn drain(&self, source: &QueueSource, shutdown_rx: &mut broadcast::Receiver<()>) -> Option<bool> {
        loop {
            let messages = tokio::select! {
                result = source.queue.receive(RECEIVE_BATCH_SIZE) => match result {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(queue = %source.queue.identifier(), error = %e, "failed to receive notifications, will retry next poll");
                        return Some(false);
                    }
                },
                _ = shutdown_rx.recv() => return None,
            };
            let count = messages.len();
            for message in messages {
                self.handle_message(source, message, shutdown_rx).await?;
            }
            if (count as u32) < RECEIVE_BATCH_SIZE {
                return Some(false);
            }
        }
    }

    /// Returns `None` if shutdown fired while dispatching this notification's
    /// refs; every ref not yet sent is walked back out of the tracker via
    /// `object_processed()` so the tracker still reaches zero and the
    /// notification is left undeleted for redelivery.
    async fn handle_message(
        &self,
        source: &QueueSource,
        message: NotificationMessage,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Option<()> {
        let refs = ql_notify::extract_object_refs(&message.body);
        let tracker = CompletionTracker::new(
            source.queue.clone(),
            message.receipt_token.clone(),
            source.keep_messages,
            source.counters.clone(),
        );

        // One SQS message counted active for its whole lifetime, regardless
        // of how many (if any) objects it announces; released via the
        // completion callback once its tracker drains, mirroring
        // sqsconsumer.go's wgSQSMessages.Add(1)/OnDelete(wgSQSMessages.Done).
        source.counters.sqs_messages_active(1);
        let counters_for_completion = source.counters.clone();
        tracker.on_complete(move || counters_for_completion.sqs_messages_active(-1));

        if refs.is_empty() {
            warn!(queue = %source.queue.identifier(), message_id = %message.message_id, "no S3 objects extracted from notification, marking done");
        }
        // One increment for the whole batch, after extraction; never a
        // per-object increment during the extraction loop itself.
        let total = refs.len() as u64;
        tracker.add_objects(total);

        for (i, object) in refs.into_iter().enumerate() {
            let item = WorkItem {
                object,
                context: source.context.clone(),
                tracker: tracker.clone(),
            };
            tokio::select! {
                result = self.objects_tx.send(item) => {
                    if result.is_err() {
                        warn!("object channel closed, dropping remaining refs for this notification");
                        let remaining = total - i as u64;
                        for _ in 0..remaining {
                            tracker.object_processed();
                        }
                        return Some(());
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(queue = %source.queue.identifier(), "shutdown requested mid-dispatch, accounting for undispatched refs");
                    let remaining = total - i as u64;
                    for _ in 0..remaining {
                        tracker.object_processed();
                    }
                    return None;
                }
            }
        }
        Some(())
    }
}
