//! Ack router: the single consumer of ack batches coming back from the
//! sink, dispatching each handle to the `CompletionTracker` that produced it.
//!
//! Grounded in `original_source/beater/acker.go`'s `ackEvents`, which filters
//! a batch of opaque `interface{}` values down to the ones implementing
//! `S3ObjectProcessNotifications` and calls `EventACKed` on each. Here the
//! filter is a downcast of the `Private` handle back to `Arc<CompletionTracker>`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use ql_sink::Private;

use crate::tracker::CompletionTracker;

pub const DEFAULT_ACK_CHANNEL_CAPACITY: usize = 64;

/// Spawns the router task and returns the handler to register with the sink
/// via `EventSink::set_ack_handler`, plus the task's join handle.
///
/// Batches are processed strictly in arrival order: the sink calls the
/// handler synchronously (pushing onto the channel), and the router task
/// drains them one batch at a time.
pub fn spawn_ack_router() -> (
    ql_sink::AckHandler,
    tokio::task::JoinHandle<()>,
    mpsc::Sender<Vec<Private>>,
) {
    let (tx, mut rx) = mpsc::channel::<Vec<Private>>(DEFAULT_ACK_CHANNEL_CAPACITY);
    let tx_for_handler = tx.clone();

    let handle = tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            for private in batch {
                match private.downcast::<CompletionTracker>() {
                    Ok(tracker) => tracker.event_acked(),
                    Err(_) => {
                        error!("ack batch contained a private handle that isn't a CompletionTracker");
                    }
                }
            }
        }
    });

    let handler: ql_sink::AckHandler = Box::new(move |batch| {
        if tx_for_handler.try_send(batch).is_err() {
            error!("ack router channel full or closed, dropping ack batch");
        }
    });

    (handler, handle, tx)
}
