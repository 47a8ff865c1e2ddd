//! Per-notification completion accounting.
//!
//! One `CompletionTracker` is created per queue notification. It is told how
//! many objects that notification announced, and is poked once per object as
//! it finishes being read and once per event as the sink acks it. When both
//! counters reach zero the notification is considered fully drained and the
//! tracker deletes it from the source queue (unless the caller asked to keep
//! messages around, e.g. for replay/debugging).
//!
//! Grounded in `original_source/pipeline/sqsmessage.go`'s `SQSMessage`: the
//! object count is incremented once, by the final extracted count, not
//! per-object during extraction (see `add_objects`) — this is what prevents a
//! fast reader from observing "zero pending" before every object from one
//! notification has even been enqueued. The completion-callback registry
//! (`on_complete`) mirrors `SQSMessage.OnDelete`/`onDeleteCallbacks`, which the
//! queue-poll stage uses to decrement its active-message gauge independently
//! of the queue-delete action itself.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, warn};

use ql_common::Counters;
use ql_queue::NotificationQueue;

struct Inner {
    pending_objects: i64,
    pending_events: i64,
    completed: bool,
    on_complete_callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

pub struct CompletionTracker {
    inner: Mutex<Inner>,
    queue: Option<Arc<dyn NotificationQueue>>,
    receipt_token: String,
    keep_messages: bool,
    counters: Arc<dyn Counters>,
}

impl CompletionTracker {
    /// A tracker backed by a real notification queue: completion deletes the
    /// message (service / queue-poll mode).
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        receipt_token: String,
        keep_messages: bool,
        counters: Arc<dyn Counters>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                pending_objects: 0,
                pending_events: 0,
                completed: false,
                on_complete_callbacks: Vec::new(),
            }),
            queue: Some(queue),
            receipt_token,
            keep_messages,
            counters,
        })
    }

    /// A tracker with no backing message to delete: batch / prefix-list mode,
    /// mirroring the source's `S3ObjectProcessNotificationsIgnorer`.
    pub fn noop(counters: Arc<dyn Counters>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                pending_objects: 0,
                pending_events: 0,
                completed: false,
                on_complete_callbacks: Vec::new(),
            }),
            queue: None,
            receipt_token: String::new(),
            keep_messages: true,
            counters,
        })
    }

    /// Registers `n` objects as pending. Must be called exactly once, with
    /// the final count, after the notification body has been fully decoded —
    /// never incrementally while extraction is still in progress.
    pub fn add_objects(self: &Arc<Self>, n: u64) {
        self.counters.objects_added(n);
        let mut guard = self.inner.lock();
        guard.pending_objects += n as i64;
        self.maybe_complete(guard);
    }

    pub fn object_processed(self: &Arc<Self>) {
        self.counters.objects_done(1);
        let mut guard = self.inner.lock();
        guard.pending_objects -= 1;
        self.maybe_complete(guard);
    }

    pub fn add_events(&self, n: u64) {
        self.counters.events_added(n);
        self.inner.lock().pending_events += n as i64;
    }

    pub fn event_acked(self: &Arc<Self>) {
        self.counters.events_acked(1);
        let mut guard = self.inner.lock();
        guard.pending_events -= 1;
        if guard.pending_events < 0 {
            // Mirrors sqsmessage.go's panic on over-ack: this can only happen
            // from a sink double-acking or a private-handle mixup, both bugs
            // worth crashing loudly for rather than silently miscounting.
            error!("acked more events than were added for this notification");
            panic!("acked more events than added");
        }
        self.maybe_complete(guard);
    }

    /// Registers a callback to run exactly once, when both counters reach
    /// zero. If they've already reached zero by the time this is called, the
    /// callback runs synchronously, on the caller's thread, before returning.
    pub fn on_complete(self: &Arc<Self>, callback: impl FnOnce() + Send + 'static) {
        let mut guard = self.inner.lock();
        if guard.completed {
            drop(guard);
            callback();
        } else {
            guard.on_complete_callbacks.push(Box::new(callback));
        }
    }

    fn maybe_complete(self: &Arc<Self>, mut guard: parking_lot::MutexGuard<'_, Inner>) {
        if guard.completed || guard.pending_objects != 0 || guard.pending_events != 0 {
            return;
        }
        guard.completed = true;
        let callbacks = std::mem::take(&mut guard.on_complete_callbacks);
        drop(guard);
        for callback in callbacks {
            callback();
        }
        self.spawn_completion();
    }

    fn spawn_completion(self: &Arc<Self>) {
        let Some(queue) = self.queue.clone() else {
            return;
        };
        if self.keep_messages {
            return;
        }
        let receipt_token = self.receipt_token.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.delete(&receipt_token).await {
                warn!(error = %e, "failed to delete completed notification from queue");
            }
        });
    }
}
