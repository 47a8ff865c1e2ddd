//! The downstream publish contract. The pipeline is agnostic to the sink's
//! transport; this crate only fixes the handoff shape and ACK-correlation
//! convention (an opaque `private` handle carried from publish to ack).

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use ql_common::Event;

/// Opaque handle round-tripped from `publish` back through `set_ack_handler`.
/// The pipeline attaches a `CompletionTracker` here; the sink never inspects
/// it, only carries it.
pub type Private = Arc<dyn Any + Send + Sync>;

pub struct OutboundEvent {
    pub event: Event,
    pub private: Private,
}

impl OutboundEvent {
    pub fn new(event: Event, private: Private) -> Self {
        Self { event, private }
    }
}

pub type AckHandler = Box<dyn Fn(Vec<Private>) + Send + Sync>;

/// Downstream publish pipeline. `publish` is non-blocking best-effort but may
/// block under backpressure; ACKs for previously published events arrive
/// later, in batches, via the handler registered through `set_ack_handler`.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: OutboundEvent);

    /// Registers the single handler invoked with batches of `private`
    /// handles as their events are durably accepted.
    fn set_ack_handler(&self, handler: AckHandler);

    async fn close(&self);
}

/// Discards events; acks nothing. Useful for dry runs and tests that don't
/// care about ACK accounting.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn publish(&self, _event: OutboundEvent) {}
    fn set_ack_handler(&self, _handler: AckHandler) {}
    async fn close(&self) {}
}

/// Immediately acks every published event on the caller's task, one event
/// per batch. Used in tests that exercise the completion-tracker wiring
/// without a real transport.
pub struct ImmediateAckSink {
    handler: parking_lot::Mutex<Option<AckHandler>>,
}

impl ImmediateAckSink {
    pub fn new() -> Self {
        Self {
            handler: parking_lot::Mutex::new(None),
        }
    }
}

impl Default for ImmediateAckSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for ImmediateAckSink {
    async fn publish(&self, event: OutboundEvent) {
        if let Some(handler) = self.handler.lock().as_ref() {
            handler(vec![event.private]);
        }
    }

    fn set_ack_handler(&self, handler: AckHandler) {
        *self.handler.lock() = Some(handler);
    }

    async fn close(&self) {}
}

/// Serializes every event as a JSON line to stdout and acks it immediately
/// on the same task. Not a production publisher pipeline — the CLI's
/// default sink when no other transport is wired up, standing in for the
/// downstream `EventSink` this crate only specifies the contract for.
pub struct StdoutSink {
    handler: parking_lot::Mutex<Option<AckHandler>>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            handler: parking_lot::Mutex::new(None),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for StdoutSink {
    async fn publish(&self, event: OutboundEvent) {
        match serde_json::to_string(&event.event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize event for stdout sink"),
        }
        if let Some(handler) = self.handler.lock().as_ref() {
            handler(vec![event.private]);
        }
    }

    fn set_ack_handler(&self, handler: AckHandler) {
        *self.handler.lock() = Some(handler);
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn immediate_ack_sink_fires_handler_synchronously() {
        let sink = ImmediateAckSink::new();
        let acked = Arc::new(AtomicUsize::new(0));
        let acked_clone = acked.clone();
        sink.set_ack_handler(Box::new(move |batch| {
            acked_clone.fetch_add(batch.len(), Ordering::SeqCst);
        }));

        let event = Event::new(chrono::Utc::now(), HashMap::new());
        sink.publish(OutboundEvent::new(event, Arc::new(42u64))).await;
        assert_eq!(acked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stdout_sink_acks_every_published_event() {
        let sink = StdoutSink::new();
        let acked = Arc::new(AtomicUsize::new(0));
        let acked_clone = acked.clone();
        sink.set_ack_handler(Box::new(move |batch| {
            acked_clone.fetch_add(batch.len(), Ordering::SeqCst);
        }));

        let event = Event::new(chrono::Utc::now(), HashMap::new());
        sink.publish(OutboundEvent::new(event, Arc::new(1u64))).await;
        assert_eq!(acked.load(Ordering::SeqCst), 1);
    }
}
