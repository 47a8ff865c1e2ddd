//! Object-reader stage: a fixed-size worker pool that pulls `WorkItem`s off
//! the shared object-refs channel, streams each object through its parser,
//! and publishes the resulting events to the sink.
//!
//! Grounded in `original_source/pipeline/s3reader.go`'s `S3ReaderWorker`.
//! Ordering within `onS3ObjectFromSQSMessage` is preserved exactly: key-regex
//! fields are computed first (a mismatch only warns), then merged into the
//! parser's fields *last* so they win on collision (DESIGN.md decision 1);
//! the tracker's object-processed decrement fires only once the object's
//! stream has been fully read and closed, regardless of whether the object
//! opened cleanly or produced any per-line errors.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tracing::warn;

use ql_common::Counters;
use ql_objectstore::ObjectStore;
use ql_sink::{EventSink, OutboundEvent};

use crate::context::WorkItem;

pub const DEFAULT_READER_WORKERS: usize = 5;

pub struct ObjectReaderStage {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn EventSink>,
    counters: Arc<dyn Counters>,
}

impl ObjectReaderStage {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        sink: Arc<dyn EventSink>,
        counters: Arc<dyn Counters>,
    ) -> Self {
        Self {
            store,
            sink,
            counters,
        }
    }

    /// Spawns `workers` tasks sharing `receiver`; the pool drains naturally
    /// and every task exits once the channel is closed and empty (the
    /// supervisor triggers this by dropping every clone of the sender).
    pub fn spawn_pool(
        self: Arc<Self>,
        workers: usize,
        receiver: mpsc::Receiver<WorkItem>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let receiver = Arc::new(AsyncMutex::new(receiver));
        (0..workers)
            .map(|_| {
                let stage = self.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move { stage.run(receiver).await })
            })
            .collect()
    }

    async fn run(self: Arc<Self>, receiver: Arc<AsyncMutex<mpsc::Receiver<WorkItem>>>) {
        loop {
            let item = {
                let mut guard = receiver.lock().await;
                guard.recv().await
            };
            let Some(item) = item else {
                return;
            };
            self.process(item).await;
        }
    }

    async fn process(&self, item: WorkItem) {
        let WorkItem {
            object,
            context,
            tracker,
        } = item;

        let key_fields = context.key_fields(&object.key);
        let bucket = object.bucket.clone();
        let key = object.key.clone();

        let mut reader = match self.store.get(&object).await {
            Ok(reader) => reader,
            Err(e) => {
                warn!(%bucket, %key, error = %e, "failed to open object, skipping");
                self.counters.object_errors(1);
                tracker.object_processed();
                return;
            }
        };

        let tracker_for_events = tracker.clone();
        let format_name = context.format_name.clone();
        let static_fields = context.static_fields.clone();

        // `on_event` is a synchronous callback (the parser loop can't await
        // between lines), but `sink.publish` is async and must see this
        // object's events in file order — a bare `tokio::spawn` per event
        // would let the runtime interleave them. An unbounded channel drained
        // by a single forwarding task serializes the publishes in arrival
        // order without blocking the parse loop.
        let (publish_tx, mut publish_rx) = mpsc::unbounded_channel::<OutboundEvent>();
        let sink = self.sink.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(outbound) = publish_rx.recv().await {
                sink.publish(outbound).await;
            }
        });

        let mut on_event = |mut event: ql_common::Event| {
            let mut fields = static_fields.clone();
            fields.extend(event.fields.drain());
            fields.extend(key_fields.clone());
            event.fields = fields;
            event = event.with_meta("format", serde_json::json!(format_name));

            tracker_for_events.add_events(1);
            let private: ql_sink::Private = tracker_for_events.clone();
            let outbound = OutboundEvent::new(event, private);
            let _ = publish_tx.send(outbound);
        };

        let counters = self.counters.clone();
        let on_line_error_bucket = bucket.clone();
        let on_line_error_key = key.clone();
        let mut on_line_error = move |raw_line: &str, err: ql_logparsers::ParseLineError| {
            counters.parser_errors(1);
            warn!(bucket = %on_line_error_bucket, key = %on_line_error_key, line = %raw_line.trim_end(), error = %err, "line parse error");
        };

        if let Err(e) = context
            .parser
            .parse(&mut reader, &mut on_event, &mut on_line_error)
            .await
        {
            warn!(error = %e, "object read error");
            self.counters.object_errors(1);
        }

        // `on_event` owns the only remaining `publish_tx` clone; dropping it
        // closes the channel so the forwarder task sees `recv() == None`
        // once it has drained everything already sent.
        drop(on_event);
        let _ = forwarder.await;

        tracker.object_processed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ql_common::{NullCounters, ObjectRef};
    use ql_kind::Kind;
    use ql_logparsers::JsonLogParser;
    use ql_sink::ImmediateAckSink;
    use std::collections::HashMap;
    use std::io::Cursor;
    use tokio::io::BufReader;

    struct FixedObjectStore {
        body: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl ObjectStore for FixedObjectStore {
        async fn get(
            &self,
            _object: &ObjectRef,
        ) -> Result<ql_objectstore::ObjectBody, ql_objectstore::ObjectStoreError> {
            Ok(Box::new(BufReader::new(Cursor::new(self.body.clone()))))
        }

        async fn list(
            &self,
            _bucket: &str,
            _prefix: &str,
            _page: &mut (dyn FnMut(Vec<ObjectRef>) + Send),
        ) -> Result<u64, ql_objectstore::ObjectStoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn processes_object_merges_fields_and_marks_done() {
        let body = br#"{"timestamp":"2024-01-01T00:00:00Z","status":200}"#.to_vec();
        let store: Arc<dyn ObjectStore> = Arc::new(FixedObjectStore { body });
        let sink = Arc::new(ImmediateAckSink::new());
        let acked = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let acked_clone = acked.clone();
        let sink_dyn: Arc<dyn EventSink> = sink.clone();
        sink_dyn.set_ack_handler(Box::new(move |batch| {
            acked_clone.fetch_add(batch.len(), std::sync::atomic::Ordering::SeqCst);
        }));

        let stage = Arc::new(ObjectReaderStage::new(
            store,
            sink_dyn,
            Arc::new(NullCounters),
        ));

        let context = Arc::new(crate::context::ParserContext {
            parser: Arc::new(JsonLogParser::new("timestamp", Kind::TimeIso8601)),
            key_regex: None,
            format_name: "json".to_string(),
            static_fields: HashMap::new(),
        });
        let tracker = crate::tracker::CompletionTracker::noop(Arc::new(NullCounters));
        tracker.add_objects(1);

        stage
            .process(WorkItem {
                object: ObjectRef::new("bucket", "key.log"),
                context,
                tracker: tracker.clone(),
            })
            .await;

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(acked.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
