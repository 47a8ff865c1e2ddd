//! Supervisor / shutdown coordinator (spec.md §4.9): owns the object-refs
//! channel and the reader pool, drives a configured source stage to
//! completion, and sequences the four shutdown phases in both service and
//! batch mode.
//!
//! Grounded in `bin/fc-stream-processor`'s broadcast-channel shutdown signal
//! and timed-join pattern, generalized from "one watcher + one http server"
//! to "one source pool + one reader pool + an ack router".

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use ql_common::Counters;
use ql_objectstore::ObjectStore;
use ql_sink::EventSink;

use crate::ack_router::spawn_ack_router;
use crate::context::WorkItem;
use crate::counters::PipelineCounters;
use crate::reader::{ObjectReaderStage, DEFAULT_READER_WORKERS};
use crate::source_list::{PrefixListSourceStage, PrefixSource, DEFAULT_LIST_WORKERS};
use crate::source_queue::{QueuePollSourceStage, QueueSource, DEFAULT_QUEUE_POLL_WORKERS};

pub const DEFAULT_OBJECTS_CHANNEL_CAPACITY: usize = 10;

/// Final tallies after a run completes, for the CLI to log and turn into an
/// exit code.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineResult {
    pub objects_active: i64,
    pub events_active: i64,
    pub object_errors: u64,
    pub parser_errors: u64,
}

impl PipelineResult {
    /// Whether shutdown phase 3 (event drain) completed cleanly, i.e. no
    /// `shutdown_timeout` cutoff left anything unacked.
    pub fn drained_cleanly(&self) -> bool {
        self.events_active == 0
    }
}

pub struct Supervisor {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn EventSink>,
    counters: Arc<PipelineCounters>,
    shutdown_tx: broadcast::Sender<()>,
    reader_workers: usize,
}

impl Supervisor {
    pub fn new(store: Arc<dyn ObjectStore>, sink: Arc<dyn EventSink>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            sink,
            counters: Arc::new(PipelineCounters::new()),
            shutdown_tx,
            reader_workers: DEFAULT_READER_WORKERS,
        }
    }

    pub fn with_reader_workers(mut self, n: usize) -> Self {
        self.reader_workers = n.max(1);
        self
    }

    pub fn counters(&self) -> Arc<PipelineCounters> {
        self.counters.clone()
    }

    /// A sender the caller can use to request shutdown (e.g. from a Ctrl+C
    /// handler run concurrently with `run_service`/`run_batch`). Must be
    /// obtained before the run call, which consumes `self`.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Service mode: long-running (or, with `once`, single-drain) queue-poll
    /// sources feeding the reader pool.
    pub async fn run_service(
        self,
        sources: Vec<QueueSource>,
        once: bool,
        shutdown_timeout: Duration,
    ) -> PipelineResult {
        let workers = DEFAULT_QUEUE_POLL_WORKERS.min(sources.len().max(1));
        self.run(shutdown_timeout, move |objects_tx, shutdown_tx| {
            let stage = Arc::new(QueuePollSourceStage::new(objects_tx, shutdown_tx, once));
            stage.spawn(sources, workers)
        })
        .await
    }

    /// Batch mode: prefix-list sources, each of which always runs to
    /// completion exactly once (there is no notion of re-polling here).
    pub async fn run_batch(self, sources: Vec<PrefixSource>, shutdown_timeout: Duration) -> PipelineResult {
        let workers = DEFAULT_LIST_WORKERS.min(sources.len().max(1));
        self.run(shutdown_timeout, move |objects_tx, shutdown_tx| {
            let stage = Arc::new(PrefixListSourceStage::new(objects_tx, shutdown_tx));
            stage.spawn(sources, workers)
        })
        .await
    }

    async fn run(
        self,
        shutdown_timeout: Duration,
        spawn_source: impl FnOnce(mpsc::Sender<WorkItem>, broadcast::Sender<()>) -> Vec<tokio::task::JoinHandle<()>>,
    ) -> PipelineResult {
        let (objects_tx, objects_rx) = mpsc::channel(DEFAULT_OBJECTS_CHANNEL_CAPACITY);

        let (ack_handler, ack_handle, _ack_tx) = spawn_ack_router();
        self.sink.set_ack_handler(ack_handler);

        let counters: Arc<dyn Counters> = self.counters.clone();
        let reader_stage = Arc::new(ObjectReaderStage::new(
            self.store.clone(),
            self.sink.clone(),
            counters,
        ));
        let reader_handles = reader_stage.spawn_pool(self.reader_workers, objects_rx);

        // The closure below owns the only live clone of `objects_tx`; once
        // every source worker task it spawns has exited, that clone (and the
        // sender inside each source stage's Arc) drops, closing the channel
        // and letting the reader pool drain naturally in phase 2.
        let source_handles = spawn_source(objects_tx, self.shutdown_tx.clone());

        for handle in source_handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "source worker task panicked");
            }
        }
        info!("source stage drained, closing object-refs channel");

        for handle in reader_handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "reader worker task panicked");
            }
        }
        info!("reader stage drained, waiting for in-flight events to be acked");

        let drain_events = async {
            while self.counters.events_active() > 0 {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        };
        if shutdown_timeout.is_zero() {
            drain_events.await;
        } else if tokio::time::timeout(shutdown_timeout, drain_events)
            .await
            .is_err()
        {
            warn!(
                remaining = self.counters.events_active(),
                timeout_secs = shutdown_timeout.as_secs(),
                "shutdown timeout elapsed with events still unacked"
            );
        }

        self.sink.close().await;
        ack_handle.abort();
        info!("sink closed, ack router stopped");

        PipelineResult {
            objects_active: self.counters.objects_active(),
            events_active: self.counters.events_active(),
            object_errors: self.counters.object_error_total(),
            parser_errors: self.counters.parser_error_total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ql_common::ObjectRef;
    use ql_kind::Kind;
    use ql_logparsers::JsonLogParser;
    use ql_queue::NotificationQueue;
    use ql_sink::ImmediateAckSink;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
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

    struct OneShotQueue {
        body: String,
        served: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl NotificationQueue for OneShotQueue {
        fn identifier(&self) -> &str {
            "test-queue"
        }

        async fn receive(&self, _max_messages: u32) -> ql_queue::Result<Vec<ql_common::NotificationMessage>> {
            if self.served.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![ql_common::NotificationMessage::new(
                    "m1",
                    "receipt-1",
                    self.body.clone(),
                )])
            } else {
                Ok(Vec::new())
            }
        }

        async fn delete(&self, _receipt_token: &str) -> ql_queue::Result<()> {
            Ok(())
        }
    }

    fn test_context() -> Arc<crate::ParserContext> {
        Arc::new(crate::ParserContext {
            parser: Arc::new(JsonLogParser::new("timestamp", Kind::TimeIso8601)),
            key_regex: None,
            format_name: "json".to_string(),
            static_fields: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn once_mode_service_run_drains_and_acks_everything() {
        let body = br#"{"timestamp":"2024-01-01T00:00:00Z","status":200}"#.to_vec();
        let store: Arc<dyn ObjectStore> = Arc::new(FixedObjectStore { body });
        let sink = Arc::new(ImmediateAckSink::new());
        let sink_dyn: Arc<dyn EventSink> = sink.clone();

        let supervisor = Supervisor::new(store, sink_dyn).with_reader_workers(2);

        let queue_body = r#"{"Records":[{"eventSource":"aws:s3","eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"b"},"object":{"key":"logs/a.log","size":10}}}]}"#.to_string();
        let queue = Arc::new(OneShotQueue {
            body: queue_body,
            served: AtomicUsize::new(0),
        });

        let source = QueueSource {
            queue,
            context: test_context(),
            keep_messages: true,
            poll_frequency: Duration::from_millis(5),
            counters: Arc::new(ql_common::NullCounters),
        };

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.run_service(vec![source], true, Duration::from_secs(2)),
        )
        .await
        .expect("once-mode run completes promptly");

        assert_eq!(result.objects_active, 0);
        assert_eq!(result.events_active, 0);
        assert!(result.drained_cleanly());
    }
}
