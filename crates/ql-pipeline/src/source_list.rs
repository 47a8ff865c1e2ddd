//! Prefix-list source stage (batch / `s3imports` mode): paginates each
//! configured bucket, filters by `last_modified`, and feeds matching objects
//! into the shared object-refs channel.
//!
//! Grounded in `original_source/pipeline/s3lister.go`'s `S3ListerWorker`
//! (`s3ListerWorkers = 2`). Unlike the queue-poll stage this always runs to
//! completion exactly once per configured bucket; there is no notion of
//! re-polling in batch mode.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

use ql_common::{Counters, ObjectRef};
use ql_objectstore::ObjectStore;

use crate::context::{ParserContext, WorkItem};
use crate::tracker::CompletionTracker;

pub const DEFAULT_LIST_WORKERS: usize = 2;

/// One configured bucket/prefix to import, bounded by a `[since, to)` window.
pub struct PrefixSource {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
    pub prefix: String,
    pub context: Arc<ParserContext>,
    pub since: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub counters: Arc<dyn Counters>,
}

pub struct PrefixListSourceStage {
    objects_tx: mpsc::Sender<WorkItem>,
    shutdown: broadcast::Sender<()>,
}

impl PrefixListSourceStage {
    pub fn new(objects_tx: mpsc::Sender<WorkItem>, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            objects_tx,
            shutdown,
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        sources: Vec<PrefixSource>,
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

    async fn run(self: Arc<Self>, rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<PrefixSource>>>) {
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

    async fn drive(&self, source: PrefixSource) {
        let mut shutdown_rx = self.shutdown.subscribe();
        if shutdown_rx.try_recv().is_ok() {
            return;
        }

        let since = source.since;
        let to = source.to;
        let mut matched: Vec<ObjectRef> = Vec::new();
        let mut collect = |refs: Vec<ObjectRef>| {
            for object in refs {
                let in_window = object
                    .last_modified
                    .map(|lm| lm >= since && lm < to)
                    .unwrap_or(false);
                if in_window {
                    matched.push(object);
                }
            }
        };

        if let Err(e) = source.store.list(&source.bucket, &source.prefix, &mut collect).await {
            warn!(bucket = %source.bucket, prefix = %source.prefix, error = %e, "failed to list bucket");
            return;
        }

        info!(bucket = %source.bucket, prefix = %source.prefix, count = matched.len(), "listed objects for import");

        let tracker = CompletionTracker::noop(source.counters.clone());
        let total = matched.len() as u64;
        tracker.add_objects(total);

        for (i, object) in matched.into_iter().enumerate() {
            let item = WorkItem {
                object,
                context: source.context.clone(),
                tracker: tracker.clone(),
            };
            tokio::select! {
                result = self.objects_tx.send(item) => {
                    if result.is_err() {
                        warn!("object channel closed, aborting remaining listing");
                        let remaining = total - i as u64;
                        for _ in 0..remaining {
                            tracker.object_processed();
                        }
                        return;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(bucket = %source.bucket, prefix = %source.prefix, "stopping listing, shutdown requested");
                    let remaining = total - i as u64;
                    for _ in 0..remaining {
                        tracker.object_processed();
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ql_common::NullCounters;
    use ql_kind::Kind;
    use ql_logparsers::JsonLogParser;
    use ql_objectstore::{ObjectBody, ObjectStoreError};
    use std::collections::HashMap;

    struct FixedLister {
        objects: Vec<ObjectRef>,
    }

    #[async_trait::async_trait]
    impl ObjectStore for FixedLister {
        async fn get(&self, _object: &ObjectRef) -> Result<ObjectBody, ObjectStoreError> {
            unreachable!("not exercised in this test")
        }

        async fn list(
            &self,
            _bucket: &str,
            _prefix: &str,
            page: &mut (dyn FnMut(Vec<ObjectRef>) + Send),
        ) -> Result<u64, ObjectStoreError> {
            page(self.objects.clone());
            Ok(self.objects.len() as u64)
        }
    }

    fn test_context() -> Arc<ParserContext> {
        Arc::new(ParserContext {
            parser: Arc::new(JsonLogParser::new("timestamp", Kind::TimeIso8601)),
            key_regex: None,
            format_name: "json".to_string(),
            static_fields: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn filters_objects_outside_time_window() {
        let in_window = ObjectRef::new("b", "in.log")
            .with_last_modified(DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z").unwrap().with_timezone(&Utc));
        let too_early = ObjectRef::new("b", "early.log")
            .with_last_modified(DateTime::parse_from_rfc3339("2023-01-01T00:00:00Z").unwrap().with_timezone(&Utc));
        let store = Arc::new(FixedLister {
            objects: vec![in_window, too_early],
        });

        let (objects_tx, mut objects_rx) = mpsc::channel(10);
        let (shutdown_tx, _rx) = broadcast::channel(1);
        let stage = Arc::new(PrefixListSourceStage::new(objects_tx, shutdown_tx));

        let source = PrefixSource {
            store,
            bucket: "b".to_string(),
            prefix: "".to_string(),
            context: test_context(),
            since: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            to: DateTime::parse_from_rfc3339("2024-02-01T00:00:00Z").unwrap().with_timezone(&Utc),
            counters: Arc::new(NullCounters),
        };

        for handle in stage.spawn(vec![source], 1) {
            handle.await.unwrap();
        }

        let item = objects_rx.try_recv().expect("one object within window");
        assert_eq!(item.object.key, "in.log");
        assert!(objects_rx.try_recv().is_err());
    }
}
