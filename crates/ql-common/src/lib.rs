use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod logging;

// ============================================================================
// Core data model
// ============================================================================

/// A flat bag of event/meta fields. Values carry the dynamic typing produced
/// by kind coercion (string, number, bool, or nested JSON for raw bodies).
pub type FieldMap = HashMap<String, serde_json::Value>;

/// Identifies one stored object plus whatever listing/notification metadata
/// was available when the reference was created.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
    pub size: Option<i64>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size: None,
            last_modified: None,
        }
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    /// Whether this object should be transparently gunzipped when read.
    ///
    /// Suffix-only detection, carried over from the source system; objects
    /// compressed under a different extension are read as raw bytes.
    pub fn is_gzip(&self) -> bool {
        self.key.ends_with(".gz")
    }
}

/// A source-queue delivery describing zero or more object-creation events.
#[derive(Debug, Clone)]
pub struct NotificationMessage {
    pub message_id: String,
    pub receipt_token: String,
    pub body: String,
    /// The queue's checksum of `body`, when the queue backend supplies one
    /// (e.g. SQS's `MD5OfBody` attribute). Not verified on the hot path.
    pub body_checksum: Option<String>,
}

impl NotificationMessage {
    pub fn new(
        message_id: impl Into<String>,
        receipt_token: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            receipt_token: receipt_token.into(),
            body: body.into(),
            body_checksum: None,
        }
    }

    pub fn with_body_checksum(mut self, body_checksum: impl Into<String>) -> Self {
        self.body_checksum = Some(body_checksum.into());
        self
    }
}

/// The unit delivered to the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub fields: FieldMap,
    pub meta: FieldMap,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, fields: FieldMap) -> Self {
        Self {
            timestamp,
            fields,
            meta: FieldMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Abstract metrics interface the pipeline updates at each accounting point.
/// Out of scope for this crate's own SDK (spec.md §1); concrete backends
/// live in `ql-pipeline`.
pub trait Counters: Send + Sync {
    fn objects_added(&self, n: u64);
    fn objects_done(&self, n: u64);
    fn object_errors(&self, n: u64);
    fn events_added(&self, n: u64);
    fn events_acked(&self, n: u64);
    fn parser_errors(&self, n: u64);
    fn sqs_messages_active(&self, delta: i64);
}

/// A `Counters` implementation that discards everything. Used by tests and
/// by batch mode where no per-message queue accounting applies.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCounters;

impl Counters for NullCounters {
    fn objects_added(&self, _n: u64) {}
    fn objects_done(&self, _n: u64) {}
    fn object_errors(&self, _n: u64) {}
    fn events_added(&self, _n: u64) {}
    fn events_acked(&self, _n: u64) {}
    fn parser_errors(&self, _n: u64) {}
    fn sqs_messages_active(&self, _delta: i64) {}
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum QuaylogError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown parser: {0}")]
    UnknownParser(String),

    #[error("duplicate parser registration: {0}")]
    DuplicateParser(String),

    #[error("startup error: {0}")]
    Startup(String),
}

pub type Result<T> = std::result::Result<T, QuaylogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ref_gzip_detection_is_suffix_only() {
        let gz = ObjectRef::new("b", "logs/2020/01/01/access.log.gz");
        let plain = ObjectRef::new("b", "logs/2020/01/01/access.log");
        assert!(gz.is_gzip());
        assert!(!plain.is_gzip());
    }

    #[test]
    fn event_meta_builder() {
        let event = Event::new(Utc::now(), FieldMap::new())
            .with_meta("format", serde_json::json!("alb"));
        assert_eq!(event.meta.get("format").unwrap(), "alb");
    }
}
