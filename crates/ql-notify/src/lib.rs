//! Decodes the S3 `ObjectCreated` event envelope carried in a queue
//! notification body into the `ObjectRef`s it announces.

use ql_common::ObjectRef;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct S3Event {
    #[serde(rename = "Records", default)]
    records: Vec<S3EventRecord>,
}

#[derive(Debug, Deserialize)]
struct S3EventRecord {
    #[serde(rename = "eventSource")]
    event_source: String,
    #[serde(rename = "eventName")]
    event_name: String,
    s3: S3RecordBody,
}

#[derive(Debug, Deserialize)]
struct S3RecordBody {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
    size: Option<i64>,
}

/// Extracts the `ObjectCreated:*` references from a notification body.
///
/// A body that isn't valid JSON, or doesn't match the expected envelope,
/// yields zero objects rather than an error — the notification is simply
/// ignored, mirroring the source system's tolerance of malformed messages.
/// A record whose key can't be percent-decoded is skipped individually; it
/// does not drop the rest of the batch.
pub fn extract_object_refs(body: &str) -> Vec<ObjectRef> {
    let event: S3Event = match serde_json::from_str(body) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "couldn't parse json from S3 notification, ignoring");
            return Vec::new();
        }
    };

    let mut refs = Vec::with_capacity(event.records.len());
    for record in event.records {
        if record.event_source != "aws:s3" || !record.event_name.starts_with("ObjectCreated:") {
            continue;
        }
        match ql_kind::query_unescape(&record.s3.object.key) {
            Ok(key) => {
                let mut object_ref = ObjectRef::new(record.s3.bucket.name, key);
                if let Some(size) = record.s3.object.size {
                    object_ref = object_ref.with_size(size);
                }
                refs.push(object_ref);
            }
            Err(()) => {
                tracing::warn!(key = %record.s3.object.key, "couldn't unescape S3 object key, skipping");
            }
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_created_records() {
        let body = r#"{"Records":[{"eventSource":"aws:s3","eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"my-bucket"},"object":{"key":"logs/2019/alb.log","size":512}}}]}"#;
        let refs = extract_object_refs(body);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].bucket, "my-bucket");
        assert_eq!(refs[0].key, "logs/2019/alb.log");
        assert_eq!(refs[0].size, Some(512));
    }

    #[test]
    fn decodes_percent_encoded_key() {
        let body = r#"{"Records":[{"eventSource":"aws:s3","eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"b"},"object":{"key":"My+simple+%5Bkey%5D","size":0}}}]}"#;
        let refs = extract_object_refs(body);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].key, "My simple [key]");
    }

    #[test]
    fn skips_record_with_malformed_key_encoding() {
        let body = r#"{"Records":[{"eventSource":"aws:s3","eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"b"},"object":{"key":"My+simple+%5key%5D","size":0}}}]}"#;
        let refs = extract_object_refs(body);
        assert!(refs.is_empty());
    }

    #[test]
    fn ignores_non_object_created_events() {
        let body = r#"{"Records":[{"eventSource":"aws:s3","eventName":"ObjectRemoved:Delete","s3":{"bucket":{"name":"b"},"object":{"key":"x","size":0}}}]}"#;
        let refs = extract_object_refs(body);
        assert!(refs.is_empty());
    }

    #[test]
    fn malformed_envelope_yields_no_records_not_an_error() {
        let refs = extract_object_refs("not json at all");
        assert!(refs.is_empty());
    }
}
