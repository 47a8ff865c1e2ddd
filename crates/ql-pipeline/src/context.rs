//! The per-input parsing context attached to every object read from that
//! input, and the unit of work sent through the object-refs channel.

use std::collections::HashMap;
use std::sync::Arc;

use ql_common::ObjectRef;
use ql_logparsers::LogParser;
use regex::Regex;

use crate::tracker::CompletionTracker;

/// Everything the reader stage needs to turn one object's bytes into events,
/// independent of which particular object it is.
pub struct ParserContext {
    pub parser: Arc<dyn LogParser>,
    /// Extracts extra fields from the object key itself (e.g. a date or
    /// tenant segment baked into the S3 key layout).
    pub key_regex: Option<Regex>,
    /// Recorded as `event.meta["format"]`.
    pub format_name: String,
    /// Configured constant fields merged into every event from this input,
    /// lowest priority (parser fields, then key-regex fields, override it).
    pub static_fields: HashMap<String, serde_json::Value>,
}

impl ParserContext {
    /// Extracts named captures from `key`, skipping the whole match and any
    /// unnamed or empty capture. Logs rather than fails on no match, since a
    /// key that doesn't fit the expected layout shouldn't drop the object.
    pub fn key_fields(&self, key: &str) -> HashMap<String, serde_json::Value> {
        let mut fields = HashMap::new();
        let Some(re) = &self.key_regex else {
            return fields;
        };
        let Some(captures) = re.captures(key) else {
            tracing::warn!(key, "key does not match configured key_regex_fields, skipping");
            return fields;
        };
        for (i, name) in re.capture_names().enumerate() {
            let Some(name) = name else { continue };
            if i == 0 {
                continue;
            }
            if let Some(m) = captures.name(name) {
                if !m.as_str().is_empty() {
                    fields.insert(name.to_string(), serde_json::Value::String(m.as_str().to_string()));
                }
            }
        }
        fields
    }
}

/// One object queued for reading, carrying the context needed to parse it
/// and the tracker that must be told when it's done.
pub struct WorkItem {
    pub object: ObjectRef,
    pub context: Arc<ParserContext>,
    pub tracker: Arc<CompletionTracker>,
}
