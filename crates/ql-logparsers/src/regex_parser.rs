use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ql_common::Event;
use ql_kind::{coerce, Input, Kind};
use regex::Regex;
use std::collections::HashMap;
use tokio::io::AsyncBufRead;

use crate::{is_blank_line, line_id, read_raw_line, Fields, LogParser, ParseError, ParseLineError};

/// Parses log lines with a named-capture regex, an optional "ignore" regex,
/// a per-capture `Kind` map, and a per-capture empty-value sentinel map.
pub struct RegexLogParser {
    timestamp_field: String,
    re: Regex,
    re_ignore: Option<Regex>,
    kind_map: HashMap<String, Kind>,
    empty_values: HashMap<String, String>,
}

impl RegexLogParser {
    pub fn new(timestamp_field: impl Into<String>, re: Regex) -> Self {
        Self {
            timestamp_field: timestamp_field.into(),
            re,
            re_ignore: None,
            kind_map: HashMap::new(),
            empty_values: HashMap::new(),
        }
    }

    pub fn with_kind_map(mut self, kind_map: HashMap<String, Kind>) -> Self {
        self.kind_map = kind_map;
        self
    }

    pub fn with_ignore_regex(mut self, re_ignore: Regex) -> Self {
        self.re_ignore = Some(re_ignore);
        self
    }

    pub fn with_empty_values(mut self, empty_values: HashMap<String, String>) -> Self {
        self.empty_values = empty_values;
        self
    }

    fn is_ignored(&self, line: &str) -> bool {
        if is_blank_line(line) {
            return true;
        }
        self.re_ignore
            .as_ref()
            .map(|re| re.is_match(line))
            .unwrap_or(false)
    }
}

#[async_trait]
impl LogParser for RegexLogParser {
    async fn parse(
        &self,
        reader: &mut (dyn AsyncBufRead + Send + Unpin),
        on_event: &mut (dyn FnMut(Event) + Send),
        on_line_error: &mut (dyn FnMut(&str, ParseLineError) + Send),
    ) -> Result<(), ParseError> {
        loop {
            let raw_line = match read_raw_line(reader).await? {
                None => break,
                Some(line) => line,
            };
            if self.is_ignored(&raw_line) {
                continue;
            }
            let trimmed = raw_line.trim_end_matches(['\n', '\r']);

            let captures = match self.re.captures(trimmed) {
                Some(c) => c,
                None => {
                    on_line_error(
                        &raw_line,
                        ParseLineError("line does not match expected format".to_string()),
                    );
                    continue;
                }
            };

            let mut fields: Fields = HashMap::new();
            let mut timestamp: Option<DateTime<Utc>> = None;
            let mut coercion_failed = false;
            for (i, name) in self.re.capture_names().enumerate() {
                let name = match name {
                    Some(n) if i != 0 => n,
                    _ => continue,
                };
                let value = match captures.name(name) {
                    Some(m) if !m.as_str().is_empty() => m.as_str(),
                    _ => continue,
                };
                if self.empty_values.get(name).map(String::as_str) == Some(value) {
                    continue;
                }
                let is_timestamp = name == self.timestamp_field;
                match self.kind_map.get(name) {
                    Some(kind) => match coerce(kind, Input::Str(value)) {
                        Ok(coerced) if is_timestamp => timestamp = coerced.into_time(),
                        Ok(coerced) => {
                            fields.insert(name.to_string(), coerced.into_value());
                        }
                        Err(e) => {
                            on_line_error(
                                &raw_line,
                                ParseLineError(format!(
                                    "couldn't parse field ({name}) to kind ({kind}): {e}"
                                )),
                            );
                            coercion_failed = true;
                            break;
                        }
                    },
                    None if is_timestamp => {
                        // A plain string can never satisfy the timestamp requirement
                        // below; handled uniformly there.
                    }
                    None => {
                        fields.insert(name.to_string(), serde_json::Value::String(value.to_string()));
                    }
                }
            }
            if coercion_failed {
                continue;
            }

            let timestamp = match timestamp {
                Some(t) => t,
                None => {
                    on_line_error(
                        &raw_line,
                        ParseLineError(format!(
                            "field {} set as timestamp, but its kind is not time",
                            self.timestamp_field
                        )),
                    );
                    continue;
                }
            };

            let event = Event::new(timestamp, fields).with_meta("_id", serde_json::json!(line_id(&raw_line)));
            on_event(event);
        }
        Ok(())
    }
}
