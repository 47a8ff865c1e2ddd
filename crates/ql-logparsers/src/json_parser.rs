use async_trait::async_trait;
use ql_common::Event;
use ql_kind::{coerce, Input, Kind};
use tokio::io::AsyncBufRead;

use crate::{is_blank_line, line_id, read_raw_line, Fields, LogParser, ParseError, ParseLineError};

/// Parses line-delimited JSON objects, pulling a designated timestamp field
/// out of each (and removing it from the emitted fields).
pub struct JsonLogParser {
    timestamp_field: String,
    timestamp_kind: Kind,
}

impl JsonLogParser {
    pub fn new(timestamp_field: impl Into<String>, timestamp_kind: Kind) -> Self {
        Self {
            timestamp_field: timestamp_field.into(),
            timestamp_kind,
        }
    }
}

#[async_trait]
impl LogParser for JsonLogParser {
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
            if is_blank_line(&raw_line) {
                continue;
            }
            let trimmed = raw_line.trim_end_matches(['\n', '\r']);

            let mut fields: Fields = match serde_json::from_str(trimmed) {
                Ok(f) => f,
                Err(e) => {
                    on_line_error(
                        &raw_line,
                        ParseLineError(format!("couldn't parse json line: {e}")),
                    );
                    continue;
                }
            };

            let timestamp_value = match fields.remove(&self.timestamp_field) {
                Some(v) => v,
                None => {
                    on_line_error(
                        &raw_line,
                        ParseLineError(format!(
                            "couldn't find timestamp field {}",
                            self.timestamp_field
                        )),
                    );
                    continue;
                }
            };

            let timestamp = match coerce(&self.timestamp_kind, Input::Json(&timestamp_value)) {
                Ok(coerced) => coerced.into_time(),
                Err(e) => {
                    on_line_error(&raw_line, ParseLineError(e.to_string()));
                    continue;
                }
            };
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

            let event =
                Event::new(timestamp, fields).with_meta("_id", serde_json::json!(line_id(&raw_line)));
            on_event(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn waf_unix_millis_timestamp() {
        let parser = JsonLogParser::new("timestamp", Kind::UnixMillisTime);
        let data = br#"{"timestamp":1553360693208,"action":"BLOCK"}"#.to_vec();
        let mut reader = BufReader::new(Cursor::new(data));
        let mut events = Vec::new();
        parser
            .parse(&mut reader, &mut |e| events.push(e), &mut |_, _| {})
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].fields.contains_key("timestamp"));
        assert_eq!(events[0].fields.get("action").unwrap(), "BLOCK");
        assert_eq!(events[0].timestamp.to_rfc3339(), "2019-03-23T17:04:53.208+00:00");
    }

    #[tokio::test]
    async fn malformed_json_line_reported_and_skipped() {
        let parser = JsonLogParser::new("timestamp", Kind::UnixMillisTime);
        let data = b"{not json}\n{\"timestamp\":1,\"a\":1}\n".to_vec();
        let mut reader = BufReader::new(Cursor::new(data));
        let mut events = Vec::new();
        let mut errors = Vec::new();
        parser
            .parse(
                &mut reader,
                &mut |e| events.push(e),
                &mut |l, e| errors.push((l.to_string(), e.to_string())),
            )
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(events.len(), 1);
    }
}
