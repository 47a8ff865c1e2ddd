//! Log parser engine: shared contract plus two implementations (regex-driven
//! and JSON-driven), and the predefined-format registry.

mod json_parser;
mod predefined;
mod regex_parser;

pub use json_parser::JsonLogParser;
pub use predefined::{predefined_parser_registry, ParserRegistry};
pub use regex_parser::RegexLogParser;

use async_trait::async_trait;
use ql_common::Event;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use tokio::io::AsyncBufRead;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

/// A per-line parse failure. Never aborts the overall `parse` call.
#[derive(Debug)]
pub struct ParseLineError(pub String);

impl std::fmt::Display for ParseLineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared contract for both log parser implementations.
///
/// Reads line-delimited input, reporting successfully-parsed events via
/// `on_event` and per-line failures via `on_line_error`. A read failure on
/// the underlying stream aborts the whole call with `Err`; no events are
/// emitted from a partially-read final line in that case. Implementations
/// are stateless across lines and safe to call concurrently on distinct
/// inputs.
#[async_trait]
pub trait LogParser: Send + Sync {
    async fn parse(
        &self,
        reader: &mut (dyn AsyncBufRead + Send + Unpin),
        on_event: &mut (dyn FnMut(Event) + Send),
        on_line_error: &mut (dyn FnMut(&str, ParseLineError) + Send),
    ) -> Result<(), ParseError>;
}

/// Reads one line (delimiter included when present). `Ok(None)` means clean
/// EOF with nothing left to process.
pub(crate) async fn read_raw_line(
    reader: &mut (dyn AsyncBufRead + Send + Unpin),
) -> Result<Option<String>, ParseError> {
    use tokio::io::AsyncBufReadExt;
    let mut buf = String::new();
    let n = reader.read_line(&mut buf).await?;
    if n == 0 {
        Ok(None)
    } else {
        Ok(Some(buf))
    }
}

pub(crate) fn is_blank_line(raw_line: &str) -> bool {
    raw_line.is_empty() || raw_line == "\n" || raw_line == "\r\n"
}

pub(crate) fn line_id(raw_line: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(raw_line.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) type Fields = HashMap<String, serde_json::Value>;
