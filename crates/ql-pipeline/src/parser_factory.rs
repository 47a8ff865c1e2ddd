//! Builds a `ParserContext` from an `InputConfig`.
//!
//! `log_format` names either a predefined parser (`alb`, `elb`, `cloudfront`,
//! `waf`), the literal `json` (a generic line-delimited JSON format), or is
//! itself taken as a named-capture regex for a custom format. In the latter
//! two cases `log_format_options` carries the rest of the shape, matching
//! `original_source/logparser/customlogparser.go`'s config surface:
//!
//! ```toml
//! log_format = "json"
//! log_format_options = { timestamp_field = "ts", timestamp_kind = "timeISO8601" }
//! ```
//! or
//! ```toml
//! log_format = '^(?P<ts>\S+) (?P<status>\d+)$'
//! log_format_options = { timestamp_field = "ts", kind = { ts = "timeISO8601", status = "int16" }, empty_values = { status = "-" }, ignore_regex = "^#" }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;

use ql_common::QuaylogError;
use ql_config::InputConfig;
use ql_kind::kind_from_spec;
use ql_logparsers::{JsonLogParser, LogParser, ParserRegistry, RegexLogParser};

use crate::context::ParserContext;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonFormatOptions {
    timestamp_field: Option<String>,
    timestamp_kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegexFormatOptions {
    timestamp_field: Option<String>,
    kind: HashMap<String, String>,
    empty_values: HashMap<String, String>,
    ignore_regex: Option<String>,
}

fn build_parser(config: &InputConfig, registry: &ParserRegistry) -> Result<(Arc<dyn LogParser>, String), QuaylogError> {
    if let Ok(predefined) = registry.get(&config.log_format) {
        return Ok((predefined, config.log_format.clone()));
    }

    if config.log_format == "json" {
        let opts: JsonFormatOptions = match &config.log_format_options {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| QuaylogError::Config(format!("invalid log_format_options: {e}")))?,
            None => JsonFormatOptions::default(),
        };
        let timestamp_field = opts.timestamp_field.unwrap_or_else(|| "timestamp".to_string());
        let timestamp_kind = match opts.timestamp_kind {
            Some(k) => kind_from_spec(&k).map_err(|e| QuaylogError::Config(e.to_string()))?,
            None => ql_kind::Kind::TimeIso8601,
        };
        return Ok((
            Arc::new(JsonLogParser::new(timestamp_field, timestamp_kind)),
            "json".to_string(),
        ));
    }

    // Anything else is taken as a regex pattern for a custom format.
    let opts: RegexFormatOptions = match &config.log_format_options {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| QuaylogError::Config(format!("invalid log_format_options: {e}")))?,
        None => RegexFormatOptions::default(),
    };
    let timestamp_field = opts.timestamp_field.unwrap_or_else(|| "timestamp".to_string());
    let re = Regex::new(&config.log_format)
        .map_err(|e| QuaylogError::Config(format!("invalid log_format regex: {e}")))?;

    let mut kind_map = HashMap::new();
    for (field, spec) in &opts.kind {
        let kind = kind_from_spec(spec).map_err(|e| QuaylogError::Config(e.to_string()))?;
        kind_map.insert(field.clone(), kind);
    }

    let mut parser = RegexLogParser::new(timestamp_field, re).with_kind_map(kind_map);
    if !opts.empty_values.is_empty() {
        parser = parser.with_empty_values(opts.empty_values);
    }
    if let Some(ignore) = &opts.ignore_regex {
        let ignore_re = Regex::new(ignore)
            .map_err(|e| QuaylogError::Config(format!("invalid ignore_regex: {e}")))?;
        parser = parser.with_ignore_regex(ignore_re);
    }

    Ok((Arc::new(parser), "custom".to_string()))
}

pub fn build_parser_context(
    config: &InputConfig,
    registry: &ParserRegistry,
) -> Result<ParserContext, QuaylogError> {
    let (parser, format_name) = build_parser(config, registry)?;

    let key_regex = match &config.key_regex_fields {
        Some(pattern) => Some(
            Regex::new(pattern)
                .map_err(|e| QuaylogError::Config(format!("invalid key_regex_fields: {e}")))?,
        ),
        None => None,
    };

    let static_fields = config
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();

    Ok(ParserContext {
        parser,
        key_regex,
        format_name,
        static_fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ql_logparsers::predefined_parser_registry;

    #[test]
    fn resolves_predefined_format_by_name() {
        let registry = predefined_parser_registry();
        let config = InputConfig {
            log_format: "alb".to_string(),
            ..Default::default()
        };
        let ctx = build_parser_context(&config, &registry).unwrap();
        assert_eq!(ctx.format_name, "alb");
    }

    #[test]
    fn builds_custom_regex_format_from_options() {
        let registry = predefined_parser_registry();
        let config = InputConfig {
            log_format: r"^(?P<timestamp>\S+) (?P<status>\d+)$".to_string(),
            log_format_options: Some(serde_json::json!({
                "timestamp_field": "timestamp",
                "kind": {"timestamp": "timeISO8601", "status": "int16"}
            })),
            ..Default::default()
        };
        let ctx = build_parser_context(&config, &registry).unwrap();
        assert_eq!(ctx.format_name, "custom");
    }

    #[test]
    fn builds_json_format_with_default_timestamp_field() {
        let registry = predefined_parser_registry();
        let config = InputConfig {
            log_format: "json".to_string(),
            ..Default::default()
        };
        let ctx = build_parser_context(&config, &registry).unwrap();
        assert_eq!(ctx.format_name, "json");
    }

    #[test]
    fn rejects_invalid_key_regex() {
        let registry = predefined_parser_registry();
        let config = InputConfig {
            log_format: "alb".to_string(),
            key_regex_fields: Some("(unterminated".to_string()),
            ..Default::default()
        };
        assert!(build_parser_context(&config, &registry).is_err());
    }
}
