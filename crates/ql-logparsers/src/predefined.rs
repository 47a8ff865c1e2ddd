use std::collections::HashMap;
use std::sync::Arc;

use ql_common::QuaylogError;
use ql_kind::Kind;
use regex::Regex;

use crate::{JsonLogParser, LogParser, RegexLogParser};

fn kinds(pairs: &[(&str, Kind)]) -> HashMap<String, Kind> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn empty_values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn alb_parser() -> Arc<dyn LogParser> {
    let re = Regex::new(
        r#"^(?P<type>[^ ]*) (?P<timestamp>[^ ]*) (?P<elb>[^ ]*) (?P<client_ip>[^ ]*):(?P<client_port>[0-9]*) ((?P<target_ip>[^ ]+)[:-](?P<target_port>[0-9]+)|-) (?P<request_processing_time>[-.0-9]*) (?P<target_processing_time>[-.0-9]*) (?P<response_processing_time>[-.0-9]*) (?P<elb_status_code>|[-0-9]*) (?P<target_status_code>-|[-0-9]*) (?P<received_bytes>[-0-9]*) (?P<sent_bytes>[-0-9]*) "(?P<request_verb>[^ ]*) (?P<request_url>[^ ]*) (?P<request_proto>- |[^ ]*)" "(?P<user_agent>[^"]*)" (?P<ssl_cipher>[A-Z0-9-]+) (?P<ssl_protocol>[A-Za-z0-9.-]*) (?P<target_group_arn>[^ ]*) "(?P<trace_id>[^"]*)""#,
    )
    .expect("built-in alb regex is valid");

    let kind_map = kinds(&[
        ("timestamp", Kind::TimeIso8601),
        ("client_port", Kind::Uint16),
        ("target_port", Kind::Uint16),
        ("request_processing_time", Kind::Float64),
        ("target_processing_time", Kind::Float64),
        ("response_processing_time", Kind::Float64),
        ("request_url", Kind::UrlEncoded),
        ("received_bytes", Kind::Int64),
        ("sent_bytes", Kind::Int64),
        ("elb_status_code", Kind::Int16),
        ("target_status_code", Kind::Int16),
    ]);
    let empty = empty_values(&[
        ("user_agent", "-"),
        ("ssl_cipher", "-"),
        ("ssl_protocol", "-"),
        ("request_processing_time", "-1"),
        ("target_processing_time", "-1"),
        ("response_processing_time", "-1"),
        ("target_status_code", "-"),
    ]);

    Arc::new(
        RegexLogParser::new("timestamp", re)
            .with_kind_map(kind_map)
            .with_empty_values(empty),
    )
}

fn elb_parser() -> Arc<dyn LogParser> {
    let re = Regex::new(
        r#"^(?P<timestamp>[^ ]*) (?P<elb>[^ ]*) (?P<client_ip>[^ ]*):(?P<client_port>[0-9]*) ((?P<backend_ip>[^ ]+)[:-](?P<backend_port>[0-9]+)|-) (?P<request_processing_time>[-.0-9]*) (?P<backend_processing_time>[-.0-9]*) (?P<response_processing_time>[-.0-9]*) (?P<elb_status_code>|[-0-9]*) (?P<backend_status_code>-|[-0-9]*) (?P<received_bytes>[-0-9]*) (?P<sent_bytes>[-0-9]*) "(?P<request_verb>[^ ]*) (?P<request_url>[^ ]*) (?P<request_proto>- |[^ ]*)" "(?P<user_agent>[^"]*)" (?P<ssl_cipher>[A-Z0-9-]+) (?P<ssl_protocol>[A-Za-z0-9.-]*)"#,
    )
    .expect("built-in elb regex is valid");

    let kind_map = kinds(&[
        ("timestamp", Kind::TimeIso8601),
        ("client_port", Kind::Uint16),
        ("backend_port", Kind::Uint16),
        ("request_processing_time", Kind::Float64),
        ("backend_processing_time", Kind::Float64),
        ("response_processing_time", Kind::Float64),
        ("request_url", Kind::UrlEncoded),
        ("received_bytes", Kind::Int64),
        ("sent_bytes", Kind::Int64),
        ("elb_status_code", Kind::Int16),
        ("backend_status_code", Kind::Int16),
    ]);
    let empty = empty_values(&[
        ("user_agent", "-"),
        ("ssl_cipher", "-"),
        ("ssl_protocol", "-"),
        ("elb_status_code", "-"),
        ("request_processing_time", "-1"),
        ("backend_processing_time", "-1"),
        ("response_processing_time", "-1"),
        ("backend_status_code", "-"),
    ]);

    Arc::new(
        RegexLogParser::new("timestamp", re)
            .with_kind_map(kind_map)
            .with_empty_values(empty),
    )
}

fn cloudfront_parser() -> Arc<dyn LogParser> {
    let re = Regex::new(
        r"^(?P<timestamp>[^\t]*\t[^\t]*)\t(?P<x_edge_location>[^\t]*)\t(?P<sc_bytes>[^\t]*)\t(?P<c_ip>[^\t]*)\t(?P<cs_method>[^\t]*)\t(?P<cs_host>[^\t]*)\t(?P<cs_uri_stem>[^\t]*)\t(?P<sc_status>[^\t]*)\t(?P<cs_referer>[^\t]*)\t(?P<cs_user_agent>[^\t]*)\t(?P<cs_uri_query>[^\t]*)\t(?P<cs_cookie>[^\t]*)\t(?P<x_edge_result_type>[^\t]*)\t(?P<x_edge_request_id>[^\t]*)\t(?P<x_host_header>[^\t]*)\t(?P<cs_protocol>[^\t]*)\t(?P<cs_bytes>[^\t]*)\t(?P<time_taken>[^\t]*)\t(?P<x_forwarded_for>[^\t]*)\t(?P<ssl_protocol>[^\t]*)\t(?P<ssl_cipher>[^\t]*)\t(?P<x_edge_response_result_type>[^\t]*)\t(?P<cs_protocol_version>[^\t]*)\t(?P<fle_status>[^\t]*)\t(?P<fle_encrypted_fields>[^\s]*)",
    )
    .expect("built-in cloudfront regex is valid");
    let re_ignore = Regex::new(r"^#").expect("built-in cloudfront ignore regex is valid");

    let kind_map = kinds(&[
        ("timestamp", Kind::TimeLayout("%Y-%m-%d\t%H:%M:%S".to_string())),
        ("x_edge_location", Kind::DeepUrlEncoded),
        ("cs_bytes", Kind::Uint64),
        ("sc_bytes", Kind::Uint64),
        ("cs_host", Kind::DeepUrlEncoded),
        ("cs_uri_stem", Kind::DeepUrlEncoded),
        ("sc_status", Kind::Int16),
        ("cs_referer", Kind::DeepUrlEncoded),
        ("cs_user_agent", Kind::DeepUrlEncoded),
        ("cs_uri_query", Kind::DeepUrlEncoded),
        ("cs_cookie", Kind::DeepUrlEncoded),
        ("time_taken", Kind::Float64),
    ]);
    let empty = empty_values(&[
        ("cs_uri_query", "-"),
        ("cs_bytes", "-"),
        ("x_forwarded_for", "-"),
        ("ssl_protocol", "-"),
        ("ssl_cipher", "-"),
        ("fle_status", "-"),
        ("fle_encrypted_fields", "-"),
    ]);

    Arc::new(
        RegexLogParser::new("timestamp", re)
            .with_kind_map(kind_map)
            .with_ignore_regex(re_ignore)
            .with_empty_values(empty),
    )
}

fn waf_parser() -> Arc<dyn LogParser> {
    Arc::new(JsonLogParser::new("timestamp", Kind::UnixMillisTime))
}

/// Looks up the built-in parsers by format name (`alb`, `elb`, `cloudfront`,
/// `waf`). Custom regex/json configurations are built directly by the config
/// loader rather than registered here.
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn LogParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        parser: Arc<dyn LogParser>,
    ) -> Result<(), QuaylogError> {
        let name = name.into();
        if self.parsers.contains_key(&name) {
            return Err(QuaylogError::DuplicateParser(name));
        }
        self.parsers.insert(name, parser);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn LogParser>, QuaylogError> {
        self.parsers
            .get(name)
            .cloned()
            .ok_or_else(|| QuaylogError::UnknownParser(name.to_string()))
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn predefined_parser_registry() -> ParserRegistry {
    let mut registry = ParserRegistry::new();
    registry
        .register("alb", alb_parser())
        .expect("predefined names are unique");
    registry
        .register("elb", elb_parser())
        .expect("predefined names are unique");
    registry
        .register("cloudfront", cloudfront_parser())
        .expect("predefined names are unique");
    registry
        .register("waf", waf_parser())
        .expect("predefined names are unique");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_all_four_predefined_formats() {
        let registry = predefined_parser_registry();
        assert!(registry.get("alb").is_ok());
        assert!(registry.get("elb").is_ok());
        assert!(registry.get("cloudfront").is_ok());
        assert!(registry.get("waf").is_ok());
        assert!(registry.get("nonsense").is_err());
    }

    #[test]
    fn registering_duplicate_name_errors() {
        let mut registry = ParserRegistry::new();
        registry.register("alb", alb_parser()).unwrap();
        assert!(registry.register("alb", alb_parser()).is_err());
    }
}
