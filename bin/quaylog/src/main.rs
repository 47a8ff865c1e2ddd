//! quaylog: tails object-storage access logs (ELB/ALB/CloudFront/WAF/custom)
//! and publishes parsed events to a downstream sink with at-least-once
//! delivery.
//!
//! Two subcommands share the same parser engine and config file:
//! - the default run drives service mode (long-lived SQS polling);
//! - `s3imports` drives batch mode (bounded enumeration of bucket prefixes
//!   over a `[since, to)` window).
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `QUAYLOG_CONFIG` | (searches `config.toml`, `quaylog.toml`, ...) | Config file path |
//! | `QUAYLOG_SHUTDOWN_TIMEOUT_SECONDS` | from config | Overrides `shutdown_timeout_seconds` |
//! | `LOG_FORMAT` | text | `json` switches to structured JSON logging |
//! | `RUST_LOG` | info | tracing level filter |

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use ql_common::{Counters, QuaylogError};
use ql_config::{AppConfig, ConfigLoader, InputConfig, InputType};
use ql_logparsers::predefined_parser_registry;
use ql_objectstore::{ObjectStore, S3ObjectStore};
use ql_pipeline::source_list::PrefixSource;
use ql_pipeline::source_queue::QueueSource;
use ql_pipeline::{build_parser_context, PipelineResult, Supervisor};
use ql_queue::SqsNotificationQueue;
use ql_sink::{EventSink, StdoutSink};

#[derive(Parser, Debug)]
#[command(name = "quaylog", about = "Object-storage access log ingestion pipeline")]
struct Cli {
    /// Path to the TOML config file; falls back to the usual search paths
    /// (config.toml, quaylog.toml, /etc/quaylog/config.toml, ...) and
    /// QUAYLOG_CONFIG when unset.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Exit after every configured input has fully drained once, instead of
    /// running indefinitely (service mode only; batch mode always runs
    /// once).
    #[arg(long, global = true)]
    once: bool,

    /// Suppress queue-message deletion on completion. A test/replay aid.
    #[arg(long = "keepsqsmessages", global = true)]
    keep_messages: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Batch mode: enumerate configured bucket prefixes over `[since, to)`
    /// instead of polling queues.
    S3imports {
        /// RFC3339 override for every S3 input's `since`, taking precedence
        /// over the config file's per-input value.
        #[arg(long)]
        since: Option<String>,

        /// RFC3339 override for every S3 input's `to`.
        #[arg(long)]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    ql_common::logging::init_default_logging();

    let cli = Cli::parse();

    match try_main(cli).await {
        Ok(result) => {
            info!(
                objects_active = result.objects_active,
                events_active = result.events_active,
                object_errors = result.object_errors,
                parser_errors = result.parser_errors,
                "quaylog shutdown complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            // `{:#}` prints the full anyhow context chain, not just the
            // innermost error, so a config-file problem reads as
            // "failed to load configuration: <io error>" rather than just
            // the bare io error.
            error!(error = format!("{e:#}"), "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

/// Everything that can fail before or during a run is wrapped here with
/// `anyhow::Context` rather than matched per call site. A startup failure
/// only needs to be logged and turned into an exit code, not handled
/// differently case by case.
async fn try_main(cli: Cli) -> anyhow::Result<PipelineResult> {
    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_seconds);

    match cli.command {
        Some(Command::S3imports { since, to }) => run_batch(&config, since, to, shutdown_timeout)
            .await
            .context("s3imports run failed"),
        None => run_service(&config, cli.once, cli.keep_messages, shutdown_timeout)
            .await
            .context("service run failed"),
    }
}

fn load_config(explicit_path: Option<&str>) -> Result<AppConfig, ql_config::ConfigError> {
    match explicit_path {
        Some(path) => ConfigLoader::with_path(path).load(),
        None => AppConfig::load(),
    }
}

fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(StdoutSink::new())
}

/// Installs the process Ctrl+C / SIGTERM handler and forwards it onto the
/// supervisor's shutdown broadcast, mirroring the external-stop signal of
/// the shutdown coordinator.
fn spawn_external_stop_listener(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        info!("stop signal received, beginning graceful shutdown");
        let _ = shutdown_tx.send(());
    });
}

async fn wait_for_stop_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run_service(
    config: &AppConfig,
    once: bool,
    keep_messages: bool,
    shutdown_timeout: Duration,
) -> Result<PipelineResult, QuaylogError> {
    let registry = predefined_parser_registry();
    let sqs_client = aws_sqs_client().await;

    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::from_env().await);
    let sink = default_sink();
    let supervisor = Supervisor::new(store, sink);
    let counters: Arc<dyn Counters> = supervisor.counters();

    let mut sources = Vec::new();
    for input in &config.inputs {
        if input.input_type != InputType::Sqs {
            continue;
        }
        let context = Arc::new(build_parser_context(input, &registry)?);
        for queue_url in &input.queues_url {
            let queue = Arc::new(SqsNotificationQueue::from_queue_url(
                sqs_client.clone(),
                queue_url.clone(),
            ));
            sources.push(QueueSource {
                queue,
                context: context.clone(),
                keep_messages,
                poll_frequency: Duration::from_secs(input.poll_frequency_seconds),
                counters: counters.clone(),
            });
        }
    }

    if sources.is_empty() {
        warn!("no sqs inputs configured, nothing to poll");
    }

    let shutdown_tx = supervisor.shutdown_handle();
    spawn_external_stop_listener(shutdown_tx);

    Ok(supervisor.run_service(sources, once, shutdown_timeout).await)
}

async fn run_batch(
    config: &AppConfig,
    since_override: Option<String>,
    to_override: Option<String>,
    shutdown_timeout: Duration,
) -> Result<PipelineResult, QuaylogError> {
    let since_override = parse_rfc3339_override("since", since_override)?;
    let to_override = parse_rfc3339_override("to", to_override)?;

    let registry = predefined_parser_registry();
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::from_env().await);
    let sink = default_sink();
    let supervisor = Supervisor::new(store.clone(), sink);
    let counters: Arc<dyn Counters> = supervisor.counters();

    let mut sources = Vec::new();
    for input in &config.inputs {
        if input.input_type != InputType::S3 {
            continue;
        }
        let context = Arc::new(build_parser_context(input, &registry)?);
        let since = since_override.unwrap_or_else(|| input.since_parsed());
        let to = to_override.unwrap_or_else(|| input.to_parsed());
        for bucket_uri in &input.buckets {
            let (bucket, prefix) = split_bucket_prefix(bucket_uri);
            sources.push(PrefixSource {
                store: store.clone(),
                bucket,
                prefix,
                context: context.clone(),
                since,
                to,
                counters: counters.clone(),
            });
        }
    }

    if sources.is_empty() {
        warn!("no s3 inputs configured, nothing to import");
    }

    let shutdown_tx = supervisor.shutdown_handle();
    spawn_external_stop_listener(shutdown_tx);

    Ok(supervisor.run_batch(sources, shutdown_timeout).await)
}

/// Parses a `--since`/`--to` CLI override as RFC3339, converting to UTC.
/// Absence is not an error; a present-but-malformed value is.
fn parse_rfc3339_override(
    flag: &str,
    value: Option<String>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, QuaylogError> {
    value
        .map(|raw| {
            chrono::DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| QuaylogError::Config(format!("invalid --{flag} value {raw:?}: {e}")))
        })
        .transpose()
}

async fn aws_sqs_client() -> aws_sdk_sqs::Client {
    let config = aws_config::load_from_env().await;
    aws_sdk_sqs::Client::new(&config)
}

/// Splits a configured `buckets` entry into `(bucket, prefix)`. Accepts both
/// the bare bucket name and an `s3://bucket/prefix` URI.
fn split_bucket_prefix(entry: &str) -> (String, String) {
    let trimmed = entry.strip_prefix("s3://").unwrap_or(entry);
    match trimmed.split_once('/') {
        Some((bucket, prefix)) => (bucket.to_string(), prefix.to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_s3_uri_into_bucket_and_prefix() {
        assert_eq!(
            split_bucket_prefix("s3://my-bucket/logs/2024/"),
            ("my-bucket".to_string(), "logs/2024/".to_string())
        );
    }

    #[test]
    fn bare_bucket_name_has_empty_prefix() {
        assert_eq!(
            split_bucket_prefix("my-bucket"),
            ("my-bucket".to_string(), String::new())
        );
    }

    #[test]
    fn input_config_field_access_compiles() {
        let input = InputConfig::default();
        assert_eq!(input.input_type, InputType::Sqs);
    }

    #[test]
    fn since_override_absent_is_none() {
        assert!(parse_rfc3339_override("since", None).unwrap().is_none());
    }

    #[test]
    fn since_override_parses_rfc3339() {
        let parsed = parse_rfc3339_override("since", Some("2024-01-01T00:00:00Z".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn malformed_override_is_a_config_error() {
        let err = parse_rfc3339_override("to", Some("not-a-date".to_string())).unwrap_err();
        assert!(matches!(err, QuaylogError::Config(_)));
    }
}
