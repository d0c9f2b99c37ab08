//! Boot: logging init, config load, pipeline construction.

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::client::{DockerCli, ExecutionOps, ResultStore, TaskStore};
use crate::conf::CaptureConfig;
use crate::parser::metrics::ParseMetrics;
use crate::service::{BatchParser, LogStreamService, ResultParser};

/// Initialise the tracing / logging subsystem.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentlog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Everything that shares one metrics instance
pub struct Pipeline {
    pub config: CaptureConfig,
    pub metrics: Arc<ParseMetrics>,
    pub parser: Arc<ResultParser>,
    pub batch: BatchParser,
}

impl Pipeline {
    pub fn build(config: CaptureConfig) -> Self {
        let metrics = Arc::new(ParseMetrics::new());
        let parser = ResultParser::new(config.parser.clone(), Arc::clone(&metrics));
        Self::assemble(config, metrics, parser)
    }

    /// Pipeline whose parser can persist results
    pub fn build_with_stores(
        config: CaptureConfig,
        results: Arc<dyn ResultStore>,
        tasks: Arc<dyn TaskStore>,
    ) -> Self {
        let metrics = Arc::new(ParseMetrics::new());
        let parser =
            ResultParser::new(config.parser.clone(), Arc::clone(&metrics)).with_stores(results, tasks);
        Self::assemble(config, metrics, parser)
    }

    fn assemble(config: CaptureConfig, metrics: Arc<ParseMetrics>, parser: ResultParser) -> Self {
        let parser = Arc::new(parser);
        let batch = BatchParser::from_parser(Arc::clone(&parser));
        Self { config, metrics, parser, batch }
    }

    /// Streaming service over the docker CLI configured in `[stream]`
    pub fn log_streams(&self, execution: Arc<dyn ExecutionOps>) -> LogStreamService {
        let docker = DockerCli::new(self.config.stream.docker_host.clone());
        LogStreamService::new(
            execution,
            Arc::new(docker),
            self.config.stream.clone(),
            Arc::clone(&self.metrics),
        )
    }
}

/// Load and validate config, then build the pipeline.
pub fn boot() -> Result<Pipeline, Box<dyn std::error::Error>> {
    info!("Starting agentlog v{}", env!("CARGO_PKG_VERSION"));

    let config = CaptureConfig::load()?;
    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    info!(
        "Parser: timeout={}ms, retries={}, strict={}, adaptive={}",
        config.parser.parse_timeout_ms,
        config.parser.retry_attempts,
        config.parser.strict_validation,
        config.parser.adaptive_selection
    );
    info!(
        "Streams: buffer={}, poll={}ms, docker_host={}",
        config.stream.channel_capacity,
        config.stream.poll_interval_ms,
        if config.stream.docker_host.is_empty() {
            "default socket"
        } else {
            &config.stream.docker_host
        }
    );

    Ok(Pipeline::build(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::{MemoryExecution, MemoryResultStore, MemoryTaskStore};
    use crate::client::Conversation;
    use crate::conf::ParserConfig;

    #[tokio::test]
    async fn test_pipeline_shares_metrics() {
        let pipeline = Pipeline::build(CaptureConfig::default());
        pipeline
            .parser
            .parse_from_logs(r#"{"type":"result","subtype":"success","is_error":false,"session_id":"s"}"#)
            .await
            .unwrap();

        assert_eq!(pipeline.metrics.snapshot().successes, 1);
        assert_eq!(pipeline.batch.workers(), ParserConfig::default().batch_workers);
    }

    #[tokio::test]
    async fn test_pipeline_with_stores_persists() {
        let results = Arc::new(MemoryResultStore::new());
        let pipeline = Pipeline::build_with_stores(
            CaptureConfig::default(),
            results.clone(),
            Arc::new(MemoryTaskStore::new()),
        );
        let conversation = Conversation {
            id: "c1".to_string(),
            task_id: "t1".to_string(),
            status: "completed".to_string(),
        };

        assert!(pipeline.parser.parse_and_create(&conversation, "Done, success").await.is_some());
        assert_eq!(results.len().await, 1);
    }

    #[tokio::test]
    async fn test_log_streams_report_into_shared_metrics() {
        let pipeline = Pipeline::build(CaptureConfig::default());
        let exec = Arc::new(MemoryExecution::new());
        exec.add_conversation(Conversation {
            id: "c1".to_string(),
            task_id: "t1".to_string(),
            status: "running".to_string(),
        })
        .await;
        exec.append_log("c1", "hello\n").await;
        exec.finish("c1", "completed").await;

        let streams = pipeline.log_streams(exec);
        let mut sub = streams
            .stream_conversation_logs(&tokio_util::sync::CancellationToken::new(), "c1")
            .await
            .unwrap();
        assert_eq!(sub.lines.recv().await.unwrap().line, "hello");
        assert_eq!(pipeline.metrics.snapshot().streams.historical, 1);
    }
}
