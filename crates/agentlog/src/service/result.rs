//! Result: orchestrates strategies, retries, validation and persistence.
//!
//! One `ResultParser` is shared (behind an `Arc`) by every caller in the
//! process. Parsing is CPU-bound and runs on the blocking pool; the async
//! side only waits, backs off and watches the cancellation token.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{Conversation, ResultStore, StoreError, StoredResult, TaskStore};
use crate::conf::ParserConfig;
use crate::parser::cache::CacheStats;
use crate::parser::detector::{StrategyFactory, StrategySelector};
use crate::parser::formats::PlanModeStrategy;
use crate::parser::metrics::{MetricErrorType, MetricsSnapshot, ParseMetrics, StrategyKind};
use crate::parser::validate::{ResultValidator, ValidationMode};
use crate::parser::{ParseError, ParsedResult, ResultRecord, Strategy};

/// Why `parse_and_create` did not persist a result
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("result stores are not configured")]
    NotConfigured,

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct ResultParser {
    config: ParserConfig,
    selector: StrategySelector,
    validator: ResultValidator,
    metrics: Arc<ParseMetrics>,
    results: Option<Arc<dyn ResultStore>>,
    tasks: Option<Arc<dyn TaskStore>>,
}

impl ResultParser {
    /// Parser with the built-in strategies, plan-mode included
    pub fn new(config: ParserConfig, metrics: Arc<ParseMetrics>) -> Self {
        let mut factory = StrategyFactory::with_limits(config.max_log_lines, config.probe_lines);
        factory.register(Strategy::PlanMode(PlanModeStrategy::with_max_scan_lines(
            config.max_log_lines,
        )));
        Self::with_factory(config, factory, metrics)
    }

    /// Parser over a caller-built strategy set
    pub fn with_factory(config: ParserConfig, factory: StrategyFactory, metrics: Arc<ParseMetrics>) -> Self {
        let selector = StrategySelector::new(
            factory,
            config.adaptive_selection,
            config.strategy_cache_size,
        );
        let mode = if config.strict_validation {
            ValidationMode::Strict
        } else {
            ValidationMode::Lenient
        };
        let validator = ResultValidator::new(mode, &config.required_fields);

        Self {
            config,
            selector,
            validator,
            metrics,
            results: None,
            tasks: None,
        }
    }

    /// Attach the stores `parse_and_create` writes to
    pub fn with_stores(mut self, results: Arc<dyn ResultStore>, tasks: Arc<dyn TaskStore>) -> Self {
        self.results = Some(results);
        self.tasks = Some(tasks);
        self
    }

    pub fn register_strategy(&mut self, strategy: Strategy) {
        info!(strategy = %strategy, "Registering result strategy");
        self.selector.register(strategy);
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn strategies(&self) -> &[Strategy] {
        self.selector.factory().strategies()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_handle(&self) -> Arc<ParseMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.selector.cache_stats()
    }

    /// Parse under the configured timeout
    pub async fn parse_from_logs(&self, execution_log: &str) -> Result<ResultRecord, ParseError> {
        self.parse_with_timeout(&CancellationToken::new(), execution_log).await
    }

    /// Parse under the configured timeout and an external cancellation token
    pub async fn parse_with_timeout(
        &self,
        cancel: &CancellationToken,
        execution_log: &str,
    ) -> Result<ResultRecord, ParseError> {
        let timeout = self.config.parse_timeout();
        // Child token so a timeout stops our own work without touching the caller's
        let scope = cancel.child_token();

        match tokio::time::timeout(timeout, self.parse_from_logs_with_context(&scope, execution_log)).await {
            Ok(result) => result,
            Err(_) => {
                scope.cancel();
                self.metrics.record_error(MetricErrorType::Timeout);
                warn!(timeout_ms = timeout.as_millis() as u64, "Result parsing timed out");
                Err(ParseError::Timeout(timeout))
            }
        }
    }

    /// Parse until done or until `cancel` fires. No timeout of its own.
    pub async fn parse_from_logs_with_context(
        &self,
        cancel: &CancellationToken,
        execution_log: &str,
    ) -> Result<ResultRecord, ParseError> {
        let started = Instant::now();
        self.metrics.record_attempt();

        match self.run(cancel, execution_log).await {
            Ok((record, kind)) => {
                let elapsed = started.elapsed().as_nanos() as u64;
                self.metrics.record_success(kind, elapsed);
                debug!(
                    strategy = ?kind,
                    elapsed_us = elapsed / 1_000,
                    session_id = record.session_id().unwrap_or(""),
                    "Result extracted"
                );
                Ok(record)
            }
            Err(e) => {
                self.metrics.record_error(e.kind());
                Err(e)
            }
        }
    }

    /// Parse and convert into the typed result; always validates strictly
    pub async fn parse_typed(&self, execution_log: &str) -> Result<ParsedResult, ParseError> {
        let record = self.parse_from_logs(execution_log).await?;
        Ok(ParsedResult::try_from(&record)?)
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        execution_log: &str,
    ) -> Result<(ResultRecord, StrategyKind), ParseError> {
        if execution_log.trim().is_empty() {
            return Err(ParseError::EmptyInput);
        }
        if cancel.is_cancelled() {
            return Err(ParseError::Cancelled);
        }

        let blob: Arc<str> = Arc::from(execution_log);
        let eligible = self.selector.eligible(&blob);
        if eligible.is_empty() {
            return Err(ParseError::NoMatchFound(
                "no registered strategy accepts this log".to_string(),
            ));
        }

        let tries_per_strategy = self.config.retry_attempts.saturating_add(1);
        let mut attempts: u32 = 0;
        let mut last_error = None;

        for strategy in &eligible {
            match self.attempt_cycle(cancel, strategy, &blob, tries_per_strategy).await {
                Ok(record) => {
                    self.check(&record)?;
                    return Ok((record, strategy.kind()));
                }
                Err(e @ ParseError::Cancelled) => return Err(e),
                Err(e) => {
                    attempts = attempts.saturating_add(tries_per_strategy);
                    warn!(strategy = %strategy, error = %e, "Strategy exhausted, trying the next one");
                    last_error = Some(e);
                }
            }
        }

        Err(ParseError::MaxRetriesExceeded {
            attempts,
            last: Box::new(last_error.unwrap_or_else(|| {
                ParseError::NoMatchFound("no strategy produced a result".to_string())
            })),
        })
    }

    /// Up to `tries` attempts with linear backoff, all on one strategy
    async fn attempt_cycle(
        &self,
        cancel: &CancellationToken,
        strategy: &Strategy,
        blob: &Arc<str>,
        tries: u32,
    ) -> Result<ResultRecord, ParseError> {
        let mut last_error = None;

        for attempt in 1..=tries {
            if cancel.is_cancelled() {
                return Err(ParseError::Cancelled);
            }

            if attempt > 1 {
                self.metrics.record_retry();
                let backoff = self.config.retry_backoff() * (attempt - 1);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ParseError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            let job_strategy = strategy.clone();
            let job_blob = Arc::clone(blob);
            let job = tokio::task::spawn_blocking(move || job_strategy.parse(&job_blob));

            // A cancelled job keeps running on the blocking pool; its result is dropped
            let joined = tokio::select! {
                _ = cancel.cancelled() => return Err(ParseError::Cancelled),
                joined = job => joined,
            };

            let result = joined.unwrap_or_else(|e| {
                Err(ParseError::InvalidFormat(format!(
                    "strategy '{}' aborted: {}",
                    strategy.name(),
                    e
                )))
            });

            match result {
                Ok(record) => return Ok(record),
                Err(e) => {
                    debug!(strategy = %strategy, attempt, error = %e, "Parse attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ParseError::NoMatchFound(format!("strategy '{}' was never attempted", strategy.name()))
        }))
    }

    fn check(&self, record: &ResultRecord) -> Result<(), ParseError> {
        let errors = self.validator.collect_errors(record);
        if !errors.is_empty() {
            self.metrics.record_validation_errors(errors.len() as u64);
        }
        self.validator.resolve(errors)?;
        Ok(())
    }

    /// Parse the log and persist the result for the conversation.
    ///
    /// Failures are logged and swallowed; `None` means nothing was stored.
    pub async fn parse_and_create(
        &self,
        conversation: &Conversation,
        execution_log: &str,
    ) -> Option<StoredResult> {
        match self.try_parse_and_create(conversation, execution_log).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    conversation_id = %conversation.id,
                    error = %e,
                    "Could not create result from execution log"
                );
                None
            }
        }
    }

    /// `Ok(None)` when a result already exists for the conversation
    pub async fn try_parse_and_create(
        &self,
        conversation: &Conversation,
        execution_log: &str,
    ) -> Result<Option<StoredResult>, CreateError> {
        let (Some(results), Some(tasks)) = (&self.results, &self.tasks) else {
            return Err(CreateError::NotConfigured);
        };

        if results.exists_by_conversation_id(&conversation.id).await? {
            debug!(conversation_id = %conversation.id, "Result already stored, skipping");
            return Ok(None);
        }

        let record = self.parse_from_logs(execution_log).await?;
        let session_id = record.session_id().map(str::to_string);

        let stored = results.create_result(&conversation.id, record).await?;
        info!(
            conversation_id = %conversation.id,
            result_id = %stored.id,
            "Stored result"
        );

        if let Some(session_id) = session_id.filter(|s| !s.is_empty()) {
            // The result is already persisted; a failed task update does not undo it
            if let Err(e) = tasks.update_task_session_id(&conversation.task_id, &session_id).await {
                warn!(
                    task_id = %conversation.task_id,
                    error = %e,
                    "Failed to record session id on task"
                );
            }
        }

        Ok(Some(stored))
    }

    /// Fire-and-forget variant for session-end hooks
    pub fn spawn_parse_and_create(
        self: &Arc<Self>,
        conversation: Conversation,
        execution_log: String,
    ) -> JoinHandle<Option<StoredResult>> {
        let parser = Arc::clone(self);
        tokio::spawn(async move { parser.parse_and_create(&conversation, &execution_log).await })
    }
}
