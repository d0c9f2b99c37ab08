use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use serde::Serialize;

/// Error categories for metrics recording.
///
/// One bucket per `ParseError` variant; see `ParseError::kind()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricErrorType {
    EmptyInput,
    NoMatch,
    InvalidFormat,
    Validation,
    Timeout,
    Cancelled,
    MaxRetries,
}

/// Strategy families tracked for usage counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Json,
    PlanMode,
    StructuredText,
    Fallback,
    Custom,
}

/// Stream branch taken by a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamBranch {
    Live,
    Poll,
    Historical,
}

/// A wrapper that forces the wrapped data onto its own cache line(s).
///
/// Parse workers and stream producers update different groups from
/// different threads; 64-byte alignment keeps the groups from sharing a line.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct CacheAligned<T>(pub T);

/// Attempt outcomes
#[derive(Debug, Default)]
pub struct AttemptMetrics {
    pub attempts: AtomicU64,
    pub successes: AtomicU64,
    pub retries: AtomicU64,
    pub validation_errors: AtomicU64,
}

/// Cumulative latency of completed parses
#[derive(Debug, Default)]
pub struct LatencyMetrics {
    pub time_nanos: AtomicU64,
    pub count: AtomicU64,
}

#[derive(Debug, Default)]
pub struct ErrorMetrics {
    pub empty_input: AtomicU64,
    pub no_match: AtomicU64,
    pub invalid_format: AtomicU64,
    pub validation: AtomicU64,
    pub timeout: AtomicU64,
    pub cancelled: AtomicU64,
    pub max_retries: AtomicU64,
}

/// Which strategy produced each accepted record
#[derive(Debug, Default)]
pub struct StrategyMetrics {
    pub json: AtomicU64,
    pub plan_mode: AtomicU64,
    pub structured_text: AtomicU64,
    pub fallback: AtomicU64,
    pub custom: AtomicU64,
}

/// Log streaming gauges and counters
#[derive(Debug, Default)]
pub struct StreamMetrics {
    pub active_streams: AtomicI64,
    pub lines_emitted: AtomicU64,
    pub lines_truncated: AtomicU64,
    pub live: AtomicU64,
    pub poll: AtomicU64,
    pub historical: AtomicU64,
}

/// Parser and stream health counters.
///
/// Constructed once at boot and shared through an `Arc` with the result
/// parser, the batch parser and the log streaming service.
///
/// # Memory Ordering
///
/// All operations use `Ordering::Relaxed`. There is no cross-field
/// consistency requirement, so `snapshot()` may observe a parse in
/// `attempts` that has not reached `successes` yet.
#[derive(Debug, Default)]
pub struct ParseMetrics {
    pub attempts: CacheAligned<AttemptMetrics>,
    pub latency: CacheAligned<LatencyMetrics>,
    pub errors: CacheAligned<ErrorMetrics>,
    pub strategies: CacheAligned<StrategyMetrics>,
    pub streams: CacheAligned<StreamMetrics>,
}

impl ParseMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of one `parse_from_logs` call
    #[inline]
    pub fn record_attempt(&self) {
        self.attempts.0.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry of the same strategy
    #[inline]
    pub fn record_retry(&self) {
        self.attempts.0.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted record and how long the whole call took
    #[inline]
    pub fn record_success(&self, strategy: StrategyKind, time_nanos: u64) {
        self.attempts.0.successes.fetch_add(1, Ordering::Relaxed);
        self.latency.0.count.fetch_add(1, Ordering::Relaxed);
        self.latency.0.time_nanos.fetch_add(time_nanos, Ordering::Relaxed);

        let counter = match strategy {
            StrategyKind::Json => &self.strategies.0.json,
            StrategyKind::PlanMode => &self.strategies.0.plan_mode,
            StrategyKind::StructuredText => &self.strategies.0.structured_text,
            StrategyKind::Fallback => &self.strategies.0.fallback,
            StrategyKind::Custom => &self.strategies.0.custom,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Lenient-mode validation issues on an accepted record
    #[inline]
    pub fn record_validation_errors(&self, count: u64) {
        self.attempts.0.validation_errors.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self, error_type: MetricErrorType) {
        let counter = match error_type {
            MetricErrorType::EmptyInput => &self.errors.0.empty_input,
            MetricErrorType::NoMatch => &self.errors.0.no_match,
            MetricErrorType::InvalidFormat => &self.errors.0.invalid_format,
            MetricErrorType::Validation => &self.errors.0.validation,
            MetricErrorType::Timeout => &self.errors.0.timeout,
            MetricErrorType::Cancelled => &self.errors.0.cancelled,
            MetricErrorType::MaxRetries => &self.errors.0.max_retries,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    // --- Stream Gauges ---

    #[inline]
    pub fn stream_opened(&self, branch: StreamBranch) {
        self.streams.0.active_streams.fetch_add(1, Ordering::Relaxed);
        self.record_branch(branch);
    }

    /// Count a branch without touching the gauge; a live stream that
    /// degrades to polling counts once under each
    #[inline]
    pub fn record_branch(&self, branch: StreamBranch) {
        let counter = match branch {
            StreamBranch::Live => &self.streams.0.live,
            StreamBranch::Poll => &self.streams.0.poll,
            StreamBranch::Historical => &self.streams.0.historical,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn stream_closed(&self) {
        self.streams.0.active_streams.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_line(&self, truncated: bool) {
        self.streams.0.lines_emitted.fetch_add(1, Ordering::Relaxed);
        if truncated {
            self.streams.0.lines_truncated.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Zero every counter. Meant for test isolation; production metrics are
    /// cumulative for the process lifetime.
    pub fn reset(&self) {
        let counters = [
            &self.attempts.0.attempts,
            &self.attempts.0.successes,
            &self.attempts.0.retries,
            &self.attempts.0.validation_errors,
            &self.latency.0.time_nanos,
            &self.latency.0.count,
            &self.errors.0.empty_input,
            &self.errors.0.no_match,
            &self.errors.0.invalid_format,
            &self.errors.0.validation,
            &self.errors.0.timeout,
            &self.errors.0.cancelled,
            &self.errors.0.max_retries,
            &self.strategies.0.json,
            &self.strategies.0.plan_mode,
            &self.strategies.0.structured_text,
            &self.strategies.0.fallback,
            &self.strategies.0.custom,
            &self.streams.0.lines_emitted,
            &self.streams.0.lines_truncated,
            &self.streams.0.live,
            &self.streams.0.poll,
            &self.streams.0.historical,
        ];
        for counter in counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.streams.0.active_streams.store(0, Ordering::Relaxed);
    }

    /// Read-only snapshot with derived values computed at read time.
    ///
    /// Individual reads are atomic, the snapshot as a whole is not.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        let attempts = load(&self.attempts.0.attempts);
        let successes = load(&self.attempts.0.successes);
        let latency_count = load(&self.latency.0.count);
        let latency_nanos = load(&self.latency.0.time_nanos);

        let errors = ErrorCounts {
            empty_input: load(&self.errors.0.empty_input),
            no_match: load(&self.errors.0.no_match),
            invalid_format: load(&self.errors.0.invalid_format),
            validation: load(&self.errors.0.validation),
            timeout: load(&self.errors.0.timeout),
            cancelled: load(&self.errors.0.cancelled),
            max_retries: load(&self.errors.0.max_retries),
        };

        MetricsSnapshot {
            attempts,
            successes,
            retries: load(&self.attempts.0.retries),
            validation_errors: load(&self.attempts.0.validation_errors),
            total_errors: errors.total(),
            errors,
            success_rate: if attempts > 0 {
                successes as f64 / attempts as f64
            } else {
                1.0
            },
            avg_latency_us: if latency_count > 0 {
                (latency_nanos as f64 / latency_count as f64) / 1000.0
            } else {
                0.0
            },
            strategy_usage: StrategyUsage {
                json: load(&self.strategies.0.json),
                plan_mode: load(&self.strategies.0.plan_mode),
                structured_text: load(&self.strategies.0.structured_text),
                fallback: load(&self.strategies.0.fallback),
                custom: load(&self.strategies.0.custom),
            },
            streams: StreamCounts {
                active: self.streams.0.active_streams.load(Ordering::Relaxed),
                lines_emitted: load(&self.streams.0.lines_emitted),
                lines_truncated: load(&self.streams.0.lines_truncated),
                live: load(&self.streams.0.live),
                poll: load(&self.streams.0.poll),
                historical: load(&self.streams.0.historical),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorCounts {
    pub empty_input: u64,
    pub no_match: u64,
    pub invalid_format: u64,
    pub validation: u64,
    pub timeout: u64,
    pub cancelled: u64,
    pub max_retries: u64,
}

impl ErrorCounts {
    pub fn total(&self) -> u64 {
        self.empty_input
            + self.no_match
            + self.invalid_format
            + self.validation
            + self.timeout
            + self.cancelled
            + self.max_retries
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyUsage {
    pub json: u64,
    pub plan_mode: u64,
    pub structured_text: u64,
    pub fallback: u64,
    pub custom: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamCounts {
    pub active: i64,
    pub lines_emitted: u64,
    pub lines_truncated: u64,
    pub live: u64,
    pub poll: u64,
    pub historical: u64,
}

/// A read-only snapshot of parse and stream metrics.
///
/// ```rust,ignore
/// let snapshot = metrics.snapshot();
/// println!("{} parses, {:.0}% ok, {:.1} μs avg",
///          snapshot.attempts,
///          snapshot.success_rate * 100.0,
///          snapshot.avg_latency_us);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub retries: u64,
    pub validation_errors: u64,
    pub total_errors: u64,
    pub errors: ErrorCounts,

    // Derived
    pub success_rate: f64,
    pub avg_latency_us: f64,

    pub strategy_usage: StrategyUsage,
    pub streams: StreamCounts,
}
