//! Logs: live, polled and historical streaming of execution logs.
//!
//! Each subscription is served by one supervisor task that picks a branch
//! at start:
//!
//! - running with a container handle: follow the container's output
//! - running without one (or the tail cannot start): poll the persisted log
//! - finished: replay the persisted log once
//!
//! Lines go through a bounded channel, so a slow consumer slows the
//! producer instead of growing a buffer. Every send also watches the
//! subscription's cancellation token.

use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::Stream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::client::{ContainerTail, ExecutionOps, StoreError};
use crate::conf::StreamConfig;
use crate::parser::metrics::{ParseMetrics, StreamBranch};
use crate::service::tail::{read_capped_line, CappedLine, LineSource, LogLine, PollCursor};

const ERROR_CHANNEL_CAPACITY: usize = 4;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("log source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for StreamError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => StreamError::NotFound(id),
            StoreError::Unavailable(what) => StreamError::SourceUnavailable(what),
            other => StreamError::Store(other),
        }
    }
}

/// Final synthetic line of a stream whose conversation has ended
pub fn completion_line(status: &str) -> String {
    format!("=== Conversation completed with status: {} ===", status)
}

/// Consumer side of one stream.
///
/// Dropping the subscription (or the stream made from it) cancels the
/// producer and kills a live tail process.
pub struct LogSubscription {
    pub lines: mpsc::Receiver<LogLine>,
    /// At most one terminal error; the line channel closes after it
    pub errors: mpsc::Receiver<StreamError>,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl LogSubscription {
    fn new(
        lines: mpsc::Receiver<LogLine>,
        errors: mpsc::Receiver<StreamError>,
        handle: JoinHandle<()>,
        cancel: CancellationToken,
    ) -> Self {
        let _guard = cancel.clone().drop_guard();
        Self { lines, errors, handle, cancel, _guard }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Lines as `Ok`, ending with an `Err` if the producer failed
    pub fn into_stream(self) -> impl Stream<Item = Result<LogLine, StreamError>> {
        let LogSubscription { mut lines, mut errors, handle, _guard, .. } = self;

        async_stream::stream! {
            // Held for the stream's lifetime
            let _guard = _guard;
            let _handle = handle;

            loop {
                let next = tokio::select! {
                    biased;
                    Some(err) = errors.recv() => Some(Err(err)),
                    line = lines.recv() => line.map(Ok),
                };

                match next {
                    Some(Ok(line)) => yield Ok(line),
                    Some(Err(err)) => {
                        yield Err(err);
                        break;
                    }
                    None => {
                        // Producer finished; an error may have raced the close
                        if let Ok(err) = errors.try_recv() {
                            yield Err(err);
                        }
                        break;
                    }
                }
            }
        }
    }
}

pub struct LogStreamService {
    execution: Arc<dyn ExecutionOps>,
    tail: Arc<dyn ContainerTail>,
    config: StreamConfig,
    metrics: Arc<ParseMetrics>,
}

enum Branch {
    Live(String),
    Poll,
    Historical,
}

impl LogStreamService {
    pub fn new(
        execution: Arc<dyn ExecutionOps>,
        tail: Arc<dyn ContainerTail>,
        config: StreamConfig,
        metrics: Arc<ParseMetrics>,
    ) -> Self {
        Self { execution, tail, config, metrics }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Start streaming a conversation's output.
    ///
    /// Lookup failures are returned directly; anything that goes wrong
    /// after the stream has started arrives on the error channel.
    pub async fn stream_conversation_logs(
        &self,
        cancel: &CancellationToken,
        conversation_id: &str,
    ) -> Result<LogSubscription, StreamError> {
        let conversation = self
            .execution
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| StreamError::NotFound(conversation_id.to_string()))?;

        let running = self.execution.is_running(conversation_id).await?;
        let branch = if running {
            match self.execution.container_handle(conversation_id).await? {
                Some(handle) => Branch::Live(handle),
                None => {
                    warn!(conversation_id, "No container handle, polling the execution log");
                    Branch::Poll
                }
            }
        } else {
            Branch::Historical
        };

        let scope = cancel.child_token();
        let (line_tx, line_rx) = mpsc::channel(self.config.channel_capacity);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let ctx = StreamContext {
            conversation_id: conversation_id.to_string(),
            status: conversation.status,
            execution: Arc::clone(&self.execution),
            tail: Arc::clone(&self.tail),
            config: self.config.clone(),
            sink: LineSink {
                lines: line_tx,
                errors: error_tx,
                cancel: scope.clone(),
                metrics: Arc::clone(&self.metrics),
            },
        };

        let metrics = Arc::clone(&self.metrics);
        let handle = tokio::spawn(async move {
            match branch {
                Branch::Live(handle) => {
                    let _active = ActiveStream::open(metrics, StreamBranch::Live);
                    info!(conversation_id = %ctx.conversation_id, %handle, "Streaming live container output");
                    ctx.run_live(&handle).await;
                }
                Branch::Poll => {
                    let _active = ActiveStream::open(metrics, StreamBranch::Poll);
                    ctx.run_poll().await;
                }
                Branch::Historical => {
                    let _active = ActiveStream::open(metrics, StreamBranch::Historical);
                    debug!(conversation_id = %ctx.conversation_id, "Replaying execution log");
                    ctx.run_historical().await;
                }
            }
            debug!(conversation_id = %ctx.conversation_id, "Log stream closed");
        });

        Ok(LogSubscription::new(line_rx, error_rx, handle, scope))
    }

    /// The full persisted log; empty when nothing was written yet
    pub async fn get_historical_logs(&self, conversation_id: &str) -> Result<String, StreamError> {
        if self.execution.get_conversation(conversation_id).await?.is_none() {
            return Err(StreamError::NotFound(conversation_id.to_string()));
        }
        Ok(self
            .execution
            .execution_log(conversation_id)
            .await?
            .unwrap_or_default())
    }

    pub async fn is_conversation_running(&self, conversation_id: &str) -> Result<bool, StreamError> {
        Ok(self.execution.is_running(conversation_id).await?)
    }
}

/// Keeps the active-stream gauge honest however the task ends
struct ActiveStream(Arc<ParseMetrics>);

impl ActiveStream {
    fn open(metrics: Arc<ParseMetrics>, branch: StreamBranch) -> Self {
        metrics.stream_opened(branch);
        Self(metrics)
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.0.stream_closed();
    }
}

#[derive(Clone)]
struct LineSink {
    lines: mpsc::Sender<LogLine>,
    errors: mpsc::Sender<StreamError>,
    cancel: CancellationToken,
    metrics: Arc<ParseMetrics>,
}

impl LineSink {
    /// False once the stream is cancelled or the consumer is gone
    async fn emit(&self, line: LogLine, truncated: bool) -> bool {
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.lines.send(line) => sent.is_ok(),
        };
        if sent {
            self.metrics.record_line(truncated);
        }
        sent
    }

    async fn emit_capped(&self, line: CappedLine, source: LineSource) -> bool {
        self.emit(LogLine::now(line.text, source), line.truncated).await
    }

    fn fail(&self, error: StreamError) {
        warn!(error = %error, "Log stream failed");
        if self.errors.try_send(error).is_err() {
            debug!("Error channel full or closed, dropping stream error");
        }
    }
}

struct StreamContext {
    conversation_id: String,
    /// Status at subscription time, used if the final lookup fails
    status: String,
    execution: Arc<dyn ExecutionOps>,
    tail: Arc<dyn ContainerTail>,
    config: StreamConfig,
    sink: LineSink,
}

impl StreamContext {
    async fn run_live(&self, handle: &str) {
        let mut command = self.tail.tail_command(handle);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    conversation_id = %self.conversation_id,
                    handle,
                    error = %e,
                    "Could not start container tail, polling the execution log instead"
                );
                self.sink.metrics.record_branch(StreamBranch::Poll);
                self.run_poll().await;
                return;
            }
        };

        let max_line_bytes = self.config.max_line_bytes;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pumps = async {
            tokio::join!(
                pump(stdout, LineSource::Stdout, &self.sink, max_line_bytes),
                pump(stderr, LineSource::Stderr, &self.sink, max_line_bytes),
            )
        };

        tokio::select! {
            _ = self.sink.cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Container tail already exited");
                }
                return;
            }
            _ = pumps => {}
        }

        if self.sink.cancel.is_cancelled() || self.sink.lines.is_closed() {
            let _ = child.kill().await;
            return;
        }

        match child.wait().await {
            Ok(status) => debug!(%status, "Container tail exited"),
            Err(e) => debug!(error = %e, "Could not reap container tail"),
        }

        match self.execution.is_running(&self.conversation_id).await {
            Ok(false) => self.emit_completion().await,
            Ok(true) => debug!(
                conversation_id = %self.conversation_id,
                "Container output ended while the conversation is still running"
            ),
            Err(e) => self.sink.fail(e.into()),
        }
    }

    async fn run_poll(&self) {
        let mut cursor = PollCursor::new(self.config.max_line_bytes);
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.sink.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            // Liveness first, so the read after the final check sees every line
            let running = match self.execution.is_running(&self.conversation_id).await {
                Ok(running) => running,
                Err(e) => {
                    self.sink.fail(e.into());
                    return;
                }
            };
            let blob = match self.read_log().await {
                Ok(blob) => blob,
                Err(e) => {
                    self.sink.fail(e);
                    return;
                }
            };

            for line in cursor.advance(&blob, !running) {
                if !self.sink.emit_capped(line, LineSource::Log).await {
                    return;
                }
            }

            if !running {
                self.emit_completion().await;
                return;
            }
        }
    }

    async fn run_historical(&self) {
        let blob = match self.read_log().await {
            Ok(blob) => blob,
            Err(e) => {
                self.sink.fail(e);
                return;
            }
        };

        let mut cursor = PollCursor::new(self.config.max_line_bytes);
        for line in cursor.advance(&blob, true) {
            if !self.sink.emit_capped(line, LineSource::Log).await {
                return;
            }
        }
        self.emit_completion().await;
    }

    async fn read_log(&self) -> Result<String, StreamError> {
        Ok(self
            .execution
            .execution_log(&self.conversation_id)
            .await?
            .unwrap_or_default())
    }

    async fn emit_completion(&self) {
        let status = match self.execution.get_conversation(&self.conversation_id).await {
            Ok(Some(conversation)) => conversation.status,
            _ => self.status.clone(),
        };
        self.sink
            .emit(LogLine::now(completion_line(&status), LineSource::Synthetic), false)
            .await;
    }
}

async fn pump<R>(reader: Option<R>, source: LineSource, sink: &LineSink, max_line_bytes: usize)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);

    loop {
        match read_capped_line(&mut reader, max_line_bytes).await {
            Ok(Some(line)) => {
                if !sink.emit_capped(line, source).await {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                sink.fail(StreamError::Io(e));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::{MemoryExecution, ShellTail};
    use crate::client::Conversation;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            task_id: format!("task-{}", id),
            status: "running".to_string(),
        }
    }

    fn config() -> StreamConfig {
        StreamConfig {
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    fn service(exec: Arc<MemoryExecution>, tail: impl ContainerTail + 'static) -> LogStreamService {
        LogStreamService::new(exec, Arc::new(tail), config(), Arc::new(ParseMetrics::new()))
    }

    async fn collect(sub: LogSubscription) -> Vec<Result<LogLine, StreamError>> {
        let stream = sub.into_stream();
        tokio::pin!(stream);
        let mut out = Vec::new();
        while let Some(item) = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("stream stalled")
        {
            out.push(item);
        }
        out
    }

    fn texts(items: &[Result<LogLine, StreamError>]) -> Vec<String> {
        items
            .iter()
            .map(|item| item.as_ref().expect("unexpected stream error").line.clone())
            .collect()
    }

    /// A tail whose program does not exist
    struct MissingBinary;

    impl ContainerTail for MissingBinary {
        fn tail_command(&self, _handle: &str) -> tokio::process::Command {
            tokio::process::Command::new("/nonexistent/agentlog-tail")
        }
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let exec = Arc::new(MemoryExecution::new());
        let svc = service(exec, ShellTail::new("true"));

        let result = svc.stream_conversation_logs(&CancellationToken::new(), "nope").await;
        assert!(matches!(result, Err(StreamError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_historical_replay() {
        let exec = Arc::new(MemoryExecution::new());
        exec.add_conversation(conversation("c1")).await;
        exec.append_log("c1", "first\nsecond\nlast without newline").await;
        exec.finish("c1", "completed").await;

        let svc = service(exec, ShellTail::new("true"));
        let sub = svc.stream_conversation_logs(&CancellationToken::new(), "c1").await.unwrap();
        let items = collect(sub).await;

        assert_eq!(
            texts(&items),
            vec![
                "first".to_string(),
                "second".to_string(),
                "last without newline".to_string(),
                completion_line("completed"),
            ]
        );
        assert!(items.iter().all(|i| i.as_ref().unwrap().timestamp > 0));

        let snapshot = svc.metrics.snapshot();
        assert_eq!(snapshot.streams.historical, 1);
        assert_eq!(snapshot.streams.lines_emitted, 4);
    }

    #[tokio::test]
    async fn test_historical_truncates_long_lines() {
        let exec = Arc::new(MemoryExecution::new());
        exec.add_conversation(conversation("c1")).await;
        exec.append_log("c1", &format!("{}\nshort\n", "y".repeat(64))).await;
        exec.finish("c1", "completed").await;

        let svc = LogStreamService::new(
            exec,
            Arc::new(ShellTail::new("true")),
            StreamConfig { max_line_bytes: 16, ..config() },
            Arc::new(ParseMetrics::new()),
        );
        let items = collect(svc.stream_conversation_logs(&CancellationToken::new(), "c1").await.unwrap()).await;
        let lines = texts(&items);

        assert!(lines[0].starts_with(&"y".repeat(16)));
        assert!(lines[0].ends_with(crate::service::tail::TRUNCATION_MARKER));
        assert_eq!(lines[1], "short");
        assert_eq!(svc.metrics.snapshot().streams.lines_truncated, 1);
    }

    #[tokio::test]
    async fn test_poll_follows_growing_log() {
        let exec = Arc::new(MemoryExecution::new());
        exec.add_conversation(conversation("c1")).await;
        exec.append_log("c1", "one\npar").await;

        let svc = service(exec.clone(), ShellTail::new("true"));
        let sub = svc.stream_conversation_logs(&CancellationToken::new(), "c1").await.unwrap();

        let writer = {
            let exec = exec.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                exec.append_log("c1", "tial\ntwo\n").await;
                tokio::time::sleep(Duration::from_millis(40)).await;
                exec.append_log("c1", "tail").await;
                exec.finish("c1", "failed").await;
            })
        };

        let items = collect(sub).await;
        writer.await.unwrap();

        assert_eq!(
            texts(&items),
            vec![
                "one".to_string(),
                "partial".to_string(),
                "two".to_string(),
                "tail".to_string(),
                completion_line("failed"),
            ]
        );
        assert_eq!(svc.metrics.snapshot().streams.poll, 1);
    }

    #[tokio::test]
    async fn test_live_tail_reads_stdout_and_stderr() {
        let exec = Arc::new(MemoryExecution::new());
        exec.add_conversation(conversation("c1")).await;
        exec.set_handle("c1", Some("box-1")).await;

        let tail = ShellTail::new("echo out-{handle}; echo err-{handle} >&2");
        let svc = service(exec.clone(), tail);
        let sub = svc.stream_conversation_logs(&CancellationToken::new(), "c1").await.unwrap();

        let items = collect(sub).await;
        let mut lines = texts(&items);
        lines.sort();
        // Still running, so no completion line
        assert_eq!(lines, vec!["err-box-1".to_string(), "out-box-1".to_string()]);

        let sources: Vec<LineSource> = items.iter().map(|i| i.as_ref().unwrap().source).collect();
        assert!(sources.contains(&LineSource::Stdout));
        assert!(sources.contains(&LineSource::Stderr));
        assert_eq!(svc.metrics.snapshot().streams.live, 1);
    }

    #[tokio::test]
    async fn test_live_tail_emits_completion_after_finish() {
        let exec = Arc::new(MemoryExecution::new());
        exec.add_conversation(conversation("c1")).await;
        exec.set_handle("c1", Some("box-1")).await;

        let svc = service(exec.clone(), ShellTail::new("echo working; sleep 0.2; echo done"));
        let sub = svc.stream_conversation_logs(&CancellationToken::new(), "c1").await.unwrap();
        exec.finish("c1", "completed").await;

        let items = collect(sub).await;
        assert_eq!(
            texts(&items),
            vec!["working".to_string(), "done".to_string(), completion_line("completed")]
        );
    }

    #[tokio::test]
    async fn test_live_tail_degrades_to_poll() {
        let running = Arc::new(MemoryExecution::new());
        running.add_conversation(conversation("c2")).await;
        running.set_handle("c2", Some("box-2")).await;
        running.append_log("c2", "from the log\n").await;

        let svc = service(running.clone(), MissingBinary);
        let sub = svc.stream_conversation_logs(&CancellationToken::new(), "c2").await.unwrap();

        let finisher = {
            let running = running.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                running.finish("c2", "completed").await;
            })
        };

        let items = collect(sub).await;
        finisher.await.unwrap();

        assert_eq!(
            texts(&items),
            vec!["from the log".to_string(), completion_line("completed")]
        );
        let snapshot = svc.metrics.snapshot();
        assert_eq!(snapshot.streams.live, 1);
        assert_eq!(snapshot.streams.poll, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_live_tail() {
        let exec = Arc::new(MemoryExecution::new());
        exec.add_conversation(conversation("c1")).await;
        exec.set_handle("c1", Some("box-1")).await;

        let svc = service(exec, ShellTail::new("echo started; sleep 30"));
        let cancel = CancellationToken::new();
        let sub = svc.stream_conversation_logs(&cancel, "c1").await.unwrap();

        let stream = sub.into_stream();
        tokio::pin!(stream);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.line, "started");

        cancel.cancel();
        let rest = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("cancellation should end the stream");
        assert!(rest.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_log_surfaces_error() {
        let exec = Arc::new(MemoryExecution::new());
        exec.add_conversation(conversation("c1")).await;
        exec.finish("c1", "completed").await;
        exec.set_log_unavailable(true).await;

        let svc = service(exec, ShellTail::new("true"));
        let items = collect(svc.stream_conversation_logs(&CancellationToken::new(), "c1").await.unwrap()).await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(StreamError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_historical_logs_and_liveness() {
        let exec = Arc::new(MemoryExecution::new());
        exec.add_conversation(conversation("c1")).await;
        exec.append_log("c1", "a\nb\n").await;

        let svc = service(exec.clone(), ShellTail::new("true"));
        assert_eq!(svc.get_historical_logs("c1").await.unwrap(), "a\nb\n");
        assert!(svc.is_conversation_running("c1").await.unwrap());

        exec.finish("c1", "completed").await;
        assert!(!svc.is_conversation_running("c1").await.unwrap());

        assert!(matches!(svc.get_historical_logs("nope").await, Err(StreamError::NotFound(_))));
        assert!(matches!(svc.is_conversation_running("nope").await, Err(StreamError::NotFound(_))));
    }

    #[test]
    fn test_wire_shape() {
        let line = LogLine::now("hello", LineSource::Stdout);
        let json = serde_json::to_value(&line).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(json["line"], "hello");
        assert!(json["timestamp"].is_i64());
    }
}
