//! Batch: parse many execution logs with one shared parser.
//!
//! The concurrent path runs a fixed pool of workers fed through a bounded
//! job channel. Results come back in input order whatever the completion
//! order was.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::parser::{ParseError, ResultRecord};
use crate::service::result::ResultParser;

pub type BatchResult = Result<ResultRecord, ParseError>;

pub struct BatchParser {
    parser: Arc<ResultParser>,
    workers: usize,
}

impl BatchParser {
    pub fn new(parser: Arc<ResultParser>, workers: usize) -> Self {
        Self {
            parser,
            workers: workers.max(1),
        }
    }

    /// Pool size taken from the parser's own config
    pub fn from_parser(parser: Arc<ResultParser>) -> Self {
        let workers = parser.config().batch_workers;
        Self::new(parser, workers)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// One log at a time. Once `cancel` fires the remaining logs are
    /// reported as cancelled without being parsed.
    pub async fn parse_sequential(&self, cancel: &CancellationToken, logs: &[String]) -> Vec<BatchResult> {
        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            if cancel.is_cancelled() {
                out.push(Err(ParseError::Cancelled));
                continue;
            }
            out.push(self.parser.parse_with_timeout(cancel, log).await);
        }
        out
    }

    pub async fn parse_concurrent(&self, cancel: &CancellationToken, logs: Vec<String>) -> Vec<BatchResult> {
        let total = logs.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = self.workers.min(total);
        let (job_tx, job_rx) = mpsc::channel::<(usize, String)>(workers);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, BatchResult)>(total);

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let parser = Arc::clone(&self.parser);
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let cancel = cancel.clone();

            pool.spawn(async move {
                loop {
                    // Lock only while waiting for the next job
                    let job = jobs.lock().await.recv().await;
                    let Some((index, log)) = job else {
                        break;
                    };
                    let outcome = parser.parse_with_timeout(&cancel, &log).await;
                    if results.send((index, outcome)).await.is_err() {
                        break;
                    }
                }
                debug!(worker, "Batch worker finished");
            });
        }
        drop(result_tx);

        for (index, log) in logs.into_iter().enumerate() {
            let sent = tokio::select! {
                _ = cancel.cancelled() => false,
                sent = job_tx.send((index, log)) => sent.is_ok(),
            };
            if !sent {
                warn!(submitted = index, total, "Batch submission stopped early");
                break;
            }
        }
        drop(job_tx);

        let mut slots: Vec<Option<BatchResult>> = (0..total).map(|_| None).collect();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = result_rx.recv() => match received {
                    Some((index, outcome)) => slots[index] = Some(outcome),
                    None => break,
                },
            }
        }
        // Keep whatever finished before the cancellation was noticed
        while let Ok((index, outcome)) = result_rx.try_recv() {
            slots[index] = Some(outcome);
        }

        // Collected results are kept; the workers only need to stop
        pool.abort_all();
        while pool.join_next().await.is_some() {}

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(ParseError::Cancelled)))
            .collect()
    }
}
