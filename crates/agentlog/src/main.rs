use std::process::ExitCode;
use std::sync::Arc;

use futures_util::{pin_mut, StreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use agentlog::client::memory::MemoryExecution;
use agentlog::client::Conversation;
use agentlog::runtime::boot::{self, Pipeline};
use agentlog::runtime::stop;
use agentlog::service::LineSource;

const USAGE: &str = "usage:
  agentlog parse <log-file>...   extract the result record from each file
  agentlog replay <log-file>     stream a finished log line by line
  agentlog tail <container>      follow a container, then parse what it printed";

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    boot::init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{}", USAGE);
        return Ok(ExitCode::from(2));
    };

    let pipeline = boot::boot()?;
    let cancel = stop::cancel_on_shutdown();

    let ok = match (command.as_str(), rest) {
        ("parse", files) if !files.is_empty() => parse_files(&pipeline, &cancel, files).await?,
        ("replay", [file]) => replay(&pipeline, &cancel, file).await?,
        ("tail", [container]) => tail(&pipeline, &cancel, container).await?,
        _ => {
            eprintln!("{}", USAGE);
            return Ok(ExitCode::from(2));
        }
    };

    eprintln!("{}", serde_json::to_string(&pipeline.metrics.snapshot())?);
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn read_log(path: &str) -> Result<String, std::io::Error> {
    let bytes = tokio::fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn parse_files(
    pipeline: &Pipeline,
    cancel: &CancellationToken,
    files: &[String],
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut logs = Vec::with_capacity(files.len());
    for file in files {
        logs.push(read_log(file).await?);
    }

    let results = pipeline.batch.parse_concurrent(cancel, logs).await;

    let mut all_ok = true;
    for (file, result) in files.iter().zip(results) {
        let line = match result {
            Ok(record) => json!({ "file": file, "result": record }),
            Err(e) => {
                all_ok = false;
                json!({ "file": file, "error": e.to_string() })
            }
        };
        println!("{}", line);
    }
    Ok(all_ok)
}

async fn replay(
    pipeline: &Pipeline,
    cancel: &CancellationToken,
    file: &str,
) -> Result<bool, Box<dyn std::error::Error>> {
    let execution = Arc::new(MemoryExecution::new());
    execution
        .add_conversation(Conversation {
            id: file.to_string(),
            task_id: String::new(),
            status: "completed".to_string(),
        })
        .await;
    execution.append_log(file, &read_log(file).await?).await;
    execution.finish(file, "completed").await;

    let streams = pipeline.log_streams(execution);
    let stream = streams.stream_conversation_logs(cancel, file).await?.into_stream();
    pin_mut!(stream);

    while let Some(item) = stream.next().await {
        match item {
            Ok(line) => println!("{}", serde_json::to_string(&line)?),
            Err(e) => {
                error!("Replay failed: {}", e);
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Follow a container until it exits or we are interrupted, then parse
/// everything it printed.
async fn tail(
    pipeline: &Pipeline,
    cancel: &CancellationToken,
    container: &str,
) -> Result<bool, Box<dyn std::error::Error>> {
    let execution = Arc::new(MemoryExecution::new());
    execution
        .add_conversation(Conversation {
            id: container.to_string(),
            task_id: String::new(),
            status: "running".to_string(),
        })
        .await;
    execution.set_handle(container, Some(container)).await;

    let streams = pipeline.log_streams(execution.clone());
    let stream = streams.stream_conversation_logs(cancel, container).await?.into_stream();
    pin_mut!(stream);

    let mut captured = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(line) => {
                println!("{}", serde_json::to_string(&line)?);
                if line.source != LineSource::Synthetic {
                    captured.push_str(&line.line);
                    captured.push('\n');
                }
            }
            Err(e) => {
                error!("Tail failed: {}", e);
                break;
            }
        }
    }
    execution.finish(container, "stopped").await;

    info!("Captured {} bytes, extracting result", captured.len());
    match pipeline.parser.parse_from_logs(&captured).await {
        Ok(record) => {
            println!("{}", json!({ "container": container, "result": record }));
            Ok(true)
        }
        Err(e) => {
            println!("{}", json!({ "container": container, "error": e.to_string() }));
            Ok(false)
        }
    }
}
