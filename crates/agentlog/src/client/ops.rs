//! Ops: abstract interfaces over the execution subsystem and the stores.
//!
//! Object-safe thanks to `Pin<Box<…>>` returns, so services hold them as
//! `Arc<dyn …>`. Implementations must be `Send + Sync`.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::error::StoreError;
use crate::parser::ResultRecord;

/// The slice of a conversation the capture pipeline needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Owning task; receives the session id of the parsed result
    pub task_id: String,
    /// Free-form status reported in the completion line
    pub status: String,
}

/// A persisted result as returned by the result store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredResult {
    pub id: String,
    pub conversation_id: String,
    pub record: ResultRecord,
    pub created_at: DateTime<Utc>,
}

/// Execution subsystem: liveness, container handles and persisted logs.
pub trait ExecutionOps: Send + Sync {
    fn get_conversation<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Option<Conversation>, StoreError>> + Send + 'a>>;

    fn is_running<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bool, StoreError>> + Send + 'a>>;

    /// Handle of the container running the conversation, if one is attached
    fn container_handle<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Option<String>, StoreError>> + Send + 'a>>;

    /// The persisted, append-only log blob
    fn execution_log<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Option<String>, StoreError>> + Send + 'a>>;
}

pub trait ResultStore: Send + Sync {
    fn exists_by_conversation_id<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bool, StoreError>> + Send + 'a>>;

    fn create_result<'a>(
        &'a self,
        conversation_id: &'a str,
        record: ResultRecord,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<StoredResult, StoreError>> + Send + 'a>>;
}

pub trait TaskStore: Send + Sync {
    fn update_task_session_id<'a>(
        &'a self,
        task_id: &'a str,
        session_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), StoreError>> + Send + 'a>>;
}

/// Builds the process that follows a container's output.
///
/// The returned command must write the container's stdout and stderr to
/// its own, and keep running until the container stops.
pub trait ContainerTail: Send + Sync {
    fn tail_command(&self, handle: &str) -> tokio::process::Command;
}
