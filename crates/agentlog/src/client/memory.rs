//! Memory: in-memory collaborators.
//!
//! Deterministic implementations of the ops traits backed by maps behind a
//! mutex. The binary uses them to parse standalone log files; tests use them
//! to drive the parser and the streaming service without a database or a
//! container runtime.

use std::collections::HashMap;
use std::pin::Pin;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::client::error::StoreError;
use crate::client::ops::{ContainerTail, Conversation, ExecutionOps, ResultStore, StoredResult, TaskStore};
use crate::parser::ResultRecord;

// ── Execution subsystem ─────────────────────────────────────────

#[derive(Debug, Clone)]
struct Session {
    conversation: Conversation,
    running: bool,
    handle: Option<String>,
    log: String,
}

#[derive(Default)]
struct ExecutionInner {
    sessions: HashMap<String, Session>,
    log_unavailable: bool,
}

/// Conversations with an append-only log each.
#[derive(Default)]
pub struct MemoryExecution {
    inner: Mutex<ExecutionInner>,
}

impl MemoryExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation as running, with no container and an empty log
    pub async fn add_conversation(&self, conversation: Conversation) {
        let mut state = self.inner.lock().await;
        state.sessions.insert(
            conversation.id.clone(),
            Session {
                conversation,
                running: true,
                handle: None,
                log: String::new(),
            },
        );
    }

    pub async fn append_log(&self, conversation_id: &str, text: &str) {
        if let Some(session) = self.inner.lock().await.sessions.get_mut(conversation_id) {
            session.log.push_str(text);
        }
    }

    pub async fn set_handle(&self, conversation_id: &str, handle: Option<&str>) {
        if let Some(session) = self.inner.lock().await.sessions.get_mut(conversation_id) {
            session.handle = handle.map(str::to_string);
        }
    }

    /// Mark the conversation finished with the given status
    pub async fn finish(&self, conversation_id: &str, status: &str) {
        if let Some(session) = self.inner.lock().await.sessions.get_mut(conversation_id) {
            session.running = false;
            session.conversation.status = status.to_string();
        }
    }

    /// Make log reads fail, as if the backing store went away
    pub async fn set_log_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.log_unavailable = unavailable;
    }
}

impl ExecutionOps for MemoryExecution {
    fn get_conversation<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Option<Conversation>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            Ok(state.sessions.get(conversation_id).map(|s| s.conversation.clone()))
        })
    }

    fn is_running<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bool, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            state
                .sessions
                .get(conversation_id)
                .map(|s| s.running)
                .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))
        })
    }

    fn container_handle<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Option<String>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            Ok(state.sessions.get(conversation_id).and_then(|s| s.handle.clone()))
        })
    }

    fn execution_log<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Option<String>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            if state.log_unavailable {
                return Err(StoreError::Unavailable("execution log store".to_string()));
            }
            Ok(state.sessions.get(conversation_id).map(|s| s.log.clone()))
        })
    }
}

// ── Result store ────────────────────────────────────────────────

#[derive(Default)]
struct ResultInner {
    results: HashMap<String, StoredResult>,
    fail_creates: bool,
}

/// One stored result per conversation.
#[derive(Default)]
pub struct MemoryResultStore {
    inner: Mutex<ResultInner>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, conversation_id: &str) -> Option<StoredResult> {
        self.inner.lock().await.results.get(conversation_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.results.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.results.is_empty()
    }

    /// Make every create fail with a backend error
    pub async fn set_fail_creates(&self, fail: bool) {
        self.inner.lock().await.fail_creates = fail;
    }
}

impl ResultStore for MemoryResultStore {
    fn exists_by_conversation_id<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bool, StoreError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.inner.lock().await.results.contains_key(conversation_id)) })
    }

    fn create_result<'a>(
        &'a self,
        conversation_id: &'a str,
        record: ResultRecord,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<StoredResult, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            if state.fail_creates {
                return Err(StoreError::Backend("create_result rejected".to_string()));
            }
            if state.results.contains_key(conversation_id) {
                return Err(StoreError::Conflict(format!(
                    "result already stored for {}",
                    conversation_id
                )));
            }

            let stored = StoredResult {
                id: Uuid::new_v4().to_string(),
                conversation_id: conversation_id.to_string(),
                record,
                created_at: Utc::now(),
            };
            state.results.insert(conversation_id.to_string(), stored.clone());
            Ok(stored)
        })
    }
}

// ── Task store ──────────────────────────────────────────────────

/// Session ids recorded per task.
#[derive(Default)]
pub struct MemoryTaskStore {
    sessions: Mutex<HashMap<String, String>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_id(&self, task_id: &str) -> Option<String> {
        self.sessions.lock().await.get(task_id).cloned()
    }
}

impl TaskStore for MemoryTaskStore {
    fn update_task_session_id<'a>(
        &'a self,
        task_id: &'a str,
        session_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.sessions
                .lock()
                .await
                .insert(task_id.to_string(), session_id.to_string());
            Ok(())
        })
    }
}

// ── Container tail ──────────────────────────────────────────────

/// Runs a shell script in place of `docker logs -f`.
///
/// `{handle}` in the script is replaced by the container handle.
#[derive(Debug, Clone)]
pub struct ShellTail {
    script: String,
}

impl ShellTail {
    pub fn new(script: impl Into<String>) -> Self {
        Self { script: script.into() }
    }
}

impl ContainerTail for ShellTail {
    fn tail_command(&self, handle: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(self.script.replace("{handle}", handle));
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            task_id: format!("task-{}", id),
            status: "running".to_string(),
        }
    }

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let exec = MemoryExecution::new();
        exec.add_conversation(conversation("c1")).await;
        exec.append_log("c1", "line 1\n").await;
        exec.append_log("c1", "line 2\n").await;

        assert!(exec.is_running("c1").await.unwrap());
        assert_eq!(exec.execution_log("c1").await.unwrap().as_deref(), Some("line 1\nline 2\n"));

        exec.finish("c1", "completed").await;
        assert!(!exec.is_running("c1").await.unwrap());
        assert_eq!(exec.get_conversation("c1").await.unwrap().unwrap().status, "completed");
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let exec = MemoryExecution::new();
        assert!(exec.get_conversation("nope").await.unwrap().is_none());
        assert!(matches!(exec.is_running("nope").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_result_store_rejects_duplicates() {
        let store = MemoryResultStore::new();
        store.create_result("c1", ResultRecord::new()).await.unwrap();

        assert!(store.exists_by_conversation_id("c1").await.unwrap());
        assert!(matches!(
            store.create_result("c1", ResultRecord::new()).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_task_store_records_session() {
        let tasks = MemoryTaskStore::new();
        tasks.update_task_session_id("t1", "sess-1").await.unwrap();
        assert_eq!(tasks.session_id("t1").await.as_deref(), Some("sess-1"));
    }

    #[test]
    fn test_shell_tail_substitutes_handle() {
        let cmd = ShellTail::new("echo {handle}").tail_command("abc");
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-c", "echo abc"]);
    }
}
