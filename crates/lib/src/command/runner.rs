//! Post-apply runner: fetch configured command, validate, execute, record, broadcast, prune, count.
//!
//! Every step tolerates failure of the previous one. Nothing here returns an error to the caller.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::executor::{CommandExecutor, ShellExecutor};
use super::history::{prune, MAX_RECORDS};
use super::validate::validate;
use super::CommandRunResult;
use crate::config::keys;
use crate::events::{AuditCounters, EventBus};
use crate::store::{string_value, ConfigStore, HistoryStore};

/// Event name broadcast after each run.
pub const RUN_RESULT_EVENT: &str = "cmd_run_result";

pub struct PostApplyRunner {
    config: Arc<dyn ConfigStore>,
    history: Arc<dyn HistoryStore>,
    executor: Arc<dyn CommandExecutor>,
    events: EventBus,
    counters: Arc<AuditCounters>,
    max_records: usize,
    /// Serialises runs so insert and prune of two apply events never interleave.
    running: Mutex<()>,
}

impl PostApplyRunner {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        history: Arc<dyn HistoryStore>,
        events: EventBus,
        counters: Arc<AuditCounters>,
    ) -> Self {
        Self {
            config,
            history,
            executor: Arc::new(ShellExecutor::new()),
            events,
            counters,
            max_records: MAX_RECORDS,
            running: Mutex::new(()),
        }
    }

    /// Replace the shell executor (e.g. with a recording fake).
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn counters(&self) -> &Arc<AuditCounters> {
        &self.counters
    }

    /// Handle one hosts-apply event. Returns the recorded result, or `None` when no command is configured.
    pub async fn run_after_apply(&self) -> Option<CommandRunResult> {
        let _guard = self.running.lock().await;

        let command = match self.config.get(keys::CMD_AFTER_HOSTS_APPLY).await {
            Ok(v) => string_value(v.as_ref())?,
            Err(e) => {
                log::warn!("reading {} failed: {}", keys::CMD_AFTER_HOSTS_APPLY, e);
                return None;
            }
        };

        let verdict = validate(&command);
        let result = if verdict.valid {
            log::info!("running post-apply command");
            self.executor.execute(&command).await
        } else {
            let reason = verdict.reason.as_deref().unwrap_or("Command rejected");
            log::warn!("post-apply command rejected: {}", reason);
            CommandRunResult::rejected(reason)
        };
        log::info!("[audit] command executed: success={}", result.success);

        if let Err(e) = self.history.insert(&result).await {
            log::error!("persisting command result failed: {}", e);
        }
        self.events.emit(RUN_RESULT_EVENT, &result);
        prune(self.history.as_ref(), self.max_records).await;
        self.counters.record(result.success);

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CfgDb, HistoryEntry, StoreError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every command it is asked to run; never spawns anything.
    #[derive(Default)]
    struct Recording {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandExecutor for Recording {
        async fn execute(&self, command: &str) -> CommandRunResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            CommandRunResult::new(true, format!("ran {}", command), "")
        }
    }

    fn runner_with(db: Arc<CfgDb>, exec: Arc<Recording>) -> (PostApplyRunner, EventBus) {
        let events = EventBus::new();
        let runner = PostApplyRunner::new(
            db.clone(),
            db,
            events.clone(),
            Arc::new(AuditCounters::new()),
        )
        .with_executor(exec);
        (runner, events)
    }

    #[tokio::test]
    async fn no_command_is_a_silent_noop() {
        let db = Arc::new(CfgDb::in_memory());
        let exec = Arc::new(Recording::default());
        let (runner, _events) = runner_with(db.clone(), exec.clone());
        assert!(runner.run_after_apply().await.is_none());
        db.set(keys::CMD_AFTER_HOSTS_APPLY, json!("   ")).await.unwrap();
        assert!(runner.run_after_apply().await.is_none());
        db.set(keys::CMD_AFTER_HOSTS_APPLY, json!(42)).await.unwrap();
        assert!(runner.run_after_apply().await.is_none());
        assert!(db.all().await.unwrap().is_empty());
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
        assert_eq!(runner.counters().snapshot().success, 0);
    }

    #[tokio::test]
    async fn rejected_command_is_audited_without_spawning() {
        let db = Arc::new(CfgDb::in_memory());
        let exec = Arc::new(Recording::default());
        let (runner, events) = runner_with(db.clone(), exec.clone());
        let mut rx = events.subscribe();
        db.set(keys::CMD_AFTER_HOSTS_APPLY, json!("rm -rf /")).await.unwrap();

        let result = runner.run_after_apply().await.unwrap();
        assert!(!result.success);
        assert!(result.stderr.starts_with("Security:"));
        assert!(result.stdout.is_empty());
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);

        let all = db.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].result, result);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.event, RUN_RESULT_EVENT);
        assert_eq!(ev.payload["success"], json!(false));
        assert_eq!(runner.counters().snapshot().failure, 1);
    }

    #[tokio::test]
    async fn valid_command_goes_through_executor() {
        let db = Arc::new(CfgDb::in_memory());
        let exec = Arc::new(Recording::default());
        let (runner, _events) = runner_with(db.clone(), exec.clone());
        db.set(keys::CMD_AFTER_HOSTS_APPLY, json!(" echo hello ")).await.unwrap();
        let result = runner.run_after_apply().await.unwrap();
        assert!(result.success);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.counters().snapshot().success, 1);
    }

    #[tokio::test]
    async fn history_is_capped_after_many_runs() {
        let db = Arc::new(CfgDb::in_memory());
        let exec = Arc::new(Recording::default());
        let (runner, _events) = runner_with(db.clone(), exec);
        db.set(keys::CMD_AFTER_HOSTS_APPLY, json!("echo x")).await.unwrap();
        let mut stamps = Vec::new();
        for _ in 0..210 {
            stamps.push(runner.run_after_apply().await.unwrap());
        }
        let all = db.all().await.unwrap();
        assert_eq!(all.len(), MAX_RECORDS);
        let kept: Vec<CommandRunResult> = all.into_iter().map(|e| e.result).collect();
        assert_eq!(kept, stamps[10..].to_vec());
    }

    /// History store where every write fails.
    struct BrokenHistory;

    #[async_trait]
    impl HistoryStore for BrokenHistory {
        async fn insert(&self, _result: &CommandRunResult) -> Result<String, StoreError> {
            Err(StoreError::Io(std::io::Error::other("read-only")))
        }
        async fn all(&self) -> Result<Vec<HistoryEntry>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("read-only")))
        }
        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }
        async fn clear(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn persistence_failure_still_broadcasts_and_counts() {
        let db = Arc::new(CfgDb::in_memory());
        db.set(keys::CMD_AFTER_HOSTS_APPLY, json!("echo hi")).await.unwrap();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let runner = PostApplyRunner::new(
            db,
            Arc::new(BrokenHistory),
            events,
            Arc::new(AuditCounters::new()),
        )
        .with_executor(Arc::new(Recording::default()));

        let result = runner.run_after_apply().await.unwrap();
        assert!(result.success);
        assert_eq!(rx.recv().await.unwrap().event, RUN_RESULT_EVENT);
        assert_eq!(runner.counters().snapshot().success, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn echo_hello_end_to_end() {
        let db = Arc::new(CfgDb::in_memory());
        let runner = PostApplyRunner::new(
            db.clone(),
            db.clone(),
            EventBus::new(),
            Arc::new(AuditCounters::new()),
        );
        db.set(keys::CMD_AFTER_HOSTS_APPLY, json!("echo hello")).await.unwrap();
        runner.run_after_apply().await;
        let all = db.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].result.success);
        assert!(all[0].result.stdout.contains("hello"));
    }
}
