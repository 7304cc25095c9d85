//! Post-apply command: whitelist validation, bounded execution, audit history, and the runner
//! that ties them together after every hosts-apply event.

mod executor;
mod history;
mod runner;
mod validate;

pub use executor::{
    CommandExecutor, ShellExecutor, CMD_TIMEOUT, MAX_OUTPUT_SIZE, TRUNCATION_MARKER,
};
pub use history::{prune, MAX_RECORDS};
pub use runner::{PostApplyRunner, RUN_RESULT_EVENT};
pub use validate::{validate, Verdict, ALLOWED_PREFIXES, DANGEROUS_OPERATORS, MAX_COMMAND_LEN};

use serde::{Deserialize, Serialize};

/// Outcome of one post-apply command run (or of its rejection). Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRunResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock time the result was produced, Unix ms.
    #[serde(rename = "add_time_ms")]
    pub timestamp: i64,
}

impl CommandRunResult {
    pub fn new(success: bool, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            success,
            stdout: stdout.into(),
            stderr: stderr.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn failure(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::new(false, stdout, stderr)
    }

    /// Synthetic result for a command the validator refused; nothing was spawned.
    pub fn rejected(reason: &str) -> Self {
        Self::failure(String::new(), format!("Security: {}", reason))
    }
}
