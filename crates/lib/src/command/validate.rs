//! Whitelist check for the post-apply command.
//!
//! Substring-based and strict: the command must start with an allowed prefix and must not
//! contain any shell operator that could chain, redirect, or substitute. This is not a shell
//! parser; false rejections are accepted over false acceptances.

use serde::Serialize;

/// Allowed command prefixes. Matched literally against the trimmed command.
pub const ALLOWED_PREFIXES: &[&str] = &[
    "/usr/bin/",
    "/bin/",
    "/usr/local/bin/",
    "/usr/sbin/",
    "/sbin/",
    "echo",
    "ping",
    "curl",
    "wget",
    "systemctl",
    "scutil",
    "dscacheutil",
];

/// Substrings that reject a command regardless of prefix.
pub const DANGEROUS_OPERATORS: &[&str] = &["&&", "||", "|", ";", "`", "$(", ">", "<", "&", "\n"];

/// Max trimmed length in characters.
pub const MAX_COMMAND_LEN: usize = 1000;

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Classify a command. First failing rule wins.
pub fn validate(command: &str) -> Verdict {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Verdict::reject("Command is empty or invalid");
    }
    if trimmed.chars().count() > MAX_COMMAND_LEN {
        return Verdict::reject("Command too long");
    }
    if !ALLOWED_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        return Verdict::reject(format!(
            "Command must start with one of: {}",
            ALLOWED_PREFIXES.join(", ")
        ));
    }
    if DANGEROUS_OPERATORS.iter().any(|op| trimmed.contains(op)) {
        return Verdict::reject("Command contains dangerous operators");
    }
    Verdict::ok()
}
