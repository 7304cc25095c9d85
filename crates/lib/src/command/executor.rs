//! Bounded process execution: run a command through the OS shell with a hard timeout and a
//! per-stream output cap. Always yields a [`CommandRunResult`]; failures become `success=false`.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::CommandRunResult;

/// Wall-clock limit for one command.
pub const CMD_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Max captured bytes per stream.
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Appended to a stream that hit [`MAX_OUTPUT_SIZE`].
pub const TRUNCATION_MARKER: &str = "\n... (output truncated)";

/// Runs a command string and reports the outcome. Implementations must not panic or error.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> CommandRunResult;
}

/// Executes via `sh -c` (`cmd /C` on Windows) with [`CMD_TIMEOUT`] and [`MAX_OUTPUT_SIZE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str) -> CommandRunResult {
        match run_bounded(command, CMD_TIMEOUT, MAX_OUTPUT_SIZE).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("command execution failed: {}", e);
                CommandRunResult::failure(String::new(), e)
            }
        }
    }
}

fn shell_command(command: &str) -> tokio::process::Command {
    #[cfg(windows)]
    {
        let mut c = tokio::process::Command::new("cmd");
        c.arg("/C").arg(command);
        c
    }
    #[cfg(not(windows))]
    {
        let mut c = tokio::process::Command::new("sh");
        c.arg("-c").arg(command);
        // Own process group, so a timeout can take down everything the command started.
        #[cfg(unix)]
        c.process_group(0);
        c
    }
}

/// Spawn, capture both streams (bounded), and wait under `timeout`.
/// On timeout the child and all of its descendants are killed, and the child is reaped
/// before returning.
async fn run_bounded(
    command: &str,
    timeout: Duration,
    cap: usize,
) -> Result<CommandRunResult, String> {
    let mut child = shell_command(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("spawn failed: {}", e))?;
    let pid = child.id();

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let waited = tokio::time::timeout(timeout, async {
        let (out, err, status) = tokio::join!(
            read_capped(stdout, cap),
            read_capped(stderr, cap),
            child.wait()
        );
        (out, err, status)
    })
    .await;

    let (out, err, status) = match waited {
        Ok(parts) => parts,
        Err(_) => {
            #[cfg(unix)]
            if let Some(pid) = pid {
                kill_process_tree(pid).await;
            }
            #[cfg(not(unix))]
            let _ = pid;
            if let Err(e) = child.kill().await {
                log::warn!("failed to kill timed-out command: {}", e);
            }
            return Err(format!(
                "Command timed out after {}ms",
                timeout.as_millis()
            ));
        }
    };

    let status = status.map_err(|e| format!("wait failed: {}", e))?;
    let stdout = render_stream(out, cap);
    let mut stderr = render_stream(err, cap);
    if status.success() {
        return Ok(CommandRunResult::new(true, stdout, stderr));
    }
    if stderr.is_empty() {
        stderr = format!("Command failed: {}", status);
    }
    Ok(CommandRunResult::new(false, stdout, stderr))
}

/// SIGKILL `root`, every process descended from it, and every process group any of them leads.
/// Descendants are collected before signalling so re-parented grandchildren are not missed.
/// The caller's own process group is never signalled.
#[cfg(unix)]
async fn kill_process_tree(root: u32) {
    let own_group = process_table()
        .into_iter()
        .find(|p| p.pid == std::process::id())
        .map(|p| p.pgrp);
    let mut targets = vec![format!("-{}", root)];
    for p in descendants(root, &process_table()) {
        targets.push(p.pid.to_string());
        if Some(p.pgrp) != own_group && p.pgrp != root && p.pgrp > 1 {
            targets.push(format!("-{}", p.pgrp));
        }
    }
    targets.sort();
    targets.dedup();
    let status = tokio::process::Command::new("kill")
        .arg("-s")
        .arg("KILL")
        .arg("--")
        .args(&targets)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        // A nonzero exit only means some targets were already gone.
        Ok(_) => log::debug!("killed timed-out command tree: {}", targets.join(" ")),
        Err(e) => log::warn!("failed to signal timed-out command tree: {}", e),
    }
}

/// One row of the process table.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcEntry {
    pid: u32,
    ppid: u32,
    pgrp: u32,
}

/// Snapshot of `/proc`. Empty where there is no procfs; the group kill then still applies.
#[cfg(unix)]
fn process_table() -> Vec<ProcEntry> {
    let Ok(dir) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    dir.filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|pid| {
            let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
            parse_stat(&stat)
        })
        .collect()
}

/// Parse `pid (comm) state ppid pgrp ...`. `comm` may contain spaces and parentheses.
#[cfg(unix)]
fn parse_stat(stat: &str) -> Option<ProcEntry> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let pid = stat[..open].trim().parse().ok()?;
    let mut rest = stat.get(close + 1..)?.split_whitespace();
    let _state = rest.next()?;
    let ppid = rest.next()?.parse().ok()?;
    let pgrp = rest.next()?.parse().ok()?;
    Some(ProcEntry { pid, ppid, pgrp })
}

/// All processes below `root` in the parent chain (excluding `root`).
#[cfg(unix)]
fn descendants(root: u32, table: &[ProcEntry]) -> Vec<ProcEntry> {
    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for p in table.iter().filter(|p| p.ppid == parent) {
            if !found.iter().any(|f: &ProcEntry| f.pid == p.pid) {
                found.push(*p);
                frontier.push(p.pid);
            }
        }
    }
    found
}

/// Captured bytes of one stream and whether more than the cap was produced.
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Read up to `cap` bytes, then keep draining so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> Captured {
    let mut captured = Captured {
        bytes: Vec::new(),
        truncated: false,
    };
    let Some(mut reader) = reader else {
        return captured;
    };
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = cap.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.truncated = true;
                }
                captured.bytes.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) => {
                log::debug!("reading command output failed: {}", e);
                break;
            }
        }
    }
    captured
}

fn render_stream(captured: Captured, cap: usize) -> String {
    let text = String::from_utf8_lossy(&captured.bytes);
    // Lossy decoding can grow invalid bytes into U+FFFD; re-apply the cap.
    let truncated = captured.truncated || text.len() > cap;
    let mut s = truncate_utf8(&text, cap).to_string();
    if truncated {
        s.push_str(TRUNCATION_MARKER);
    }
    s
}

/// Truncate a UTF-8 string at or before `max_bytes`, respecting char boundaries.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
