//! Command execution with timeouts and bounded output capture.

use crate::error::{ExecError, Result};
use crate::process_group;
use crate::shell::{self, DEFAULT_SHELL_CANDIDATES};
use crate::truncate::{truncate_middle, OutputCapture, DEFAULT_MAX_OUTPUT_CHARS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

/// Exit code reported when a command is killed for exceeding its timeout.
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code reported when no usable shell could be found.
pub const EXIT_SHELL_UNAVAILABLE: i32 = 127;

/// Timeout applied when neither the caller nor the executor configure one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How long output readers may keep draining once the process is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const TIMEOUT_MARKER: &str = "Command timed out after";

/// Result from command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    /// Process exit code (124 on timeout, 127 when no shell is usable).
    pub exit_code: i32,
    /// Standard output, truncated in the middle if oversized.
    pub stdout: String,
    /// Standard error, truncated in the middle if oversized.
    pub stderr: String,
    /// stdout followed by stderr.
    pub combined: String,
}

impl ExecResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Check if the command was killed by its timeout.
    pub fn timed_out(&self) -> bool {
        self.exit_code == EXIT_TIMEOUT && self.stderr.contains(TIMEOUT_MARKER)
    }

    fn shell_unavailable(command: &str, checked: &[PathBuf]) -> Self {
        let checked = checked
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let stderr = format!(
            "No usable shell found (checked: {checked}); refusing to run: {command}"
        );
        Self {
            exit_code: EXIT_SHELL_UNAVAILABLE,
            stdout: String::new(),
            combined: stderr.clone(),
            stderr,
        }
    }
}

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory (inherits the current one when unset).
    pub cwd: Option<PathBuf>,
    /// Entries layered over the inherited environment. Empty values are dropped.
    pub env: BTreeMap<String, String>,
    /// Wall-clock limit (executor default when unset).
    pub timeout: Option<Duration>,
}

impl ExecOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add a single environment entry.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment entries.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Runs shell commands, one OS process per invocation.
///
/// The shell is discovered lazily on first use and cached for the lifetime
/// of this executor. Executors are independent: two instances never share
/// a cache, so tests and differently-configured callers stay isolated.
///
/// # Thread Safety
///
/// `CommandExecutor` is `Send + Sync`; share it behind an `Arc` and call
/// [`execute`](Self::execute) concurrently.
#[derive(Debug)]
pub struct CommandExecutor {
    candidates: Vec<PathBuf>,
    shell: OnceCell<Option<PathBuf>>,
    max_output_chars: usize,
    default_timeout: Duration,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor {
    /// Create an executor that probes the default shell candidates.
    pub fn new() -> Self {
        Self::with_shell_candidates(DEFAULT_SHELL_CANDIDATES.iter().map(PathBuf::from))
    }

    /// Create an executor that probes the given candidates, in order.
    pub fn with_shell_candidates<I, P>(candidates: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
            shell: OnceCell::new(),
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-stream output cap in characters.
    pub fn max_output_chars(mut self, max: usize) -> Self {
        self.max_output_chars = max;
        self
    }

    /// Set the timeout used when a call does not specify one.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The resolved shell, probing on first call.
    pub async fn shell(&self) -> Option<&Path> {
        self.shell
            .get_or_init(|| shell::probe(&self.candidates))
            .await
            .as_deref()
    }

    /// Execute a shell command.
    ///
    /// # Returns
    ///
    /// The execution result. Non-zero exits, timeouts (exit code 124) and a
    /// missing shell (exit code 127) are all reported as `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] if the OS refuses to create the process.
    pub async fn execute(&self, command: &str, opts: ExecOptions) -> Result<ExecResult> {
        let Some(shell) = self.shell().await else {
            tracing::warn!(command = %command, "Refusing to execute: no usable shell");
            return Ok(ExecResult::shell_unavailable(command, &self.candidates));
        };

        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();
        tracing::debug!(
            command = %command,
            cwd = ?opts.cwd,
            timeout_ms = timeout.as_millis() as u64,
            "Executing command"
        );

        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in opts
            .env
            .iter()
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        {
            cmd.env(key, value);
        }
        process_group::isolate(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| {
            tracing::error!(shell = %shell.display(), error = %source, "Spawn failed");
            ExecError::Spawn {
                shell: shell.to_path_buf(),
                source,
            }
        })?;
        let pid = child.id();

        let stdout_buf = Arc::new(Mutex::new(OutputCapture::new(self.max_output_chars)));
        let stderr_buf = Arc::new(Mutex::new(OutputCapture::new(self.max_output_chars)));
        let stdout_task = spawn_reader(child.stdout.take(), Arc::clone(&stdout_buf));
        let stderr_task = spawn_reader(child.stderr.take(), Arc::clone(&stderr_buf));

        // Exactly one of the two arms resolves the result.
        let status: Option<ExitStatus> = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => return Err(ExecError::Io(e)),
            Err(_) => {
                tracing::warn!(
                    command = %command,
                    timeout_ms = timeout.as_millis() as u64,
                    "Command timed out, killing process group"
                );
                if let Some(pid) = pid {
                    if let Err(e) = process_group::kill_process_group(pid) {
                        tracing::debug!(pid, error = %e, "Failed to kill process group");
                    }
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };

        drain(stdout_task).await;
        drain(stderr_task).await;

        let stdout = take_output(&stdout_buf, self.max_output_chars);
        let mut stderr = take_output(&stderr_buf, self.max_output_chars);

        let exit_code = match status {
            Some(status) => exit_code(status),
            None => {
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("{TIMEOUT_MARKER} {timeout:?}"));
                EXIT_TIMEOUT
            }
        };

        let combined = combine(&stdout, &stderr, self.max_output_chars);

        tracing::debug!(
            exit_code,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command completed"
        );

        Ok(ExecResult {
            exit_code,
            stdout,
            stderr,
            combined,
        })
    }
}

fn spawn_reader<R>(reader: Option<R>, buf: Arc<Mutex<OutputCapture>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut guard) = buf.lock() {
                        guard.push(&chunk[..n]);
                    }
                }
                Err(e) => {
                    tracing::trace!(error = %e, "Output reader stopped");
                    break;
                }
            }
        }
    })
}

/// Wait briefly for a reader; a background grandchild may hold the pipe open.
async fn drain(task: JoinHandle<()>) {
    let abort = task.abort_handle();
    if tokio::time::timeout(DRAIN_GRACE, task).await.is_err() {
        tracing::trace!("Output reader still busy after grace period, keeping partial output");
        abort.abort();
    }
}

fn take_output(buf: &Mutex<OutputCapture>, max_chars: usize) -> String {
    buf.lock()
        .map(|mut g| std::mem::replace(&mut *g, OutputCapture::new(max_chars)).finish())
        .unwrap_or_default()
}

fn combine(stdout: &str, stderr: &str, max_chars: usize) -> String {
    let combined = match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) if stdout.ends_with('\n') => format!("{stdout}{stderr}"),
        (false, false) => format!("{stdout}\n{stderr}"),
    };
    truncate_middle(&combined, max_chars).into_owned()
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
