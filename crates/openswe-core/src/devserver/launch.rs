//! Starting, watching and stopping a detached dev server.
//!
//! The server runs detached with its output in a log file and its process
//! id in a pid file, so later calls can check on it or stop it without
//! holding any process handle. One dev server runs per working directory;
//! starting a new one first stops whatever the pid file names.

use super::detect::{detect_dev_server, DevServerConfig, ProjectType};
use super::readiness::{detect_port, Readiness, ReadinessPolicy};
use super::wait::poll_until;
use crate::error::Result;
use crate::target::CommandTarget;
use openswe_exec::ExecOptions;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default budget for a server to report readiness.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);
/// Default delay between log polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Log lines returned for diagnostics.
pub const LOG_TAIL_LINES: usize = 50;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);
/// Bytes of log read per poll.
const LOG_READ_BYTES: usize = 256 * 1024;

/// Log and pid file locations for one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevServerPaths {
    /// Combined stdout/stderr of the server.
    pub log: PathBuf,
    /// Process id of the detached server.
    pub pid: PathBuf,
}

impl DevServerPaths {
    /// `/tmp/openswe-dev-server-<slug>.{log,pid}` for `workdir`.
    pub fn for_workdir(workdir: &Path) -> Self {
        let slug: String = workdir
            .to_string_lossy()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let slug = slug.trim_matches('_');
        let slug = if slug.is_empty() { "root" } else { slug };
        Self {
            log: PathBuf::from(format!("/tmp/openswe-dev-server-{slug}.log")),
            pid: PathBuf::from(format!("/tmp/openswe-dev-server-{slug}.pid")),
        }
    }
}

/// State of one launch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchState {
    /// Nothing was launched (no web project found).
    NotStarted,
    /// Launched, readiness not yet decided.
    Starting,
    /// The server reported readiness.
    Ready,
    /// The deadline passed without a verdict; the server keeps running.
    NotReadyTimeout,
    /// The launch command failed, the log showed an error, or the process exited.
    StartFailed,
}

/// What to launch and where.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    /// Explicit start command; detection runs when unset.
    pub command: Option<String>,
    /// Port override.
    pub port: Option<u16>,
    /// Working directory; the target's default when unset.
    pub workdir: Option<PathBuf>,
}

/// Result of a launch attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOutcome {
    /// Terminal state reached.
    pub state: LaunchState,
    /// Best-known port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Process id of the detached server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Configuration that was launched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<DevServerConfig>,
    /// Human-readable summary.
    pub message: String,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last lines of the server log.
    pub log_tail: String,
}

impl LaunchOutcome {
    /// `true` once the launch command ran, even if readiness is unconfirmed.
    pub fn success(&self) -> bool {
        matches!(self.state, LaunchState::Ready | LaunchState::NotReadyTimeout)
    }

    fn not_started(message: impl Into<String>) -> Self {
        Self {
            state: LaunchState::NotStarted,
            port: None,
            pid: None,
            config: None,
            message: message.into(),
            error: None,
            log_tail: String::new(),
        }
    }
}

/// Snapshot of a dev server's process and log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServerStatus {
    /// Whether the recorded process is alive.
    pub running: bool,
    /// Recorded process id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Last lines of the log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_log: Option<String>,
}

/// Rewrite `config.command` so the server binds `config.port` on all interfaces.
pub fn bind_port(config: &DevServerConfig) -> String {
    let port = config.port;
    let project_type = config.project_type;

    if let Some(default) = project_type.marker_command(project_type.default_port()) {
        if config.command == default {
            if let Some(bound) = project_type.marker_command(port) {
                return bound;
            }
        }
        return format!("PORT={port} {}", config.command);
    }

    let env = format!("PORT={port} HOST=0.0.0.0");
    if project_type.takes_port_flags() {
        // `npm run` needs `--` to pass flags through to the script
        let separator = if config.command.starts_with("npm run ") {
            " -- "
        } else {
            " "
        };
        let host = if project_type == ProjectType::Astro {
            "--host"
        } else {
            "--host 0.0.0.0"
        };
        format!("{env} {}{separator}--port {port} {host}", config.command)
    } else {
        format!("{env} {}", config.command)
    }
}

/// Starts dev servers and waits for them to come up.
#[derive(Debug, Clone)]
pub struct DevServerLauncher {
    policy: ReadinessPolicy,
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for DevServerLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl DevServerLauncher {
    /// Create a launcher with the default policy and timings.
    pub fn new() -> Self {
        Self {
            policy: ReadinessPolicy::default(),
            timeout: DEFAULT_START_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the readiness budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the delay between log polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Replace the readiness policy.
    pub fn with_policy(mut self, policy: ReadinessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Detect (unless a command is given), launch and wait for readiness.
    ///
    /// A server that has not reported readiness by the deadline is left
    /// running and reported as [`LaunchState::NotReadyTimeout`].
    pub async fn start(&self, target: &dyn CommandTarget, request: LaunchRequest) -> Result<LaunchOutcome> {
        let workdir = request
            .workdir
            .clone()
            .unwrap_or_else(|| target.default_workdir().to_path_buf());

        let mut config = match request.command.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => {
                let port = match request.port {
                    Some(port) => port,
                    None => detect_dev_server(target, &workdir)
                        .await?
                        .map(|c| c.port)
                        .unwrap_or(ProjectType::Custom.default_port()),
                };
                DevServerConfig::custom(command, port)
            }
            _ => match detect_dev_server(target, &workdir).await? {
                Some(config) => config,
                None => {
                    return Ok(LaunchOutcome::not_started(format!(
                        "No web project detected in {}",
                        workdir.display()
                    )))
                }
            },
        };
        if let Some(port) = request.port {
            config.port = port;
        }

        let paths = DevServerPaths::for_workdir(&workdir);
        if self.stop_at(target, &workdir, &paths).await? {
            tracing::info!(workdir = %workdir.display(), "Stopped previous dev server");
        }

        let command = bind_port(&config);
        tracing::info!(
            workdir = %workdir.display(),
            project_type = ?config.project_type,
            port = config.port,
            command = %command,
            "Starting dev server"
        );

        let launched = target
            .run(&launch_script(&command, &paths), control_opts(&workdir))
            .await?;
        let pid = launched.stdout.trim().parse::<u32>().ok();
        let Some(pid) = pid.filter(|_| launched.success()) else {
            tracing::warn!(
                exit_code = launched.exit_code,
                stderr = %launched.stderr.trim(),
                "Dev server launch command failed"
            );
            return Ok(LaunchOutcome {
                state: LaunchState::StartFailed,
                port: Some(config.port),
                pid: None,
                message: "Failed to launch dev server".into(),
                error: Some(launched.combined.trim().to_string()),
                log_tail: String::new(),
                config: Some(config),
            });
        };
        tracing::debug!(pid, log = %paths.log.display(), "Dev server launched, polling log");

        let requested_port = config.port;
        let (policy, dir, files) = (&self.policy, workdir.as_path(), &paths);
        let verdict = poll_until(self.poll_interval, self.timeout, move || async move {
            let log = read_log(target, dir, files).await;
            match policy.evaluate(&log, requested_port) {
                Readiness::Pending => {
                    if is_alive(target, dir, pid).await {
                        None
                    } else {
                        let exited = Readiness::Failed {
                            reason: "dev server process exited".into(),
                        };
                        Some((exited, log))
                    }
                }
                decided => Some((decided, log)),
            }
        })
        .await;

        let outcome = match verdict {
            Some((Readiness::Ready { port }, log)) => {
                tracing::info!(pid, port, "Dev server ready");
                LaunchOutcome {
                    state: LaunchState::Ready,
                    port: Some(port),
                    pid: Some(pid),
                    message: format!("Dev server ready on port {port}"),
                    error: None,
                    log_tail: tail_lines(&log, LOG_TAIL_LINES),
                    config: Some(config),
                }
            }
            Some((Readiness::Failed { reason }, log)) => {
                tracing::warn!(pid, reason = %reason, "Dev server failed to start");
                LaunchOutcome {
                    state: LaunchState::StartFailed,
                    port: Some(requested_port),
                    pid: Some(pid),
                    message: "Dev server failed to start".into(),
                    error: Some(reason),
                    log_tail: tail_lines(&log, LOG_TAIL_LINES),
                    config: Some(config),
                }
            }
            Some((Readiness::Pending, _)) | None => {
                let log = read_log(target, &workdir, &paths).await;
                let port = detect_port(&log).unwrap_or(requested_port);
                tracing::warn!(
                    pid,
                    port,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Dev server not ready before deadline, leaving it running"
                );
                LaunchOutcome {
                    state: LaunchState::NotReadyTimeout,
                    port: Some(port),
                    pid: Some(pid),
                    message: format!("Dev server started on port {port} but may not be ready yet"),
                    error: None,
                    log_tail: tail_lines(&log, LOG_TAIL_LINES),
                    config: Some(config),
                }
            }
        };
        Ok(outcome)
    }

    /// Stop the dev server of `workdir` (the target's default when `None`).
    ///
    /// Returns `true` if a recorded server was signalled.
    pub async fn stop(&self, target: &dyn CommandTarget, workdir: Option<&Path>) -> Result<bool> {
        let workdir = workdir.unwrap_or_else(|| target.default_workdir()).to_path_buf();
        let paths = DevServerPaths::for_workdir(&workdir);
        let stopped = self.stop_at(target, &workdir, &paths).await?;
        if stopped {
            tracing::info!(workdir = %workdir.display(), "Dev server stopped");
        }
        Ok(stopped)
    }

    async fn stop_at(&self, target: &dyn CommandTarget, workdir: &Path, paths: &DevServerPaths) -> Result<bool> {
        let pid_file = quote(&paths.pid);
        let script = format!(
            "PID=$(cat {pid_file} 2>/dev/null); \
             if [ -n \"$PID\" ]; then \
             kill -KILL -- -\"$PID\" 2>/dev/null || kill -KILL \"$PID\" 2>/dev/null; \
             rm -f {pid_file}; echo stopped; fi"
        );
        let result = target.run(&script, control_opts(workdir)).await?;
        Ok(result.stdout.trim() == "stopped")
    }

    /// Report whether the dev server of `workdir` is running, with its recent log.
    pub async fn status(&self, target: &dyn CommandTarget, workdir: Option<&Path>) -> Result<DevServerStatus> {
        let workdir = workdir.unwrap_or_else(|| target.default_workdir()).to_path_buf();
        let paths = DevServerPaths::for_workdir(&workdir);

        let pid_result = target
            .run(&format!("cat {}", quote(&paths.pid)), control_opts(&workdir))
            .await?;
        let pid = pid_result
            .success()
            .then(|| pid_result.stdout.trim().parse::<u32>().ok())
            .flatten();
        let running = match pid {
            Some(pid) => is_alive(target, &workdir, pid).await,
            None => false,
        };

        let log_result = target
            .run(
                &format!("tail -n {LOG_TAIL_LINES} {}", quote(&paths.log)),
                control_opts(&workdir),
            )
            .await?;
        let recent_log = log_result.success().then_some(log_result.stdout);

        Ok(DevServerStatus {
            running,
            pid,
            recent_log,
        })
    }
}

/// Start `command` detached in its own session; prints the pid.
fn launch_script(command: &str, paths: &DevServerPaths) -> String {
    let log = quote(&paths.log);
    let pid = quote(&paths.pid);
    let command = shell_escape::unix::escape(Cow::Borrowed(command));
    format!(
        ": > {log}; \
         if command -v setsid >/dev/null 2>&1; then \
         setsid nohup sh -c {command} > {log} 2>&1 < /dev/null & \
         else nohup sh -c {command} > {log} 2>&1 < /dev/null & fi; \
         echo $! > {pid}; cat {pid}"
    )
}

async fn read_log(target: &dyn CommandTarget, workdir: &Path, paths: &DevServerPaths) -> String {
    let command = format!("tail -c {LOG_READ_BYTES} {} 2>/dev/null", quote(&paths.log));
    match target.run(&command, control_opts(workdir)).await {
        Ok(result) => result.stdout,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read dev server log");
            String::new()
        }
    }
}

/// `kill -0`, treating an unreaped zombie as dead where `/proc` is available.
async fn is_alive(target: &dyn CommandTarget, workdir: &Path, pid: u32) -> bool {
    let check = format!(
        "kill -0 {pid} 2>/dev/null && [ \"$(cut -d' ' -f3 /proc/{pid}/stat 2>/dev/null)\" != Z ]"
    );
    match target.run(&check, control_opts(workdir)).await {
        Ok(result) => result.success(),
        Err(_) => false,
    }
}

fn control_opts(workdir: &Path) -> ExecOptions {
    ExecOptions::new().cwd(workdir).timeout(CONTROL_TIMEOUT)
}

fn quote(path: &Path) -> String {
    shell_escape::unix::escape(path.to_string_lossy()).into_owned()
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
