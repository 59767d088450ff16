//! Request and response bodies for the HTTP API.
//!
//! All bodies use camelCase field names.

use openswe_core::devserver::{LaunchOutcome, LaunchState, ProjectType};
use openswe_core::{SandboxMetadata, SandboxState};
use openswe_exec::CommandSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ============================================================================
// Sandbox Lifecycle
// ============================================================================

/// Parameters for creating a new sandbox.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateSandboxRequest {
    /// Image (default: `OPENSWE_IMAGE`).
    pub image: Option<String>,
    /// Host checkout to mount.
    pub host_repo_path: Option<PathBuf>,
    /// Workspace root; joined with `repo_name` when `host_repo_path` is unset.
    pub workspace_path: Option<PathBuf>,
    /// Repository directory name.
    pub repo_name: Option<String>,
    /// Mount point inside the sandbox.
    pub container_repo_path: Option<PathBuf>,
    /// Auto-commit after successful commands.
    pub commit_on_change: Option<bool>,
    /// Default per-command timeout.
    pub command_timeout_sec: Option<u64>,
}

/// Result of creating a sandbox.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSandboxResponse {
    /// Unique identifier for the sandbox.
    pub sandbox_id: String,
    /// Recorded facts about the sandbox.
    pub metadata: SandboxMetadata,
}

/// Information about a sandbox.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInfo {
    /// Unique identifier for the sandbox.
    pub sandbox_id: String,
    /// Current state.
    pub state: SandboxState,
    /// Recorded facts about the sandbox.
    pub metadata: SandboxMetadata,
}

/// Result of listing sandboxes.
#[derive(Debug, Serialize)]
pub struct ListSandboxesResponse {
    /// Registered sandboxes, oldest first.
    pub sandboxes: Vec<SandboxInfo>,
}

/// Result of stop and delete.
#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    /// Whether the sandbox existed.
    pub success: bool,
}

// ============================================================================
// Command Execution
// ============================================================================

/// Command to run in a sandbox.
///
/// ```json
/// {"kind": "shell", "command": "npm test", "cwd": "/workspace/app", "timeoutSec": 120}
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    /// What to run.
    #[serde(flatten)]
    pub command: CommandSpec,
    /// Working directory (default: the repository path).
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Timeout override.
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

// ============================================================================
// Dev Server
// ============================================================================

/// Parameters for starting a dev server.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevServerStartRequest {
    /// Sandbox to start in; the host when unset.
    pub sandbox_session_id: Option<String>,
    /// Explicit start command.
    pub command: Option<String>,
    /// Port override.
    pub port: Option<u16>,
    /// Working directory.
    pub workdir: Option<PathBuf>,
}

/// Result of starting a dev server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServerStartResponse {
    /// `true` when the server was launched, even if not yet confirmed ready.
    pub success: bool,
    /// Terminal launch state.
    pub state: LaunchState,
    /// Best-known port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Detached process id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Detected framework.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_type: Option<ProjectType>,
    /// Human-readable summary.
    pub message: String,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last lines of the server log.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub log_tail: String,
}

impl From<LaunchOutcome> for DevServerStartResponse {
    fn from(outcome: LaunchOutcome) -> Self {
        Self {
            success: outcome.success(),
            state: outcome.state,
            port: outcome.port,
            pid: outcome.pid,
            project_type: outcome.config.map(|c| c.project_type),
            message: outcome.message,
            error: outcome.error,
            log_tail: outcome.log_tail,
        }
    }
}

/// Selects a dev server for stop and status.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevServerSelector {
    /// Sandbox the server runs in; the host when unset.
    pub sandbox_session_id: Option<String>,
    /// Working directory the server was started from.
    pub workdir: Option<PathBuf>,
}

/// Result of stopping a dev server.
#[derive(Debug, Serialize)]
pub struct DevServerStopResponse {
    /// Whether the call completed.
    pub success: bool,
    /// Whether a running server was signalled.
    pub stopped: bool,
    /// Human-readable summary.
    pub message: String,
}
