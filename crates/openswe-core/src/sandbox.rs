//! Sandbox type - a provisioned environment plus the metadata describing it.

use crate::autocommit::AutoCommitter;
use crate::config::ResourceLimits;
use crate::error::{CoreError, Result};
use crate::ports::PortMapping;
use crate::provider::ContainerHandle;
use chrono::{DateTime, Utc};
use openswe_exec::{ExecOptions, ExecResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(Uuid);

impl SandboxId {
    /// Create a new random sandbox ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SandboxId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for SandboxId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| CoreError::NotFound(s.to_string()))
    }
}

/// Current state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    /// The environment accepts commands.
    Running,
    /// The environment was stopped; its registry entry is kept.
    Stopped,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Facts recorded about a sandbox when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxMetadata {
    /// Provider-side name.
    pub container_name: String,
    /// Backend that created the sandbox.
    pub provider: String,
    /// Image the sandbox was started from.
    pub image: String,
    /// Host checkout mounted into the sandbox, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_repo_path: Option<PathBuf>,
    /// Repository location inside the sandbox; the default working directory.
    pub container_repo_path: PathBuf,
    /// Auto-commit after successful commands and at teardown.
    pub commit_on_change: bool,
    /// Default per-command timeout.
    pub command_timeout_sec: u64,
    /// Limits asked for.
    pub requested_resources: ResourceLimits,
    /// Limits the provider actually applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_resources: Option<ResourceLimits>,
    /// Container ports that were candidates for publishing.
    pub exposed_ports: Vec<u16>,
    /// Ports actually published.
    pub port_mappings: Vec<PortMapping>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl SandboxMetadata {
    /// Host port published for `container_port`, if any.
    pub fn host_port_for(&self, container_port: u16) -> Option<u16> {
        self.port_mappings
            .iter()
            .find(|m| m.container_port == container_port)
            .map(|m| m.host_port)
    }
}

/// A provisioned sandbox.
///
/// Owned by the [`SandboxManager`](crate::SandboxManager); callers get an
/// `Arc<Sandbox>` and never construct one directly.
pub struct Sandbox {
    id: SandboxId,
    metadata: SandboxMetadata,
    handle: Arc<dyn ContainerHandle>,
    committer: Arc<AutoCommitter>,
    state: RwLock<SandboxState>,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("container_name", &self.metadata.container_name)
            .field("state", &self.state())
            .finish()
    }
}

impl Sandbox {
    pub(crate) fn new(
        id: SandboxId,
        metadata: SandboxMetadata,
        handle: Arc<dyn ContainerHandle>,
        committer: Arc<AutoCommitter>,
    ) -> Self {
        Self {
            id,
            metadata,
            handle,
            committer,
            state: RwLock::new(SandboxState::Running),
        }
    }

    /// Get the sandbox ID.
    pub fn id(&self) -> SandboxId {
        self.id
    }

    /// Get the creation metadata.
    pub fn metadata(&self) -> &SandboxMetadata {
        &self.metadata
    }

    /// Get the current state.
    pub fn state(&self) -> SandboxState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_state(&self, state: SandboxState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Execute a shell command inside the sandbox.
    ///
    /// The repository path and the sandbox's command timeout are used when
    /// `opts` leaves them unset. With `commit_on_change`, a zero exit is
    /// followed by an auto-commit of the host checkout; a failed auto-commit
    /// is logged and does not affect the returned result.
    pub async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult> {
        let result = self.run(command, opts).await?;
        if result.success() && self.metadata.commit_on_change {
            self.commit_pending().await;
        }
        Ok(result)
    }

    /// Execute without any auto-commit side effect.
    pub(crate) async fn run(&self, command: &str, mut opts: ExecOptions) -> Result<ExecResult> {
        self.ensure_running()?;
        if opts.cwd.is_none() {
            opts.cwd = Some(self.metadata.container_repo_path.clone());
        }
        if opts.timeout.is_none() {
            opts.timeout = Some(Duration::from_secs(self.metadata.command_timeout_sec));
        }

        tracing::debug!(sandbox_id = %self.id, command = %command, "Executing command");
        let result = self.handle.exec(command, opts).await?;
        tracing::debug!(
            sandbox_id = %self.id,
            exit_code = result.exit_code,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "Command completed"
        );
        Ok(result)
    }

    /// Commit pending host-side changes, logging instead of failing.
    ///
    /// Returns the commit number when a commit was produced.
    pub async fn commit_pending(&self) -> Option<u64> {
        let repo = self.metadata.host_repo_path.as_deref()?;
        match self.committer.commit_pending(repo).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(sandbox_id = %self.id, error = %e, "Auto-commit failed");
                None
            }
        }
    }

    /// Ensure the sandbox is in the Running state.
    fn ensure_running(&self) -> Result<()> {
        let state = self.state();
        if state != SandboxState::Running {
            return Err(CoreError::InvalidState {
                expected: SandboxState::Running.to_string(),
                actual: state.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> SandboxMetadata {
        SandboxMetadata {
            container_name: "openswe-app-0a1b2c3d".into(),
            provider: "docker".into(),
            image: "node:20-bookworm".into(),
            host_repo_path: None,
            container_repo_path: PathBuf::from("/workspace/app"),
            commit_on_change: false,
            command_timeout_sec: 300,
            requested_resources: ResourceLimits::default(),
            applied_resources: None,
            exposed_ports: vec![3000, 5173],
            port_mappings: vec![PortMapping {
                container_port: 3000,
                host_port: 3005,
            }],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sandbox_id_display() {
        let id = SandboxId::new();
        let s = format!("{}", id);
        // UUID format: xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn test_sandbox_id_parse() {
        let id = SandboxId::new();
        assert_eq!(id.to_string().parse::<SandboxId>().unwrap(), id);
        assert!("not-a-uuid".parse::<SandboxId>().is_err());
    }

    #[test]
    fn test_sandbox_state_display() {
        assert_eq!(format!("{}", SandboxState::Running), "Running");
        assert_eq!(format!("{}", SandboxState::Stopped), "Stopped");
    }

    #[test]
    fn test_host_port_lookup() {
        let metadata = metadata();
        assert_eq!(metadata.host_port_for(3000), Some(3005));
        assert_eq!(metadata.host_port_for(5173), None);
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let json = serde_json::to_value(metadata()).unwrap();
        assert_eq!(json["containerName"], "openswe-app-0a1b2c3d");
        assert_eq!(json["commandTimeoutSec"], 300);
        assert_eq!(json["portMappings"][0]["hostPort"], 3005);
        assert!(json.get("hostRepoPath").is_none());
    }
}
