//! Sandbox manager for lifecycle management of multiple sandboxes.

use crate::autocommit::AutoCommitter;
use crate::config::{NetworkMode, SandboxDefaults, SandboxOptions};
use crate::error::{CoreError, Result};
use crate::ports::PortAllocator;
use crate::provider::{ContainerProvider, ContainerSpec, Mount};
use crate::sandbox::{Sandbox, SandboxId, SandboxMetadata, SandboxState};
use chrono::Utc;
use openswe_exec::{CommandExecutor, ExecOptions};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Longest container name docker and DNS labels both accept.
const MAX_CONTAINER_NAME_LEN: usize = 63;
const CONTAINER_NAME_PREFIX: &str = "openswe";
const GIT_SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Manages multiple sandbox instances.
///
/// The SandboxManager provisions sandboxes through a [`ContainerProvider`],
/// keeps the registry of live sandboxes and tears them down again.
///
/// # Thread Safety
///
/// SandboxManager uses an async RwLock for the registry and is safe to share
/// across tasks. Lookups run concurrently; stop and delete are serialized so
/// that two teardowns of the same sandbox never race.
pub struct SandboxManager {
    sandboxes: Arc<RwLock<HashMap<SandboxId, Arc<Sandbox>>>>,
    provider: Arc<dyn ContainerProvider>,
    defaults: SandboxDefaults,
    allocator: PortAllocator,
    committer: Arc<AutoCommitter>,
    lifecycle: Mutex<()>,
}

impl SandboxManager {
    /// Create a new sandbox manager.
    ///
    /// `executor` runs host-side git for auto-commits.
    pub fn new(
        provider: Arc<dyn ContainerProvider>,
        executor: Arc<CommandExecutor>,
        defaults: SandboxDefaults,
    ) -> Self {
        tracing::info!(provider = provider.name(), "Creating sandbox manager");
        let committer = Arc::new(AutoCommitter::new(
            executor,
            defaults.git.clone(),
            defaults.skip_ci,
        ));
        Self {
            sandboxes: Arc::new(RwLock::new(HashMap::new())),
            provider,
            defaults,
            allocator: PortAllocator::new(),
            committer,
            lifecycle: Mutex::new(()),
        }
    }

    /// Replace the port allocator.
    pub fn with_port_allocator(mut self, allocator: PortAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// Get the process-wide defaults.
    pub fn defaults(&self) -> &SandboxDefaults {
        &self.defaults
    }

    /// Get the container provider.
    pub fn provider(&self) -> &Arc<dyn ContainerProvider> {
        &self.provider
    }

    /// Get the auto-committer shared by all sandboxes.
    pub fn committer(&self) -> &Arc<AutoCommitter> {
        &self.committer
    }

    /// Create a new sandbox from `image`.
    ///
    /// Host ports are allocated for the default exposed ports before the
    /// provider is asked to create the environment. Ports that cannot be
    /// placed are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for invalid options and
    /// [`CoreError::SandboxCreation`] when the provider fails.
    pub async fn create(&self, image: &str, options: SandboxOptions) -> Result<Arc<Sandbox>> {
        options.validate()?;
        if image.trim().is_empty() {
            return Err(CoreError::InvalidConfig("image must not be empty".into()));
        }

        let id = SandboxId::new();
        let start = Instant::now();
        let container_name = container_name(options.repo_name.as_deref(), id);
        let host_repo_path = options.resolved_host_repo_path();
        let container_repo_path = options.resolved_container_repo_path();
        let resources = options
            .resources
            .clone()
            .unwrap_or_else(|| self.defaults.resources.clone());
        let command_timeout = options
            .command_timeout
            .unwrap_or(self.defaults.command_timeout);
        let capabilities = self.provider.capabilities();

        tracing::info!(
            sandbox_id = %id,
            container = %container_name,
            image = %image,
            provider = self.provider.name(),
            "Creating sandbox"
        );

        if let Some(path) = &host_repo_path {
            tokio::fs::create_dir_all(path).await.map_err(|e| {
                tracing::error!(sandbox_id = %id, path = %path.display(), error = %e, "Failed to prepare host checkout");
                CoreError::SandboxCreation(format!(
                    "cannot create host path {}: {e}",
                    path.display()
                ))
            })?;
        }

        let exposed_ports = self.defaults.exposed_ports.clone();
        let port_mappings =
            if capabilities.publishes_ports && self.defaults.network == NetworkMode::Bridge {
                let mappings = self.allocator.allocate_mappings(&exposed_ports).await;
                if mappings.len() < exposed_ports.len() {
                    tracing::warn!(
                        sandbox_id = %id,
                        requested = exposed_ports.len(),
                        allocated = mappings.len(),
                        "Port allocation shortfall"
                    );
                }
                mappings
            } else {
                Vec::new()
            };

        let spec = ContainerSpec {
            name: container_name.clone(),
            image: image.to_string(),
            mount: host_repo_path.clone().map(|host_path| Mount {
                host_path,
                container_path: container_repo_path.clone(),
            }),
            workdir: container_repo_path.clone(),
            resources: resources.clone(),
            network: self.defaults.network,
            port_mappings: port_mappings.clone(),
            env: Default::default(),
        };

        let handle = self.provider.create(&spec).await.map_err(|e| {
            tracing::error!(sandbox_id = %id, error = %e, "Provider failed to create sandbox");
            match e {
                creation @ CoreError::SandboxCreation(_) => creation,
                other => CoreError::SandboxCreation(other.to_string()),
            }
        })?;

        let metadata = SandboxMetadata {
            container_name,
            provider: self.provider.name().to_string(),
            image: image.to_string(),
            host_repo_path,
            container_repo_path,
            commit_on_change: options.commit_on_change,
            command_timeout_sec: command_timeout.as_secs().max(1),
            requested_resources: resources,
            applied_resources: handle.applied_resources(),
            exposed_ports,
            port_mappings,
            created_at: Utc::now(),
        };
        let sandbox = Arc::new(Sandbox::new(
            id,
            metadata,
            handle,
            Arc::clone(&self.committer),
        ));

        if capabilities.isolated {
            self.configure_git(&sandbox).await;
        }

        self.sandboxes.write().await.insert(id, Arc::clone(&sandbox));
        tracing::info!(
            sandbox_id = %id,
            ports = sandbox.metadata().port_mappings.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox registered"
        );
        Ok(sandbox)
    }

    /// Set the git identity and trust the mounted repository inside the sandbox.
    async fn configure_git(&self, sandbox: &Sandbox) {
        let git = &self.defaults.git;
        let repo = sandbox.metadata().container_repo_path.display().to_string();
        let command = format!(
            "git config --global user.name {} && git config --global user.email {} && git config --global --add safe.directory {}",
            shell_escape::unix::escape(Cow::Borrowed(git.author_name.as_str())),
            shell_escape::unix::escape(Cow::Borrowed(git.author_email.as_str())),
            shell_escape::unix::escape(Cow::Borrowed(repo.as_str())),
        );
        let opts = ExecOptions::new().cwd("/").timeout(GIT_SETUP_TIMEOUT);
        match sandbox.run(&command, opts).await {
            Ok(result) if result.success() => {
                tracing::debug!(sandbox_id = %sandbox.id(), "Configured git inside sandbox");
            }
            Ok(result) => {
                tracing::warn!(
                    sandbox_id = %sandbox.id(),
                    exit_code = result.exit_code,
                    stderr = %result.stderr.trim(),
                    "Git configuration inside sandbox failed"
                );
            }
            Err(e) => {
                tracing::warn!(sandbox_id = %sandbox.id(), error = %e, "Git configuration inside sandbox failed");
            }
        }
    }

    /// Get a sandbox by ID.
    pub async fn get(&self, id: SandboxId) -> Option<Arc<Sandbox>> {
        self.sandboxes.read().await.get(&id).cloned()
    }

    /// Get a sandbox's metadata by ID.
    pub async fn metadata(&self, id: SandboxId) -> Option<SandboxMetadata> {
        self.sandboxes
            .read()
            .await
            .get(&id)
            .map(|s| s.metadata().clone())
    }

    /// Host port recorded for `container_port` of sandbox `id`.
    pub async fn host_port_for_container(&self, id: SandboxId, container_port: u16) -> Option<u16> {
        self.sandboxes
            .read()
            .await
            .get(&id)
            .and_then(|s| s.metadata().host_port_for(container_port))
    }

    /// Resolve the host port to reach `container_port`.
    ///
    /// `session` is a sandbox ID or container name. Resolution tries the
    /// recorded metadata, then a live provider query, then falls back to
    /// `container_port` itself (the host-local case).
    pub async fn resolve_host_port(&self, session: Option<&str>, container_port: u16) -> u16 {
        let Some(session) = session.map(str::trim).filter(|s| !s.is_empty()) else {
            return container_port;
        };

        let sandbox = match session.parse::<SandboxId>() {
            Ok(id) => self.get(id).await,
            Err(_) => None,
        };
        if let Some(port) = sandbox
            .as_ref()
            .and_then(|s| s.metadata().host_port_for(container_port))
        {
            return port;
        }

        let container = sandbox
            .as_ref()
            .map(|s| s.metadata().container_name.clone())
            .unwrap_or_else(|| session.to_string());
        match self.provider.port_mappings(&container).await {
            Ok(mappings) => {
                if let Some(mapping) = mappings.iter().find(|m| m.container_port == container_port) {
                    tracing::debug!(
                        container = %container,
                        container_port,
                        host_port = mapping.host_port,
                        "Resolved host port from provider"
                    );
                    return mapping.host_port;
                }
            }
            Err(e) => {
                tracing::debug!(container = %container, error = %e, "Live port lookup failed");
            }
        }

        tracing::debug!(session = %session, container_port, "No port mapping found, using container port");
        container_port
    }

    /// Stop a sandbox, keeping its registry entry.
    ///
    /// Pending changes are auto-committed first when enabled.
    /// Returns `false` if the sandbox is unknown.
    pub async fn stop(&self, id: SandboxId) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;
        let Some(sandbox) = self.get(id).await else {
            return Ok(false);
        };
        if sandbox.state() == SandboxState::Stopped {
            return Ok(true);
        }

        tracing::info!(sandbox_id = %id, "Stopping sandbox");
        if sandbox.metadata().commit_on_change {
            sandbox.commit_pending().await;
        }
        self.provider.stop(&sandbox.metadata().container_name).await?;
        sandbox.set_state(SandboxState::Stopped);
        tracing::info!(sandbox_id = %id, "Sandbox stopped");
        Ok(true)
    }

    /// Delete a sandbox.
    ///
    /// Pending changes are auto-committed first when enabled. The registry
    /// entry is removed only after the provider confirms removal, so a failed
    /// delete can be retried. Returns `false` if the sandbox is unknown.
    pub async fn delete(&self, id: SandboxId) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;
        let Some(sandbox) = self.get(id).await else {
            return Ok(false);
        };

        let start = Instant::now();
        tracing::info!(sandbox_id = %id, "Deleting sandbox");
        if sandbox.metadata().commit_on_change {
            sandbox.commit_pending().await;
        }

        if let Err(e) = self.provider.delete(&sandbox.metadata().container_name).await {
            tracing::error!(sandbox_id = %id, error = %e, "Provider failed to delete sandbox");
            return Err(e);
        }
        sandbox.set_state(SandboxState::Stopped);
        self.sandboxes.write().await.remove(&id);

        tracing::info!(
            sandbox_id = %id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox deleted"
        );
        Ok(true)
    }

    /// Delete all sandboxes.
    ///
    /// This is useful for cleanup during shutdown. Errors during individual
    /// sandbox deletion are logged but do not stop the process.
    pub async fn destroy_all(&self) -> Result<()> {
        let ids: Vec<SandboxId> = self.sandboxes.read().await.keys().copied().collect();
        tracing::info!(count = ids.len(), "Destroying all sandboxes");

        for id in ids {
            if let Err(e) = self.delete(id).await {
                tracing::error!(sandbox_id = %id, error = %e, "Failed to destroy sandbox");
            }
        }
        Ok(())
    }

    /// List all sandboxes, oldest first.
    pub async fn list(&self) -> Vec<Arc<Sandbox>> {
        let mut sandboxes: Vec<Arc<Sandbox>> =
            self.sandboxes.read().await.values().cloned().collect();
        sandboxes.sort_by_key(|s| s.metadata().created_at);
        sandboxes
    }

    /// Get the number of registered sandboxes.
    pub async fn count(&self) -> usize {
        self.sandboxes.read().await.len()
    }
}

/// `openswe-<repo>-<8 hex>`, restricted to `[a-z0-9_.-]` and 63 characters.
fn container_name(repo_name: Option<&str>, id: SandboxId) -> String {
    let suffix: String = id.as_uuid().simple().to_string().chars().take(8).collect();
    let budget = MAX_CONTAINER_NAME_LEN - CONTAINER_NAME_PREFIX.len() - suffix.len() - 2;

    let mut repo = String::new();
    let mut pending_dash = false;
    for c in repo_name.unwrap_or("sandbox").chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            if pending_dash && !repo.is_empty() {
                repo.push('-');
            }
            pending_dash = false;
            repo.push(c);
        } else {
            pending_dash = true;
        }
    }
    let repo: String = repo.chars().take(budget).collect();
    let repo = repo.trim_matches(|c| c == '-' || c == '.');
    let repo = if repo.is_empty() { "sandbox" } else { repo };

    format!("{CONTAINER_NAME_PREFIX}-{repo}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_sanitized() {
        let id = SandboxId::new();
        let name = container_name(Some("My Cool/App!!"), id);
        assert!(name.starts_with("openswe-my-cool-app-"));
        assert_eq!(name.len(), "openswe-my-cool-app-".len() + 8);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_.-".contains(c)));
    }

    #[test]
    fn test_container_name_length_capped() {
        let long = "x".repeat(200);
        let name = container_name(Some(&long), SandboxId::new());
        assert_eq!(name.len(), MAX_CONTAINER_NAME_LEN);
    }

    #[test]
    fn test_container_name_fallback() {
        let name = container_name(Some("///"), SandboxId::new());
        assert!(name.starts_with("openswe-sandbox-"));
        let name = container_name(None, SandboxId::new());
        assert!(name.starts_with("openswe-sandbox-"));
    }

    #[test]
    fn test_container_names_are_unique() {
        let a = container_name(Some("app"), SandboxId::new());
        let b = container_name(Some("app"), SandboxId::new());
        assert_ne!(a, b);
    }
}
