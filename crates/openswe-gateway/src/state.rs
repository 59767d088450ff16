//! Shared handler state.

use crate::config::{GatewayConfig, ProviderKind};
use crate::error::{GatewayError, Result};
use openswe_core::devserver::DevServerLauncher;
use openswe_core::{
    CommandTarget, ContainerProvider, DockerProvider, LocalProvider, LocalTarget, Sandbox,
    SandboxDefaults, SandboxId, SandboxManager,
};
use openswe_exec::CommandExecutor;
use std::sync::Arc;

/// Everything the HTTP handlers need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    manager: Arc<SandboxManager>,
    executor: Arc<CommandExecutor>,
    launcher: Arc<DevServerLauncher>,
    config: Arc<GatewayConfig>,
    client: reqwest::Client,
}

impl AppState {
    /// Build the state with the provider selected by `config`.
    pub fn new(config: GatewayConfig) -> Self {
        let executor = Arc::new(CommandExecutor::new());
        let provider: Arc<dyn ContainerProvider> = match config.provider {
            ProviderKind::Docker => Arc::new(DockerProvider::with_binary(
                Arc::clone(&executor),
                config.docker_bin.clone(),
            )),
            ProviderKind::Local => Arc::new(LocalProvider::new(Arc::clone(&executor))),
        };
        tracing::info!(provider = provider.name(), "Using container provider");
        let manager = SandboxManager::new(provider, Arc::clone(&executor), SandboxDefaults::from_env());
        Self::with_manager(config, Arc::new(manager), executor)
    }

    /// Build the state around an existing manager.
    pub fn with_manager(
        config: GatewayConfig,
        manager: Arc<SandboxManager>,
        executor: Arc<CommandExecutor>,
    ) -> Self {
        let launcher = DevServerLauncher::new().with_timeout(config.dev_server_timeout);
        // Redirects are rewritten, not followed.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self {
            manager,
            executor,
            launcher: Arc::new(launcher),
            config: Arc::new(config),
            client,
        }
    }

    /// Get a reference to the sandbox manager.
    pub fn manager(&self) -> &SandboxManager {
        &self.manager
    }

    /// Get a cloned Arc to the sandbox manager.
    ///
    /// Use this when the manager must outlive the router (e.g., for cleanup).
    pub fn manager_arc(&self) -> Arc<SandboxManager> {
        Arc::clone(&self.manager)
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub(crate) fn launcher(&self) -> &DevServerLauncher {
        &self.launcher
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Look up a sandbox by its string ID.
    pub(crate) async fn sandbox(&self, id: &str) -> Option<Arc<Sandbox>> {
        let id: SandboxId = id.trim().parse().ok()?;
        self.manager.get(id).await
    }

    /// Where dev-server commands for `session` run.
    ///
    /// A session ID must name a known sandbox; only a request without one
    /// runs on the host in the workspace directory.
    pub(crate) async fn dev_server_target(
        &self,
        session: Option<&str>,
    ) -> Result<Arc<dyn CommandTarget>> {
        if let Some(session) = session.map(str::trim).filter(|s| !s.is_empty()) {
            return match self.sandbox(session).await {
                Some(sandbox) => Ok(sandbox),
                None => {
                    tracing::debug!(session = %session, "Dev-server request for unknown sandbox");
                    Err(GatewayError::NotFound(session.to_string()))
                }
            };
        }
        Ok(Arc::new(LocalTarget::new(
            Arc::clone(&self.executor),
            self.config.workspace_path.clone(),
        )))
    }
}
