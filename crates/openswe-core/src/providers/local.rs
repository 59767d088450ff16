//! Host-local provider: no isolation, commands run directly on the machine.
//!
//! Paths under the mount's container path are translated to the host
//! checkout, so callers can use the same in-sandbox paths for both providers.

use crate::config::ResourceLimits;
use crate::error::{CoreError, Result};
use crate::ports::PortMapping;
use crate::provider::{ContainerHandle, ContainerProvider, ContainerSpec, Mount, ProviderCapabilities};
use async_trait::async_trait;
use openswe_exec::{CommandExecutor, ExecOptions, ExecResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs sandboxes as plain directories on the host.
pub struct LocalProvider {
    executor: Arc<CommandExecutor>,
}

impl LocalProvider {
    /// Create a local provider sharing `executor`.
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ContainerProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            isolated: false,
            publishes_ports: false,
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<Arc<dyn ContainerHandle>> {
        if spec.mount.is_none() {
            return Err(CoreError::SandboxCreation(
                "local sandboxes need a host repository path".into(),
            ));
        }
        let handle = LocalHandle {
            name: spec.name.clone(),
            mount: spec.mount.clone(),
            executor: Arc::clone(&self.executor),
        };
        let workdir = handle.to_host(&spec.workdir);
        tracing::debug!(container = %spec.name, workdir = %workdir.display(), "Preparing local sandbox");
        tokio::fs::create_dir_all(&workdir).await?;
        Ok(Arc::new(handle))
    }

    async fn stop(&self, container_name: &str) -> Result<()> {
        tracing::debug!(container = %container_name, "Local sandbox has nothing to stop");
        Ok(())
    }

    async fn delete(&self, container_name: &str) -> Result<()> {
        tracing::debug!(container = %container_name, "Local sandbox has nothing to delete");
        Ok(())
    }

    async fn port_mappings(&self, _container_name: &str) -> Result<Vec<PortMapping>> {
        Ok(Vec::new())
    }
}

struct LocalHandle {
    name: String,
    mount: Option<Mount>,
    executor: Arc<CommandExecutor>,
}

impl LocalHandle {
    fn to_host(&self, path: &Path) -> PathBuf {
        match &self.mount {
            Some(mount) => match path.strip_prefix(&mount.container_path) {
                Ok(rest) => mount.host_path.join(rest),
                Err(_) => path.to_path_buf(),
            },
            None => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl ContainerHandle for LocalHandle {
    fn container_name(&self) -> &str {
        &self.name
    }

    fn applied_resources(&self) -> Option<ResourceLimits> {
        None
    }

    async fn exec(&self, command: &str, mut opts: ExecOptions) -> Result<ExecResult> {
        opts.cwd = opts.cwd.map(|cwd| self.to_host(&cwd));
        Ok(self.executor.execute(command, opts).await?)
    }
}
