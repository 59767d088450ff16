//! Container provider abstraction.
//!
//! The sandbox manager is agnostic to how isolation is achieved. A
//! [`ContainerProvider`] creates environments and hands back a
//! [`ContainerHandle`] for running commands inside them.

use crate::config::{NetworkMode, ResourceLimits};
use crate::error::Result;
use crate::ports::PortMapping;
use async_trait::async_trait;
use openswe_exec::{ExecOptions, ExecResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// What a provider can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Commands run in an environment separate from the host.
    pub isolated: bool,
    /// Container ports are published on allocated host ports.
    pub publishes_ports: bool,
}

/// A host directory made visible inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Directory on the host.
    pub host_path: PathBuf,
    /// Where it appears inside the sandbox.
    pub container_path: PathBuf,
}

/// Everything a provider needs to create one environment.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Unique container name.
    pub name: String,
    /// Image to start.
    pub image: String,
    /// Optional repository mount.
    pub mount: Option<Mount>,
    /// Default working directory inside the sandbox.
    pub workdir: PathBuf,
    /// Requested resource limits.
    pub resources: ResourceLimits,
    /// Network mode.
    pub network: NetworkMode,
    /// Host ports to bind.
    pub port_mappings: Vec<PortMapping>,
    /// Extra environment for the container.
    pub env: BTreeMap<String, String>,
}

/// Handle to a created environment.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    /// Name the provider knows this environment by.
    fn container_name(&self) -> &str;

    /// Limits actually applied, if the provider enforces any.
    fn applied_resources(&self) -> Option<ResourceLimits>;

    /// Run a shell command inside the environment.
    ///
    /// `opts.cwd` is a path inside the sandbox.
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult>;
}

/// Factory for isolated execution environments.
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Short backend name (e.g. `docker`).
    fn name(&self) -> &'static str;

    /// Capability flags.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Create and start a new environment.
    async fn create(&self, spec: &ContainerSpec) -> Result<Arc<dyn ContainerHandle>>;

    /// Pause an environment, keeping its state.
    async fn stop(&self, container_name: &str) -> Result<()>;

    /// Remove an environment.
    async fn delete(&self, container_name: &str) -> Result<()>;

    /// Query the live port mappings of an environment.
    async fn port_mappings(&self, container_name: &str) -> Result<Vec<PortMapping>>;
}
