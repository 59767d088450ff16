//! # openswe-core
//!
//! Sandbox orchestration layer for OpenSWE.
//!
//! This crate provisions isolated environments for running an agent's shell
//! commands against a repository, publishes their dev-server ports on the
//! host, commits work back to the host checkout, and starts dev servers
//! inside them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    openswe-core (host)                   │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ SandboxManager  │────▶│  HashMap<SandboxId,      │   │
//! │  │   - create()    │     │        Arc<Sandbox>>     │   │
//! │  │   - stop()      │     └──────────────────────────┘   │
//! │  │   - delete()    │────▶ PortAllocator                 │
//! │  └─────────────────┘                                    │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │    Sandbox      │────▶│  ContainerProvider       │   │
//! │  │  - exec()       │     │  (DockerProvider,        │   │
//! │  │                 │     │   LocalProvider)         │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │           │                           │                  │
//! │           ▼                           ▼                  │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │  AutoCommitter  │     │  CommandExecutor         │   │
//! │  │  (host git)     │────▶│  (from openswe-exec)     │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │                                                          │
//! │  DevServerLauncher ──▶ CommandTarget (Sandbox | host)    │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use openswe_core::{DockerProvider, SandboxDefaults, SandboxManager, SandboxOptions};
//! use openswe_exec::{CommandExecutor, ExecOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> openswe_core::Result<()> {
//! let executor = Arc::new(CommandExecutor::new());
//! let provider = Arc::new(DockerProvider::new(Arc::clone(&executor)));
//! let manager = SandboxManager::new(provider, executor, SandboxDefaults::from_env());
//!
//! let options = SandboxOptions::builder()
//!     .workspace_path("/srv/work")
//!     .repo_name("my-app")
//!     .commit_on_change(true)
//!     .build()?;
//! let sandbox = manager.create("node:20-bookworm", options).await?;
//!
//! // Runs in /workspace/my-app; a zero exit auto-commits on the host
//! let result = sandbox.exec("npm install", ExecOptions::new()).await?;
//! println!("exit {}: {}", result.exit_code, result.combined);
//!
//! manager.delete(sandbox.id()).await?;
//! # Ok(())
//! # }
//! ```

mod autocommit;
mod config;
pub mod devserver;
mod error;
mod manager;
mod ports;
mod provider;
pub mod providers;
mod sandbox;
mod target;

pub use autocommit::AutoCommitter;
pub use config::{
    GitIdentity, NetworkMode, ResourceLimits, SandboxDefaults, SandboxOptions,
    SandboxOptionsBuilder, DEFAULT_EXPOSED_PORTS,
};
pub use error::{CoreError, Result};
pub use manager::SandboxManager;
pub use ports::{PortAllocator, PortMapping, DEFAULT_MAX_ATTEMPTS};
pub use provider::{ContainerHandle, ContainerProvider, ContainerSpec, Mount, ProviderCapabilities};
pub use providers::{DockerProvider, LocalProvider};
pub use sandbox::{Sandbox, SandboxId, SandboxMetadata, SandboxState};
pub use target::{CommandTarget, LocalTarget};
