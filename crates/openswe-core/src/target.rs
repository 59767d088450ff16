//! Where dev-server commands run: inside a sandbox or directly on the host.

use crate::error::Result;
use crate::sandbox::Sandbox;
use async_trait::async_trait;
use openswe_exec::{CommandExecutor, ExecOptions, ExecResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Something that can run shell commands in a working directory.
#[async_trait]
pub trait CommandTarget: Send + Sync {
    /// Directory used when the caller does not name one.
    fn default_workdir(&self) -> &Path;

    /// Run `command` and return its result.
    async fn run(&self, command: &str, opts: ExecOptions) -> Result<ExecResult>;
}

/// Runs commands on the host through a [`CommandExecutor`].
pub struct LocalTarget {
    executor: Arc<CommandExecutor>,
    workdir: PathBuf,
}

impl LocalTarget {
    /// Create a host target rooted at `workdir`.
    pub fn new(executor: Arc<CommandExecutor>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl CommandTarget for LocalTarget {
    fn default_workdir(&self) -> &Path {
        &self.workdir
    }

    async fn run(&self, command: &str, mut opts: ExecOptions) -> Result<ExecResult> {
        if opts.cwd.is_none() {
            opts.cwd = Some(self.workdir.clone());
        }
        Ok(self.executor.execute(command, opts).await?)
    }
}

#[async_trait]
impl CommandTarget for Sandbox {
    fn default_workdir(&self) -> &Path {
        &self.metadata().container_repo_path
    }

    async fn run(&self, command: &str, opts: ExecOptions) -> Result<ExecResult> {
        Sandbox::run(self, command, opts).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_target_defaults_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let target = LocalTarget::new(Arc::new(CommandExecutor::new()), dir.path());
        let result = target.run("pwd", ExecOptions::new()).await.unwrap();
        assert_eq!(
            Path::new(result.stdout.trim()).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert_eq!(target.default_workdir(), dir.path());
    }
}
