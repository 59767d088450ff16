//! Committing pending changes in a tracked host checkout.

use crate::config::GitIdentity;
use crate::error::{CoreError, Result};
use openswe_exec::{CommandExecutor, ExecOptions, ExecResult};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Stages and commits everything pending in a repository.
///
/// Commits are numbered per repository for the lifetime of this value; the
/// number only advances when a commit is actually produced.
pub struct AutoCommitter {
    executor: Arc<CommandExecutor>,
    identity: GitIdentity,
    skip_ci: bool,
    counters: Mutex<HashMap<PathBuf, u64>>,
}

impl AutoCommitter {
    /// Create a committer that runs git through `executor`.
    pub fn new(executor: Arc<CommandExecutor>, identity: GitIdentity, skip_ci: bool) -> Self {
        Self {
            executor,
            identity,
            skip_ci,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Commit message for the `n`th auto-commit.
    pub fn message(&self, n: u64) -> String {
        if self.skip_ci {
            format!("OpenSWE auto-commit #{n} [skip ci]")
        } else {
            format!("OpenSWE auto-commit #{n}")
        }
    }

    /// Number of auto-commits produced so far in `repo`.
    pub async fn count(&self, repo: &Path) -> u64 {
        let key = canonical(repo).await;
        self.counters.lock().await.get(&key).copied().unwrap_or(0)
    }

    /// Commit pending changes in `repo`.
    ///
    /// Returns the commit number, or `None` when the tree is clean or `repo`
    /// is not a git work tree.
    pub async fn commit_pending(&self, repo: &Path) -> Result<Option<u64>> {
        let key = canonical(repo).await;
        // Held for the whole sequence: one git writer per process.
        let mut counters = self.counters.lock().await;

        let inside = self.git(&key, "git rev-parse --is-inside-work-tree").await?;
        if !inside.success() || inside.stdout.trim() != "true" {
            tracing::debug!(repo = %key.display(), "Not a git work tree, skipping auto-commit");
            return Ok(None);
        }

        let status = self.git(&key, "git status --porcelain").await?;
        check(&status, "git status")?;
        if status.stdout.trim().is_empty() {
            tracing::trace!(repo = %key.display(), "Nothing to commit");
            return Ok(None);
        }

        check(&self.git(&key, "git add -A").await?, "git add")?;

        let n = counters.get(&key).copied().unwrap_or(0) + 1;
        let message = self.message(n);
        let commit = format!(
            "git -c commit.gpgsign=false commit --no-verify -q -m {}",
            shell_escape::unix::escape(Cow::Borrowed(message.as_str()))
        );
        check(&self.git(&key, &commit).await?, "git commit")?;
        counters.insert(key.clone(), n);

        tracing::info!(repo = %key.display(), commit = n, "Auto-committed pending changes");
        Ok(Some(n))
    }

    async fn git(&self, repo: &Path, command: &str) -> Result<ExecResult> {
        let opts = ExecOptions::new()
            .cwd(repo)
            .envs(self.identity.env())
            .timeout(GIT_TIMEOUT);
        Ok(self.executor.execute(command, opts).await?)
    }
}

fn check(result: &ExecResult, step: &str) -> Result<()> {
    if result.success() {
        Ok(())
    } else {
        Err(CoreError::AutoCommit(format!(
            "{step} exited with {}: {}",
            result.exit_code,
            result.combined.trim()
        )))
    }
}

async fn canonical(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn committer() -> AutoCommitter {
        AutoCommitter::new(
            Arc::new(CommandExecutor::new()),
            GitIdentity::default(),
            true,
        )
    }

    async fn last_subject(repo: &Path) -> String {
        CommandExecutor::new()
            .execute("git log -1 --format=%s", ExecOptions::new().cwd(repo))
            .await
            .unwrap()
            .stdout
            .trim()
            .to_string()
    }

    #[test]
    fn test_message_format() {
        assert_eq!(committer().message(3), "OpenSWE auto-commit #3 [skip ci]");
        let plain = AutoCommitter::new(
            Arc::new(CommandExecutor::new()),
            GitIdentity::default(),
            false,
        );
        assert_eq!(plain.message(1), "OpenSWE auto-commit #1");
    }

    #[tokio::test]
    async fn test_commit_numbering_advances_only_on_commit() {
        if !git_available() {
            eprintln!("git not found, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path();
        let executor = CommandExecutor::new();
        executor
            .execute("git init -q", ExecOptions::new().cwd(repo))
            .await
            .unwrap();

        let committer = committer();
        assert_eq!(committer.commit_pending(repo).await.unwrap(), None);

        tokio::fs::write(repo.join("a.txt"), "one").await.unwrap();
        assert_eq!(committer.commit_pending(repo).await.unwrap(), Some(1));
        assert_eq!(last_subject(repo).await, "OpenSWE auto-commit #1 [skip ci]");

        assert_eq!(committer.commit_pending(repo).await.unwrap(), None);
        assert_eq!(committer.count(repo).await, 1);

        tokio::fs::write(repo.join("b.txt"), "two").await.unwrap();
        assert_eq!(committer.commit_pending(repo).await.unwrap(), Some(2));
        assert_eq!(last_subject(repo).await, "OpenSWE auto-commit #2 [skip ci]");
    }

    #[tokio::test]
    async fn test_non_repository_is_skipped() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("file"), "x").await.unwrap();
        assert_eq!(committer().commit_pending(dir.path()).await.unwrap(), None);
    }
}
