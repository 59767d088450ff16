//! Shell discovery.
//!
//! Candidates are proven usable by actually running a trivial command, not
//! by checking the executable bit.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Shells tried in order when no explicit candidate list is given.
pub const DEFAULT_SHELL_CANDIDATES: &[&str] = &[
    "/bin/bash",
    "/usr/bin/bash",
    "/usr/local/bin/bash",
    "/bin/sh",
    "/usr/bin/sh",
];

/// Upper bound for a single probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Return the first candidate that can run `exit 0` successfully.
pub(crate) async fn probe(candidates: &[PathBuf]) -> Option<PathBuf> {
    for candidate in candidates {
        if probe_one(candidate).await {
            tracing::debug!(shell = %candidate.display(), "Shell probe succeeded");
            return Some(candidate.clone());
        }
    }
    tracing::warn!(checked = ?candidates, "No usable shell found");
    None
}

async fn probe_one(shell: &Path) -> bool {
    let status = Command::new(shell)
        .args(["-c", "exit 0"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(PROBE_TIMEOUT, status).await {
        Ok(Ok(status)) if status.success() => true,
        Ok(Ok(status)) => {
            tracing::trace!(shell = %shell.display(), ?status, "Shell probe exited non-zero");
            false
        }
        Ok(Err(e)) => {
            tracing::trace!(shell = %shell.display(), error = %e, "Shell probe failed to spawn");
            false
        }
        Err(_) => {
            tracing::trace!(shell = %shell.display(), "Shell probe timed out");
            false
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_skips_missing_candidates() {
        let candidates = vec![
            PathBuf::from("/definitely/not/a/shell"),
            PathBuf::from("/bin/sh"),
        ];
        assert_eq!(probe(&candidates).await, Some(PathBuf::from("/bin/sh")));
    }

    #[tokio::test]
    async fn test_probe_rejects_non_shell_binary() {
        // `false` exists but cannot run `-c "exit 0"` successfully.
        let candidates = vec![PathBuf::from("/bin/false")];
        assert_eq!(probe(&candidates).await, None);
    }
}
