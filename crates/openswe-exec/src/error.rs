//! Error types for openswe-exec.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for openswe-exec operations.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Errors that prevent a command from producing an [`ExecResult`](crate::ExecResult).
///
/// Command failures (non-zero exit, timeout, missing shell) are not errors;
/// they are reported through the result's exit code.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The OS refused to create the process even though the shell probe passed.
    #[error("failed to spawn {shell}: {source}")]
    Spawn {
        /// Shell binary that was being spawned
        shell: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Command was rejected before execution.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// I/O error while supervising the process
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
