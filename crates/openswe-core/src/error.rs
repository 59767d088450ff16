//! Error types for openswe-core.

use thiserror::Error;

/// Result type alias for openswe-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during sandbox operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from openswe-exec
    #[error("exec error: {0}")]
    Exec(#[from] openswe_exec::ExecError),

    /// The container provider could not create the sandbox
    #[error("sandbox creation failed: {0}")]
    SandboxCreation(String),

    /// The container provider failed a stop/delete/query request
    #[error("provider error: {0}")]
    Provider(String),

    /// Sandbox not found
    #[error("sandbox not found: {0}")]
    NotFound(String),

    /// Invalid sandbox state for operation
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Committing pending changes failed
    #[error("auto-commit failed: {0}")]
    AutoCommit(String),

    /// Invalid configuration or options
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
