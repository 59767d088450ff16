//! # openswe-exec
//!
//! Shell command execution for OpenSWE sandboxes.
//!
//! Every invocation spawns exactly one shell process, supervised with a
//! wall-clock timeout and independently size-capped stdout/stderr capture.
//! A non-zero exit code is a normal [`ExecResult`], never an error.
//!
//! ## Quick Start
//!
//! ```no_run
//! use openswe_exec::{CommandExecutor, ExecOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> openswe_exec::Result<()> {
//! let executor = CommandExecutor::new();
//!
//! let result = executor
//!     .execute(
//!         "npm test",
//!         ExecOptions::new()
//!             .cwd("/workspace/app")
//!             .env("CI", "1")
//!             .timeout(Duration::from_secs(120)),
//!     )
//!     .await?;
//!
//! if result.timed_out() {
//!     eprintln!("tests hung: {}", result.stderr);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | any  | process exited normally with that code |
//! | 124  | killed after exceeding its timeout ([`EXIT_TIMEOUT`]) |
//! | 127  | no usable shell was found ([`EXIT_SHELL_UNAVAILABLE`]) |

mod command;
mod error;
mod executor;
mod process_group;
mod shell;
mod truncate;

pub use command::{CommandSpec, ScriptLanguage, MAX_COMMAND_LENGTH};
pub use error::{ExecError, Result};
pub use executor::{
    CommandExecutor, ExecOptions, ExecResult, EXIT_SHELL_UNAVAILABLE, EXIT_TIMEOUT,
};
pub use shell::DEFAULT_SHELL_CANDIDATES;
pub use truncate::{truncate_middle, DEFAULT_MAX_OUTPUT_CHARS};
