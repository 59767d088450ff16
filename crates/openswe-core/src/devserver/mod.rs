//! Dev-server detection and launching.
//!
//! [`detect`] decides how a project starts, [`DevServerLauncher`] starts it
//! detached and waits for readiness using [`poll_until`] driven by a
//! [`ReadinessPolicy`]. Everything runs through a
//! [`CommandTarget`](crate::CommandTarget), so the same code works inside a
//! sandbox and on the host.

mod detect;
mod launch;
mod readiness;
mod wait;

pub use detect::{
    detect, detect_dev_server, DevServerConfig, PackageManager, ProjectSnapshot, ProjectType,
};
pub use launch::{
    bind_port, DevServerLauncher, DevServerPaths, DevServerStatus, LaunchOutcome, LaunchRequest,
    LaunchState, DEFAULT_POLL_INTERVAL, DEFAULT_START_TIMEOUT, LOG_TAIL_LINES,
};
pub use readiness::{detect_port, Readiness, ReadinessPolicy};
pub use wait::poll_until;
