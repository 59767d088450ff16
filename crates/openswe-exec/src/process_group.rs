//! Process-group helpers so a timed-out command takes its children with it.
//!
//! The shell is started as the leader of a fresh process group; on timeout
//! the whole group receives SIGKILL rather than just the shell's PID.

use std::io;
use tokio::process::Command;

/// Make the spawned child the leader of its own process group.
#[cfg(unix)]
pub fn isolate(cmd: &mut Command) {
    cmd.process_group(0);
}

/// No-op on non-Unix platforms.
#[cfg(not(unix))]
pub fn isolate(_cmd: &mut Command) {}

/// SIGKILL every process in the group led by `pid`.
///
/// A group that no longer exists is not an error.
#[cfg(unix)]
pub fn kill_process_group(pid: u32) -> io::Result<()> {
    let result = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

/// No-op on non-Unix platforms; the direct child is still killed by the caller.
#[cfg(not(unix))]
pub fn kill_process_group(_pid: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_kill_missing_group_is_ok() {
        // PIDs near the top of the range are effectively never allocated.
        assert!(kill_process_group(4_000_000).is_ok());
    }
}
