//! Process liveness queries.
//!
//! The lock coordinator decides whether an on-disk lock record is stale by
//! asking whether its holder pid still exists, not by looking at the file.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Check if a process with the given PID is alive.
///
/// Sends signal 0, which performs the existence/permission check without
/// delivering anything. `EPERM` means the process exists but belongs to
/// another user, so it counts as alive.
///
/// # Arguments
/// * `pid` - The process ID to check
///
/// # Returns
/// * `true` - The process exists
/// * `false` - The process doesn't exist (or the pid is out of range)
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
