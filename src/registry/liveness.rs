//! Process liveness probe.

/// Whether a process with `pid` currently exists.
///
/// Sends signal 0, which performs the permission and existence checks
/// without delivering anything. `EPERM` means the process exists but belongs
/// to someone else, which still counts as alive.
#[cfg(unix)]
#[must_use]
pub fn process_is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether a process with `pid` currently exists.
///
/// Without a portable probe, only the current process is known to be alive;
/// other records are judged by timestamp alone.
#[cfg(not(unix))]
#[must_use]
pub fn process_is_alive(pid: u32) -> bool {
    pid != 0
}
