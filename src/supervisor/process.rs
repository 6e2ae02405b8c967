//! Process identity and signalling

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};
use tracing::debug;

/// Kernel limit on a thread name, without the trailing NUL
#[cfg(target_os = "linux")]
const MAX_NAME_LEN: usize = 15;

pub fn current_pid() -> u32 {
    std::process::id()
}

/// Name shown by `ps` and `top`. Only takes effect on Linux.
pub fn set_name(name: &str) {
    #[cfg(target_os = "linux")]
    {
        let bytes: Vec<u8> = name
            .bytes()
            .filter(|b| *b != 0)
            .take(MAX_NAME_LEN)
            .collect();
        if let Ok(name) = std::ffi::CString::new(bytes) {
            if let Err(e) = nix::sys::prctl::set_name(&name) {
                debug!(error = %e, "Failed to set process name");
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    debug!(name, "Process names are only set on Linux");
}

/// Move this process into its own process group
pub fn detach() {
    if let Err(e) = unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
        // EPERM when already a session leader
        debug!(error = %e, "Failed to create process group");
    }
}

/// Send SIGABRT to `pid`. `Ok(false)` when the process no longer exists.
pub fn abort(pid: u32) -> nix::Result<bool> {
    let pid = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
    match signal::kill(Pid::from_raw(pid), Signal::SIGABRT) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_abort_kills_the_process() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        assert!(abort(child.id()).unwrap());

        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(abort(child.id()).is_ok());
    }

    #[test]
    fn test_abort_out_of_range_pid() {
        assert_eq!(abort(u32::MAX), Err(Errno::EINVAL));
    }

    #[test]
    fn test_set_name_accepts_long_names() {
        set_name("flotilla with a very long name");
    }
}
