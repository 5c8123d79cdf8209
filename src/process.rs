use std::path::Path;

/// Create a [`tokio::process::Command`] that does **not** flash a console
/// window on Windows.  On other platforms this is identical to
/// `tokio::process::Command::new(program)`.
pub fn command(program: &Path) -> tokio::process::Command {
    #![allow(unused_mut)]
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Check if a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Some(pid) = signalable_pid(pid) else {
            return false;
        };
        // signal 0 doesn't send a signal but checks if process exists
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // EPERM: exists but belongs to someone else
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        // On non-Unix, conservatively assume alive (caller will time out)
        let _ = pid;
        true
    }
}

/// Ask a process to shut down gracefully (SIGTERM).
pub fn terminate_process(pid: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let Some(pid) = signalable_pid(pid) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("pid {} does not name a single process", pid),
            ));
        };
        if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "graceful termination is only implemented on Unix",
        ))
    }
}

/// `kill` treats 0 and negative pids as process groups.
#[cfg(unix)]
fn signalable_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|&pid| pid > 0)
}
