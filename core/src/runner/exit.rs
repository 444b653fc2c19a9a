/// Exit code reported after a forced kill when the real status is unavailable.
#[cfg(unix)]
pub const FORCED_KILL_EXIT_CODE: i32 = -libc::SIGKILL;
#[cfg(not(unix))]
pub const FORCED_KILL_EXIT_CODE: i32 = 1;

/// Process status as reported to the server: the exit code, or `-signal`
/// when the process died of a signal.
pub fn normalize_exit(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            code
        } else if let Some(sig) = status.signal() {
            -sig
        } else {
            1
        }
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1)
    }
}
