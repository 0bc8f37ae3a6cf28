//! Forked execution contexts
//!
//! An execution context is a child process created with `fork(2)` that runs a
//! closure and leaves through `_exit`, so it never unwinds or returns into the
//! frames it inherited from the caller.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitStatus;

/// Exit code of a child whose entry point panicked
pub const PANIC_EXIT_CODE: i32 = 101;

/// How a reaped child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Reaped by this handle with the given status
    Exited(ExitStatus),
    /// Reaped by someone else, so the status is lost. This is what happens
    /// when SIGCHLD is set to SIG_IGN and the kernel reaps children itself.
    Unknown,
}

impl ChildExit {
    /// Exit status, if it was observed
    pub fn status(&self) -> Option<ExitStatus> {
        match self {
            ChildExit::Exited(status) => Some(*status),
            ChildExit::Unknown => None,
        }
    }
}

/// Handle to a forked child process
#[derive(Debug)]
pub struct ChildProcess {
    pid: libc::pid_t,
    exit: Option<ChildExit>,
}

impl ChildProcess {
    /// OS process id of the child
    pub fn id(&self) -> u32 {
        self.pid as u32
    }

    /// Check whether the child has terminated, reaping it if so.
    ///
    /// Never blocks. Once reaped, the result is cached and returned on every call.
    /// `ECHILD` means the child no longer exists as ours to wait for, which is
    /// reported as [`ChildExit::Unknown`].
    pub fn try_wait(&mut self) -> io::Result<Option<ChildExit>> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }

        let mut raw_status: libc::c_int = 0;
        loop {
            // SAFETY: `raw_status` is a valid out-pointer for the duration of the call.
            let pid = unsafe { libc::waitpid(self.pid, &mut raw_status, libc::WNOHANG) };
            match pid {
                0 => return Ok(None),
                -1 => {
                    let error = io::Error::last_os_error();
                    match error.raw_os_error() {
                        Some(libc::EINTR) => continue,
                        Some(libc::ECHILD) => {
                            self.exit = Some(ChildExit::Unknown);
                            return Ok(self.exit);
                        }
                        _ => return Err(error),
                    }
                }
                _ => {
                    let exit = ChildExit::Exited(ExitStatus::from_raw(raw_status));
                    self.exit = Some(exit);
                    return Ok(Some(exit));
                }
            }
        }
    }
}

/// Fork a child process that runs `entry` and exits with its return value.
///
/// In the parent, `entry` is dropped without being called. In the child, a
/// panic escaping `entry` exits with [`PANIC_EXIT_CODE`].
///
/// Only the calling thread exists in the child. `entry` must not depend on
/// other threads of the parent (locks they might hold, async runtimes).
pub fn fork_child<F>(entry: F) -> io::Result<ChildProcess>
where
    F: FnOnce() -> i32,
{
    // SAFETY: the child only runs `entry` and then `_exit`s; it never returns
    // into the caller's frames.
    match unsafe { libc::fork() } {
        -1 => Err(io::Error::last_os_error()),
        0 => {
            let code = panic::catch_unwind(AssertUnwindSafe(entry)).unwrap_or(PANIC_EXIT_CODE);
            // SAFETY: terminates the child without running the parent's exit handlers.
            unsafe { libc::_exit(code) }
        }
        pid => Ok(ChildProcess { pid, exit: None }),
    }
}

/// Name the current process after a worker, as shown by `ps` and `top`.
///
/// Linux keeps at most 15 bytes. Best effort; a no-op on other platforms.
pub fn set_process_name(name: &str) {
    #[cfg(target_os = "linux")]
    {
        let mut end = name.len().min(15);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        if let Ok(name) = std::ffi::CString::new(&name[..end]) {
            // SAFETY: PR_SET_NAME reads a NUL-terminated string of at most 16 bytes.
            unsafe {
                libc::prctl(libc::PR_SET_NAME, name.as_ptr() as libc::c_ulong, 0, 0, 0);
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = name;
    }
}
