//! Helpers shared by the forking test binaries.
#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard};

static FORK_LOCK: Mutex<()> = Mutex::new(());

/// Serialise tests that fork: a child inherits every descriptor the test
/// binary has open at that moment, including other tests' stop channels.
pub fn serial() -> MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sets SIGCHLD to SIG_IGN until dropped, so the kernel reaps children itself.
pub struct SigchldIgnored {
    previous: libc::sighandler_t,
}

impl SigchldIgnored {
    pub fn install() -> Self {
        // SAFETY: installing SIG_IGN runs no code in signal context.
        let previous = unsafe { libc::signal(libc::SIGCHLD, libc::SIG_IGN) };
        assert_ne!(previous, libc::SIG_ERR);
        Self { previous }
    }
}

impl Drop for SigchldIgnored {
    fn drop(&mut self) {
        // SAFETY: restores the disposition saved by `install`.
        unsafe {
            libc::signal(libc::SIGCHLD, self.previous);
        }
    }
}
