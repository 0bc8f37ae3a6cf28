use crate::channel::StopSender;
use crate::process::{ChildExit, ChildProcess};

/// Lifecycle of a [`super::Worker`]
///
/// `Idle -> Starting -> Running -> Stopping -> Stopped`, and `Stopped -> Starting`
/// for a restart. `Starting` and `Stopping` only last while `start()` or `stop()`
/// is executing, except that a failed wait leaves the worker in `Stopping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl Lifecycle {
    pub(crate) fn can_start(self) -> bool {
        matches!(self, Lifecycle::Idle | Lifecycle::Stopped)
    }

    pub(crate) fn can_stop(self) -> bool {
        matches!(self, Lifecycle::Running | Lifecycle::Stopping)
    }
}

/// A running execution context, owned by the worker between start and stop
pub(crate) struct ExecutionContext {
    pub(crate) stop_tx: StopSender,
    pub(crate) child: ChildProcess,
}

impl ExecutionContext {
    pub(crate) fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// Human-readable exit status for log lines
pub(crate) fn describe_exit(exit: &ChildExit) -> String {
    use std::os::unix::process::ExitStatusExt;

    let ChildExit::Exited(status) = exit else {
        return "status unknown (reaped elsewhere)".to_string();
    };
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(signal)) => format!("killed by signal {}", signal),
        _ => status.to_string(),
    }
}

/// Whether the exit deserves a warning: a non-zero code or a signal
pub(crate) fn is_abnormal(exit: &ChildExit) -> bool {
    matches!(exit, ChildExit::Exited(status) if !status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn exited(raw: i32) -> ChildExit {
        ChildExit::Exited(ExitStatus::from_raw(raw))
    }

    #[test]
    fn test_start_and_stop_preconditions() {
        assert!(Lifecycle::Idle.can_start());
        assert!(Lifecycle::Stopped.can_start());
        assert!(!Lifecycle::Starting.can_start());
        assert!(!Lifecycle::Running.can_start());
        assert!(!Lifecycle::Stopping.can_start());

        assert!(Lifecycle::Running.can_stop());
        assert!(Lifecycle::Stopping.can_stop());
        assert!(!Lifecycle::Idle.can_stop());
        assert!(!Lifecycle::Starting.can_stop());
        assert!(!Lifecycle::Stopped.can_stop());
    }

    #[test]
    fn test_describe_exit() {
        assert_eq!(describe_exit(&exited(0)), "exit code 0");
        assert_eq!(describe_exit(&exited(1 << 8)), "exit code 1");
        assert_eq!(
            describe_exit(&exited(libc::SIGKILL)),
            format!("killed by signal {}", libc::SIGKILL)
        );
        assert_eq!(
            describe_exit(&ChildExit::Unknown),
            "status unknown (reaped elsewhere)"
        );
    }

    #[test]
    fn test_only_failed_exits_are_abnormal() {
        assert!(!is_abnormal(&exited(0)));
        assert!(!is_abnormal(&ChildExit::Unknown));
        assert!(is_abnormal(&exited(1 << 8)));
        assert!(is_abnormal(&exited(libc::SIGKILL)));
    }
}
