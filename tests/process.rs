//! Forked execution contexts and cross-process shared state.
//!
//! Kept out of the library's unit tests: a forked child inherits every open
//! descriptor of the test binary, which would hold other tests' channels open.

mod common;

use common::{serial, SigchldIgnored};
use mpworker::process::{self, ChildExit, ChildProcess, PANIC_EXIT_CODE};
use mpworker::SharedCell;
use std::process::ExitStatus;
use std::thread;
use std::time::{Duration, Instant};

fn wait_for_exit(child: &mut ChildProcess) -> ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match child.try_wait().unwrap() {
            Some(ChildExit::Exited(status)) => return status,
            Some(ChildExit::Unknown) => panic!("child {} was reaped elsewhere", child.id()),
            None => {}
        }
        assert!(Instant::now() < deadline, "child {} did not exit", child.id());
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_child_exit_code_is_reported() {
    let _serial = serial();

    let mut child = process::fork_child(|| 7).unwrap();
    assert_ne!(child.id(), std::process::id());

    let status = wait_for_exit(&mut child);
    assert_eq!(status.code(), Some(7));
}

#[test]
fn test_panicking_child_exits_with_panic_code() {
    let _serial = serial();

    let mut child = process::fork_child(|| panic!("child blew up")).unwrap();

    let status = wait_for_exit(&mut child);
    assert_eq!(status.code(), Some(PANIC_EXIT_CODE));
}

#[test]
fn test_reaped_status_is_cached() {
    let _serial = serial();

    let mut child = process::fork_child(|| 0).unwrap();
    let first = wait_for_exit(&mut child);

    // waitpid would fail with ECHILD now; the cached status is returned instead
    let second = child.try_wait().unwrap();
    assert_eq!(second, Some(ChildExit::Exited(first)));
    assert!(first.success());
}

#[test]
fn test_running_child_is_not_reaped() {
    let _serial = serial();

    let mut child = process::fork_child(|| {
        thread::sleep(Duration::from_millis(300));
        0
    })
    .unwrap();

    assert_eq!(child.try_wait().unwrap(), None);
    assert!(wait_for_exit(&mut child).success());
}

#[test]
fn test_child_reaped_by_kernel_reports_unknown_exit() {
    let _serial = serial();

    let sigchld = SigchldIgnored::install();

    let mut child = process::fork_child(|| 0).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    let exit = loop {
        if let Some(exit) = child.try_wait().unwrap() {
            break exit;
        }
        assert!(Instant::now() < deadline, "child {} did not exit", child.id());
        thread::sleep(Duration::from_millis(10));
    };
    drop(sigchld);

    assert_eq!(exit, ChildExit::Unknown);
    assert_eq!(exit.status(), None);
    assert_eq!(child.try_wait().unwrap(), Some(ChildExit::Unknown));
}

#[test]
fn test_shared_cell_write_in_child_is_visible_to_parent() {
    let _serial = serial();

    let cell = SharedCell::new(0u64).unwrap();
    let in_child = cell.clone();
    let mut child = process::fork_child(move || match in_child.set(42) {
        Ok(()) => 0,
        Err(_) => 1,
    })
    .unwrap();

    assert!(wait_for_exit(&mut child).success());
    assert_eq!(cell.get().unwrap(), 42);
}

#[test]
fn test_shared_cell_lock_excludes_across_processes() {
    let _serial = serial();

    const INCREMENTS: u32 = 2_000;
    let cell = SharedCell::new(0u32).unwrap();

    let in_child = cell.clone();
    let mut child = process::fork_child(move || {
        for _ in 0..INCREMENTS {
            match in_child.lock() {
                Ok(mut value) => *value += 1,
                Err(_) => return 1,
            }
        }
        0
    })
    .unwrap();

    for _ in 0..INCREMENTS {
        *cell.lock().unwrap() += 1;
    }

    assert!(wait_for_exit(&mut child).success());
    assert_eq!(cell.get().unwrap(), INCREMENTS * 2);
}
