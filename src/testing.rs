//! Helpers for tests that must run in a process of their own: fatal paths,
//! descriptor accounting, installed crash handlers.

use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};

use nix::libc;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};

pub(crate) struct ChildOutcome {
    pub(crate) status: WaitStatus,
    pub(crate) stderr: String,
}

/// Runs `f` in a forked single-threaded child whose stderr is captured. The
/// child exits with the code `f` returns, or 101 if it panics.
pub(crate) fn run_in_child(f: impl FnOnce() -> i32) -> ChildOutcome {
    let (mut rx, tx) = UnixStream::pair().unwrap();
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            drop(rx);
            unsafe { libc::dup2(tx.as_raw_fd(), libc::STDERR_FILENO) };
            drop(tx);
            let code = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or(101);
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => {
            drop(tx);
            let mut stderr = Vec::new();
            rx.read_to_end(&mut stderr).unwrap();
            let status = waitpid(child, None).unwrap();
            ChildOutcome {
                status,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            }
        }
    }
}

pub(crate) fn exited(outcome: &ChildOutcome) -> Option<i32> {
    match outcome.status {
        WaitStatus::Exited(_, code) => Some(code),
        _ => None,
    }
}

pub(crate) fn killed_by(outcome: &ChildOutcome) -> Option<nix::sys::signal::Signal> {
    match outcome.status {
        WaitStatus::Signaled(_, signal, _) => Some(signal),
        _ => None,
    }
}
