use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
use nix::unistd::{getpid, Pid};

use crate::error::{Result, SignalError};

/// Kernel thread id of the calling thread.
pub(crate) fn current_tid() -> Result<Pid> {
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    Errno::result(tid)
        .map(|tid| Pid::from_raw(tid as libc::pid_t))
        .map_err(SignalError::Tid)
}

/// Blocks a signal in the calling thread.
///
/// Signals that get an event handler must be blocked in every thread of the
/// process. Call this from the process' first thread before any other thread
/// is started so that they all inherit the mask.
///
/// Does not return on failure.
pub fn block(signal: Signal) {
    if let Err(err) = try_block(signal) {
        fatal!("{err}");
    }
}

pub fn try_block(signal: Signal) -> Result<()> {
    let tid = current_tid()?;
    if tid != getpid() {
        log::warn!(
            "Blocking signal {} ({}). Blocking signals not in the main thread may result in unexpected behaviour.",
            signal as i32,
            signal
        );
    }

    let mut mask = SigSet::empty();
    mask.add(signal);
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), None)
        .map_err(|err| SignalError::Mask(signal, err))
}
