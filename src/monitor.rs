//! Per-thread signal monitor registry.
//!
//! A thread that registers at least one signal event handler owns exactly one
//! [`Monitor`]: the signalfd it reads, its binding into the thread's event
//! loop, and its handler entries. Nothing here is shared across threads.

use std::cell::RefCell;
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::close;

use crate::error::{Result, SignalError};
use crate::event_loop::{self, FdMonitorRef};
use crate::handler::EventHandler;

pub(crate) const INVALID_FD: RawFd = -1;

pub(crate) struct HandlerEntry {
    pub(crate) signal: Signal,
    pub(crate) handler: EventHandler,
}

pub(crate) struct Monitor {
    pub(crate) fd: RawFd,
    pub(crate) binding: Option<FdMonitorRef>,
    pub(crate) handlers: Vec<HandlerEntry>,
}

impl Monitor {
    fn new() -> Self {
        Monitor {
            fd: INVALID_FD,
            binding: None,
            handlers: Vec::new(),
        }
    }

    pub(crate) fn find(&self, signal: Signal) -> Option<&HandlerEntry> {
        self.handlers.iter().find(|entry| entry.signal == signal)
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("fd", &self.fd)
            .field("binding", &self.binding)
            .field(
                "signals",
                &self.handlers.iter().map(|e| e.signal).collect::<Vec<_>>(),
            )
            .finish()
    }
}

thread_local! {
    static MONITOR: RefCell<Option<Monitor>> = const { RefCell::new(None) };
}

/// Run `f` against the calling thread's monitor, if there is one.
pub(crate) fn with_monitor<R>(f: impl FnOnce(Option<&Monitor>) -> R) -> R {
    MONITOR.with_borrow(|monitor| f(monitor.as_ref()))
}

pub(crate) fn with_monitor_mut<R>(f: impl FnOnce(Option<&mut Monitor>) -> R) -> R {
    MONITOR.with_borrow_mut(|monitor| f(monitor.as_mut()))
}

/// Run `f` against the calling thread's monitor, creating it first if needed.
pub(crate) fn with_monitor_or_create<R>(f: impl FnOnce(&mut Monitor) -> R) -> R {
    MONITOR.with_borrow_mut(|monitor| f(monitor.get_or_insert_with(Monitor::new)))
}

pub(crate) fn exists() -> bool {
    with_monitor(|monitor| monitor.is_some())
}

fn close_retrying(fd: RawFd) -> Result<()> {
    loop {
        match close(fd) {
            Ok(()) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(SignalError::Close(err)),
        }
    }
}

/// Release the calling thread's monitor and everything it owns.
pub(crate) fn teardown() -> Result<()> {
    let Some(monitor) = MONITOR.with_borrow_mut(Option::take) else {
        return Ok(());
    };

    if let Some(binding) = monitor.binding {
        event_loop::delete(binding);
    }
    if monitor.fd != INVALID_FD {
        close_retrying(monitor.fd)?;
    }
    log::debug!("released signal monitor with {} handlers", monitor.handlers.len());
    Ok(())
}

/// Removes all signal event handlers for the calling thread and releases the
/// signal fd. Must be called before a thread that registered handlers exits.
///
/// Does not return on failure.
pub fn delete_all() {
    if let Err(err) = teardown() {
        fatal!("{err}");
    }
}
