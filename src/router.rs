//! Drains a thread's signalfd and routes each record to the thread's handler.

use std::mem;
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::libc;
use nix::poll::PollFlags;
use nix::sys::signal::Signal;

use crate::error::{Result, SignalError};
use crate::monitor;

/// Event loop callback for a thread's signal fd.
///
/// Does not return if the fd can no longer be read.
pub(crate) fn dispatch_pending(fd: RawFd, events: PollFlags) {
    match drain(fd, events) {
        Ok(dispatched) => log::trace!("dispatched {dispatched} signals from fd {fd}"),
        Err(err) => fatal!("{err}"),
    }
}

fn drain(fd: RawFd, events: PollFlags) -> Result<usize> {
    if events.intersects(!PollFlags::POLLIN) {
        log::error!("Unexpected event set ({:#x}) from signal fd.", events.bits());
        if !events.contains(PollFlags::POLLIN) {
            return Ok(0);
        }
    }

    let mut dispatched = 0;
    while let Some(signo) = read_record(fd)? {
        // a handler may have torn the monitor down, which also closed `fd`
        let handler = monitor::with_monitor(|monitor| {
            let Some(monitor) = monitor else {
                fatal!("signal fd {fd} is readable but the thread has no signal monitor");
            };
            match Signal::try_from(signo) {
                Ok(signal) => Some((signal, monitor.find(signal).map(|e| e.handler.clone()))),
                Err(_) => {
                    log::warn!("ignoring unsupported signal number {signo}");
                    None
                }
            }
        });

        if let Some((signal, Some(handler))) = handler {
            handler(signal);
            dispatched += 1;
        }

        let still_bound = monitor::with_monitor(|m| m.is_some_and(|m| m.fd == fd));
        if !still_bound {
            break;
        }
    }
    Ok(dispatched)
}

/// Reads one record. `None` means nothing is pending.
fn read_record(fd: RawFd) -> Result<Option<i32>> {
    let mut info: libc::signalfd_siginfo = unsafe { mem::zeroed() };
    let size = mem::size_of::<libc::signalfd_siginfo>();
    loop {
        let n = unsafe { libc::read(fd, (&mut info as *mut libc::signalfd_siginfo).cast(), size) };
        match Errno::result(n) {
            Ok(0) => return Ok(None),
            Ok(n) if n as usize == size => return Ok(Some(info.ssi_signo as i32)),
            Ok(n) => return Err(SignalError::ShortRead(n as usize)),
            Err(Errno::EAGAIN) => return Ok(None),
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(SignalError::Read(err)),
        }
    }
}
