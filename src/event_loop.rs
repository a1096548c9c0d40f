//! Minimal per-thread fd monitor loop.
//!
//! Each thread owns its own set of monitored descriptors. A monitor pairs a
//! descriptor with a handler that is called, on the owning thread, whenever
//! `poll(2)` reports one of the requested events. Handlers may create or
//! delete monitors while they run.

use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::libc;
use nix::poll::PollFlags;

use crate::error::{Result, SignalError};

pub type FdHandler = fn(RawFd, PollFlags);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FdMonitorRef(u64);

#[derive(Debug)]
struct FdMonitor {
    id: u64,
    name: String,
    fd: RawFd,
    handler: FdHandler,
    events: PollFlags,
}

thread_local! {
    static MONITORS: RefCell<Vec<FdMonitor>> = const { RefCell::new(Vec::new()) };
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}

/// Start watching `fd` for `events` on the calling thread.
pub fn create(name: &str, fd: RawFd, handler: FdHandler, events: PollFlags) -> FdMonitorRef {
    let id = NEXT_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    });
    log::debug!("creating fd monitor {name} for fd {fd}");
    MONITORS.with_borrow_mut(|monitors| {
        monitors.push(FdMonitor {
            id,
            name: name.to_string(),
            fd,
            handler,
            events,
        })
    });
    FdMonitorRef(id)
}

/// Stop watching. Unknown references are ignored.
pub fn delete(monitor: FdMonitorRef) {
    MONITORS.with_borrow_mut(|monitors| {
        if let Some(pos) = monitors.iter().position(|m| m.id == monitor.0) {
            let removed = monitors.remove(pos);
            log::debug!("deleted fd monitor {} for fd {}", removed.name, removed.fd);
        }
    });
}

pub fn name(monitor: FdMonitorRef) -> Option<String> {
    MONITORS.with_borrow(|monitors| {
        monitors
            .iter()
            .find(|m| m.id == monitor.0)
            .map(|m| m.name.clone())
    })
}

/// Number of monitors registered by the calling thread.
pub fn len() -> usize {
    MONITORS.with_borrow(Vec::len)
}

fn is_registered(id: u64) -> bool {
    MONITORS.with_borrow(|monitors| monitors.iter().any(|m| m.id == id))
}

/// Poll every monitor of the calling thread once and dispatch ready ones.
///
/// `timeout_ms` follows `poll(2)`: negative waits forever, zero returns
/// immediately. Returns the number of handlers invoked; an interrupted poll
/// counts as zero.
pub fn run_once(timeout_ms: i32) -> Result<usize> {
    let snapshot: Vec<(u64, RawFd, FdHandler)> = MONITORS.with_borrow(|monitors| {
        monitors.iter().map(|m| (m.id, m.fd, m.handler)).collect()
    });
    let mut pollfds: Vec<libc::pollfd> = MONITORS.with_borrow(|monitors| {
        monitors
            .iter()
            .map(|m| libc::pollfd {
                fd: m.fd,
                events: m.events.bits(),
                revents: 0,
            })
            .collect()
    });

    let ready = unsafe {
        libc::poll(
            pollfds.as_mut_ptr(),
            pollfds.len() as libc::nfds_t,
            timeout_ms,
        )
    };
    match Errno::result(ready) {
        Ok(0) => return Ok(0),
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok(0),
        Err(err) => return Err(SignalError::Poll(err)),
    }

    let mut dispatched = 0;
    for ((id, fd, handler), pollfd) in snapshot.into_iter().zip(pollfds) {
        if pollfd.revents == 0 {
            continue;
        }
        // an earlier handler in this round may have deleted this monitor
        if !is_registered(id) {
            continue;
        }
        handler(fd, PollFlags::from_bits_truncate(pollfd.revents));
        dispatched += 1;
    }
    Ok(dispatched)
}

/// Run the calling thread's loop forever.
pub fn run() -> ! {
    loop {
        if let Err(err) = run_once(-1) {
            fatal!("event loop failed: {err}");
        }
    }
}
