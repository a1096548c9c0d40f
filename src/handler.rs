use std::rc::Rc;

use nix::errno::Errno;
use nix::libc;
use nix::poll::PollFlags;
use nix::sys::signal::{SigSet, Signal};

use crate::error::{Result, SignalError};
use crate::event_loop;
use crate::mask::current_tid;
use crate::monitor::{self, HandlerEntry, Monitor};
use crate::router;

/// Callback invoked on the owning thread's event loop with the received signal.
pub type EventHandler = Rc<dyn Fn(Signal)>;

/// Prefix of the event loop monitor name; the thread name follows it.
pub const MONITOR_NAME_PREFIX: &str = "Sig";

/// Longest thread name the kernel keeps, excluding the trailing NUL.
pub const MAX_THREAD_NAME_BYTES: usize = 15;

/// Signals that cannot be caught, or that belong to the crash reporter.
pub fn is_reserved(signal: Signal) -> bool {
    matches!(
        signal,
        Signal::SIGKILL
            | Signal::SIGSTOP
            | Signal::SIGFPE
            | Signal::SIGILL
            | Signal::SIGSEGV
            | Signal::SIGBUS
            | Signal::SIGABRT
            | Signal::SIGTRAP
            | Signal::SIGSYS
    )
}

/// Set a signal event handler for the calling thread. Each signal has at most
/// one handler; the most recent one wins. `None` removes the current handler.
///
/// The signal must already be blocked in every thread, see [`crate::block`].
///
/// Does not return on failure, including for reserved signals.
pub fn set_event_handler(signal: Signal, handler: Option<EventHandler>) {
    if let Err(err) = try_set_event_handler(signal, handler) {
        fatal!("{err}");
    }
}

/// Like [`set_event_handler`], but returns the error instead. On error the
/// calling thread's handlers, signal fd and binding are left as they were.
pub fn try_set_event_handler(signal: Signal, handler: Option<EventHandler>) -> Result<()> {
    if is_reserved(signal) {
        return Err(SignalError::Reserved(signal));
    }

    match handler {
        Some(handler) => {
            let created = !monitor::exists();
            let result = monitor::with_monitor_or_create(|monitor| {
                let mut mask = handler_mask(monitor, None);
                mask.add(signal);
                rebind(monitor, &mask)?;
                match monitor.handlers.iter_mut().find(|e| e.signal == signal) {
                    Some(entry) => entry.handler = handler,
                    None => monitor.handlers.push(HandlerEntry { signal, handler }),
                }
                Ok(())
            });
            if result.is_err() && created {
                // a monitor created by this call owns no fd or binding yet
                monitor::teardown()?;
            }
            result
        }
        None => monitor::with_monitor_mut(|monitor| {
            let Some(monitor) = monitor else {
                return Ok(());
            };
            let Some(pos) = monitor.handlers.iter().position(|e| e.signal == signal) else {
                return Ok(());
            };
            let mask = handler_mask(monitor, Some(signal));
            rebind(monitor, &mask)?;
            monitor.handlers.remove(pos);
            Ok(())
        }),
    }
}

/// The calling thread's handler for `signal`, if any.
pub fn find_handler(signal: Signal) -> Option<EventHandler> {
    monitor::with_monitor(|monitor| {
        monitor
            .and_then(|m| m.find(signal))
            .map(|entry| entry.handler.clone())
    })
}

/// Signals with a handler on the calling thread, in registration order.
pub fn registered_signals() -> Vec<Signal> {
    monitor::with_monitor(|monitor| {
        monitor
            .map(|m| m.handlers.iter().map(|e| e.signal).collect())
            .unwrap_or_default()
    })
}

fn handler_mask(monitor: &Monitor, without: Option<Signal>) -> SigSet {
    let mut mask = SigSet::empty();
    for entry in &monitor.handlers {
        if Some(entry.signal) != without {
            mask.add(entry.signal);
        }
    }
    mask
}

/// Point the monitor's signalfd at `mask`, creating the fd and its event loop
/// binding on first use. Nothing changes if the signalfd call fails.
fn rebind(monitor: &mut Monitor, mask: &SigSet) -> Result<()> {
    let fd = unsafe {
        libc::signalfd(
            monitor.fd,
            mask.as_ref(),
            libc::SFD_NONBLOCK | libc::SFD_CLOEXEC,
        )
    };
    monitor.fd = Errno::result(fd).map_err(SignalError::SignalFd)?;

    if monitor.binding.is_none() {
        let name = monitor_name(&thread_name());
        monitor.binding = Some(event_loop::create(
            &name,
            monitor.fd,
            router::dispatch_pending,
            PollFlags::POLLIN,
        ));
    }
    log::debug!(
        "signal fd {} now watching {} signals",
        monitor.fd,
        mask.iter().count()
    );
    Ok(())
}

fn monitor_name(thread_name: &str) -> String {
    let mut end = thread_name.len().min(MAX_THREAD_NAME_BYTES);
    while !thread_name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{MONITOR_NAME_PREFIX}{}", &thread_name[..end])
}

fn thread_name() -> String {
    if let Some(name) = std::thread::current().name() {
        return name.to_string();
    }
    let Ok(tid) = current_tid() else {
        return String::from("unknown");
    };
    procfs::process::Process::myself()
        .and_then(|process| process.task_from_tid(tid.as_raw()))
        .and_then(|task| task.stat())
        .map(|stat| stat.comm)
        .unwrap_or_else(|_| tid.to_string())
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    use nix::sys::resource::{getrlimit, setrlimit, Resource};

    use crate::testing;

    use super::*;

    fn noop(_: Signal) {}

    fn on_thread(f: impl FnOnce() + Send + 'static) {
        std::thread::spawn(f).join().unwrap();
    }

    #[test]
    fn test_find_returns_registered_handler() {
        on_thread(|| {
            for signal in [Signal::SIGUSR1, Signal::SIGUSR2, Signal::SIGHUP, Signal::SIGPIPE] {
                let handler: EventHandler = Rc::new(noop);
                set_event_handler(signal, Some(handler.clone()));
                let found = find_handler(signal).unwrap();
                assert!(Rc::ptr_eq(&found, &handler));
            }
            assert_eq!(registered_signals().len(), 4);
            delete_all_checked();
        });
    }

    #[test]
    fn test_remove_missing_handler_is_noop() {
        on_thread(|| {
            set_event_handler(Signal::SIGUSR1, None);
            assert!(!monitor::exists());

            set_event_handler(Signal::SIGUSR2, Some(Rc::new(noop)));
            set_event_handler(Signal::SIGUSR1, None);
            assert_eq!(registered_signals(), vec![Signal::SIGUSR2]);

            set_event_handler(Signal::SIGUSR2, None);
            assert!(registered_signals().is_empty());
            assert!(find_handler(Signal::SIGUSR2).is_none());
            delete_all_checked();
        });
    }

    #[test]
    fn test_replace_keeps_single_entry() {
        on_thread(|| {
            let calls = Rc::new(Cell::new((0, 0)));
            let first = calls.clone();
            let second = calls.clone();

            set_event_handler(
                Signal::SIGUSR1,
                Some(Rc::new(move |_: Signal| first.set((first.get().0 + 1, first.get().1)))),
            );
            set_event_handler(
                Signal::SIGUSR1,
                Some(Rc::new(move |_: Signal| second.set((second.get().0, second.get().1 + 1)))),
            );
            assert_eq!(registered_signals(), vec![Signal::SIGUSR1]);

            find_handler(Signal::SIGUSR1).unwrap()(Signal::SIGUSR1);
            assert_eq!(calls.get(), (0, 1));
            delete_all_checked();
        });
    }

    #[test]
    fn test_reserved_signal_rejected_before_mutation() {
        on_thread(|| {
            for signal in [
                Signal::SIGKILL,
                Signal::SIGSTOP,
                Signal::SIGSEGV,
                Signal::SIGILL,
                Signal::SIGBUS,
                Signal::SIGABRT,
                Signal::SIGTRAP,
                Signal::SIGSYS,
                Signal::SIGFPE,
            ] {
                assert_eq!(
                    try_set_event_handler(signal, Some(Rc::new(noop))),
                    Err(SignalError::Reserved(signal))
                );
            }
            assert!(!monitor::exists());
            assert_eq!(event_loop::len(), 0);
        });
    }

    #[test]
    fn test_binding_created_once_and_named() {
        std::thread::Builder::new()
            .name("a-rather-long-worker-name".to_string())
            .spawn(|| {
                set_event_handler(Signal::SIGUSR1, Some(Rc::new(noop)));
                set_event_handler(Signal::SIGUSR2, Some(Rc::new(noop)));
                assert_eq!(event_loop::len(), 1);

                let binding = monitor::with_monitor(|m| m.and_then(|m| m.binding)).unwrap();
                assert_eq!(
                    event_loop::name(binding).as_deref(),
                    Some("Siga-rather-long-w")
                );
                delete_all_checked();
                assert_eq!(event_loop::len(), 0);
            })
            .unwrap()
            .join()
            .unwrap();
    }

    fn open_fds() -> usize {
        procfs::process::Process::myself()
            .unwrap()
            .fd_count()
            .unwrap()
    }

    #[test]
    fn test_repeated_install_teardown_cycles() {
        // counted in a child so parallel tests cannot skew the fd table
        let outcome = testing::run_in_child(|| {
            let before = open_fds();
            for _ in 0..64 {
                set_event_handler(Signal::SIGUSR1, Some(Rc::new(noop)));
                assert!(find_handler(Signal::SIGUSR1).is_some());
                delete_all_checked();
                assert!(find_handler(Signal::SIGUSR1).is_none());
                assert!(!monitor::exists());
                assert_eq!(event_loop::len(), 0);
            }
            assert_eq!(open_fds(), before);
            0
        });
        assert_eq!(testing::exited(&outcome), Some(0), "{}", outcome.stderr);
    }

    #[test]
    fn test_reserved_signal_is_fatal() {
        for signal in [Signal::SIGSEGV, Signal::SIGKILL] {
            let outcome = testing::run_in_child(|| {
                set_event_handler(signal, Some(Rc::new(noop)));
                0
            });
            assert_eq!(testing::killed_by(&outcome), Some(Signal::SIGABRT));
        }
    }

    #[test]
    fn test_failed_first_registration_leaves_no_monitor() {
        let outcome = testing::run_in_child(|| {
            let (_, hard) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
            setrlimit(Resource::RLIMIT_NOFILE, 0, hard).unwrap();

            let result = try_set_event_handler(Signal::SIGUSR1, Some(Rc::new(noop)));
            assert_eq!(result, Err(SignalError::SignalFd(Errno::EMFILE)));
            assert!(find_handler(Signal::SIGUSR1).is_none());
            assert!(registered_signals().is_empty());
            assert!(!monitor::exists());
            assert_eq!(event_loop::len(), 0);
            0
        });
        assert_eq!(testing::exited(&outcome), Some(0), "{}", outcome.stderr);
    }

    #[test]
    fn test_failed_rebind_keeps_existing_handlers() {
        on_thread(|| {
            set_event_handler(Signal::SIGUSR1, Some(Rc::new(noop)));
            let original: EventHandler = find_handler(Signal::SIGUSR1).unwrap();

            // signalfd rejects a descriptor that is not a signalfd
            let (stream, _peer) = UnixStream::pair().unwrap();
            let signal_fd = monitor::with_monitor_mut(|m| {
                let m = m.unwrap();
                std::mem::replace(&mut m.fd, stream.as_raw_fd())
            });

            assert_eq!(
                try_set_event_handler(Signal::SIGUSR2, Some(Rc::new(noop))),
                Err(SignalError::SignalFd(Errno::EINVAL))
            );
            assert_eq!(
                try_set_event_handler(Signal::SIGUSR1, Some(Rc::new(noop))),
                Err(SignalError::SignalFd(Errno::EINVAL))
            );
            assert_eq!(
                try_set_event_handler(Signal::SIGUSR1, None),
                Err(SignalError::SignalFd(Errno::EINVAL))
            );
            assert_eq!(registered_signals(), vec![Signal::SIGUSR1]);
            assert!(Rc::ptr_eq(&find_handler(Signal::SIGUSR1).unwrap(), &original));
            assert_eq!(event_loop::len(), 1);

            monitor::with_monitor_mut(|m| m.unwrap().fd = signal_fd);
            delete_all_checked();
        });
    }

    #[test]
    fn test_monitor_name_truncates_on_char_boundary() {
        assert_eq!(monitor_name("main"), "Sigmain");
        assert_eq!(monitor_name("0123456789abcdefgh"), "Sig0123456789abcde");
        // 'é' is two bytes and straddles the limit
        assert_eq!(monitor_name("abcdefghijklmné"), "Sigabcdefghijklmn");
    }

    fn delete_all_checked() {
        monitor::teardown().unwrap();
    }
}
