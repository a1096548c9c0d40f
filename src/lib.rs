//! Signal events for per-thread event loops, and crash reports for fatal
//! signals.
//!
//! Ordinary signals are blocked with [`block`], then routed through a
//! per-thread signalfd: [`set_event_handler`] registers a callback that the
//! thread's [`event_loop`] invokes synchronously when the signal arrives.
//! Program-error signals belong to the [`crash`] reporter instead.
//!
//! ```no_run
//! use std::rc::Rc;
//! use sigmon::Signal;
//!
//! sigmon::install_show_stack_handler(&sigmon::CrashReporterConfig::from_env());
//! sigmon::install_default_term_handler();
//!
//! sigmon::block(Signal::SIGUSR1);
//! sigmon::set_event_handler(
//!     Signal::SIGUSR1,
//!     Some(Rc::new(|signal: Signal| log::info!("got {signal}"))),
//! );
//! sigmon::event_loop::run();
//! ```

#[macro_use]
mod error;

pub mod crash;
pub mod event_loop;
mod handler;
mod mask;
mod monitor;
mod router;
mod term;

#[cfg(test)]
mod testing;

pub use nix::sys::signal::Signal;

pub use crash::{install_show_stack_handler, CrashReporterConfig};
pub use error::{Result, SignalError};
pub use handler::{
    find_handler, is_reserved, registered_signals, set_event_handler, try_set_event_handler,
    EventHandler, MAX_THREAD_NAME_BYTES, MONITOR_NAME_PREFIX,
};
pub use mask::{block, try_block};
pub use monitor::delete_all;
pub use term::install_default_term_handler;
