use std::rc::Rc;

use nix::sys::signal::Signal;

use crate::handler::set_event_handler;
use crate::mask::block;

fn term_signal_handler(_signal: Signal) {
    log::error!("Terminated");
    std::process::exit(0);
}

/// Exit cleanly when `SIGTERM` arrives on the calling thread's event loop.
///
/// Call from the process' first thread, before other threads start.
pub fn install_default_term_handler() {
    block(Signal::SIGTERM);
    set_event_handler(Signal::SIGTERM, Some(Rc::new(term_signal_handler)));
}
