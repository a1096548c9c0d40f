use nix::errno::Errno;
use nix::sys::signal::Signal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("Signal event handler for {0} is not allowed")]
    Reserved(Signal),

    #[error("Could not get tid of calling thread: {0}")]
    Tid(Errno),

    #[error("Could not block signal {0}: {1}")]
    Mask(Signal, Errno),

    #[error("Could not set signal event handler: {0}")]
    SignalFd(Errno),

    #[error("Could not read from signal fd: {0}")]
    Read(Errno),

    #[error("Short read from signal fd: {0} bytes")]
    ShortRead(usize),

    #[error("Could not close file descriptor: {0}")]
    Close(Errno),

    #[error("Could not poll monitored file descriptors: {0}")]
    Poll(Errno),
}

pub type Result<T> = std::result::Result<T, SignalError>;

/// Logs at error level and aborts the process.
///
/// Used for contract violations and OS failures that leave signal delivery
/// in an undefined state.
macro_rules! fatal {
    ($($arg:tt)+) => {{
        log::error!($($arg)+);
        std::process::abort()
    }};
}
