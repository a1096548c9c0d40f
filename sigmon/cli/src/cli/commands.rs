use clap::{Subcommand, ValueEnum};
use sigmon::Signal;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an event loop that logs SIGHUP/SIGUSR1/SIGUSR2 and exits on SIGTERM
    #[command(visible_aliases = ["s"])]
    Serve {
        /// Worker threads, each with its own loop handling SIGUSR2
        #[arg(short, long, default_value_t = 0)]
        workers: usize,
    },

    /// Trigger a fatal signal with the crash reporter installed
    #[command()]
    Crash {
        #[arg(value_enum)]
        fault: Fault,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// write to an unmapped address
    Segv,
    Bus,
    Ill,
    Fpe,
    /// call abort()
    Abort,
}

impl Fault {
    pub fn signal(self) -> Signal {
        match self {
            Fault::Segv => Signal::SIGSEGV,
            Fault::Bus => Signal::SIGBUS,
            Fault::Ill => Signal::SIGILL,
            Fault::Fpe => Signal::SIGFPE,
            Fault::Abort => Signal::SIGABRT,
        }
    }
}
