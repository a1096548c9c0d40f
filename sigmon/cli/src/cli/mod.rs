use std::io::Write;
use std::rc::Rc;
use std::thread;

use anyhow::Result;
use clap::Parser;
use nix::sys::signal::raise;
use sigmon::{CrashReporterConfig, Signal};

pub mod commands;

use commands::{Commands, Fault};

/// Unmapped on Linux, and aligned for the write below.
const INVALID_ADDRESS: usize = 0x10;

const LOGGED_SIGNALS: [Signal; 3] = [Signal::SIGHUP, Signal::SIGUSR1, Signal::SIGUSR2];

/// sigmon - signal events and crash reports for event-loop applications
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub fn run(&self) -> Result<()> {
        sigmon::install_show_stack_handler(&CrashReporterConfig::from_env());
        match self.command {
            Commands::Serve { workers } => serve(workers),
            Commands::Crash { fault } => crash(fault),
        }
    }
}

fn log_signal(signal: Signal) {
    let name = thread::current().name().unwrap_or("<unnamed>").to_string();
    log::info!("received {signal} on {name}");
}

fn serve(workers: usize) -> Result<()> {
    // block before any thread starts so every thread inherits the mask
    for signal in LOGGED_SIGNALS {
        sigmon::block(signal);
    }
    sigmon::install_default_term_handler();

    for index in 0..workers {
        thread::Builder::new()
            .name(format!("worker-{index}"))
            .spawn(|| {
                sigmon::set_event_handler(Signal::SIGUSR2, Some(Rc::new(log_signal)));
                sigmon::event_loop::run()
            })?;
    }

    for signal in LOGGED_SIGNALS {
        sigmon::set_event_handler(signal, Some(Rc::new(log_signal)));
    }

    let mut stdout = std::io::stdout();
    writeln!(stdout, "ready {}", std::process::id())?;
    stdout.flush()?;

    sigmon::event_loop::run()
}

fn crash(fault: Fault) -> Result<()> {
    log::info!("triggering {:?}", fault.signal());
    match fault {
        Fault::Segv => unsafe { (INVALID_ADDRESS as *mut u32).write_volatile(0) },
        Fault::Abort => std::process::abort(),
        _ => raise(fault.signal())?,
    }
    anyhow::bail!("{fault:?} did not terminate the process")
}
