//! Crash reporter for program-error signals.
//!
//! Installs a one-shot `sigaction` handler for `SIGSEGV`, `SIGBUS`, `SIGILL`,
//! `SIGFPE` and `SIGABRT`. When one fires, the handler writes a report to
//! stderr using only raw descriptor I/O (process and thread ids, fault
//! address and program counter, version, command line, memory map,
//! backtrace), optionally attaches `gdbserver`, then re-raises the signal so
//! the default disposition terminates the process.
//!
//! The handler never allocates, locks or uses buffered I/O. Any short write
//! abandons the rest of the report and re-raises immediately.

mod config;
mod context;
mod io;
mod unwind;

use std::ffi::{c_char, c_int, c_void, CStr};
use std::fmt::Write;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU16, AtomicU8, Ordering};

use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

pub use config::{
    CrashReporterConfig, DEFAULT_VERSION_FILE, ENV_GDBSERVER_PORT, ENV_SIGNAL_SHOW_INFO,
};

use io::{LineBuf, RawFile, Reporter, LINE_BYTES};
use unwind::StackUnwinder;

/// Signals the crash reporter takes over.
pub const FATAL_SIGNALS: [Signal; 5] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGABRT,
];

const CMDLINE_FILE: &CStr = c"/proc/self/cmdline";
const MAPS_FILE: &CStr = c"/proc/self/maps";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashReporterState {
    Uninstalled,
    Installed,
    /// A fatal signal has been reported; later ones get the default action.
    Fired,
}

const UNINSTALLED: u8 = 0;
const INSTALLED: u8 = 1;
const FIRED: u8 = 2;

static STATE: AtomicU8 = AtomicU8::new(UNINSTALLED);
static DEBUG_SERVER_PORT: AtomicU16 = AtomicU16::new(0);
static VERSION_FILE: AtomicPtr<c_char> = AtomicPtr::new(DEFAULT_VERSION_FILE.as_ptr().cast_mut());

pub fn state() -> CrashReporterState {
    match STATE.load(Ordering::SeqCst) {
        UNINSTALLED => CrashReporterState::Uninstalled,
        INSTALLED => CrashReporterState::Installed,
        _ => CrashReporterState::Fired,
    }
}

/// Install the crash report handler for every signal in [`FATAL_SIGNALS`].
///
/// Failures are logged per signal and otherwise ignored, so coverage may be
/// partial. Calling it again re-installs the handlers with the new settings.
pub fn install_show_stack_handler(config: &CrashReporterConfig) {
    if config.disabled {
        log::warn!("Handle of SEGV/ILL/BUS/FPE/ABRT and show information disabled");
        return;
    }

    DEBUG_SERVER_PORT.store(config.debug_server_port.unwrap_or(0), Ordering::SeqCst);
    VERSION_FILE.store(config.version_file.as_ptr().cast_mut(), Ordering::SeqCst);
    if STATE.load(Ordering::SeqCst) == UNINSTALLED {
        STATE.store(INSTALLED, Ordering::SeqCst);
    }

    let action = SigAction::new(
        SigHandler::SigAction(show_stack_handler),
        SaFlags::SA_RESETHAND | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    for signal in FATAL_SIGNALS {
        if let Err(err) = unsafe { sigaction(signal, &action) } {
            log::error!("Unable to install signal handler for {signal}: {err}");
        }
    }
    log::debug!(
        "crash reporter installed, debug server port {:?}",
        config.debug_server_port
    );
}

extern "C" fn show_stack_handler(signo: c_int, info: *mut libc::siginfo_t, context: *mut c_void) {
    if STATE.swap(FIRED, Ordering::SeqCst) != FIRED {
        let _ = unsafe { report(&Reporter::stderr(), signo, info, context.cast()) };
    } else {
        // another fatal signal kind still routed here while a report is running
        unsafe { libc::signal(signo, libc::SIG_DFL) };
    }
    unsafe { libc::raise(signo) };
}

unsafe fn report(
    out: &Reporter,
    signo: c_int,
    info: *const libc::siginfo_t,
    context: *const libc::ucontext_t,
) -> Option<()> {
    let pid = libc::getpid();
    let tid = libc::syscall(libc::SYS_gettid);
    out.line(format_args!("PROCESS: {pid}, TID {tid}\n"))?;

    let fault_addr: *const c_void = if info.is_null() {
        ptr::null()
    } else {
        (*info).si_addr()
    };
    let shown_addr = if signo == libc::SIGABRT {
        ptr::null()
    } else {
        fault_addr
    };
    let pc = if context.is_null() {
        0
    } else {
        context::program_counter(context)
    };
    out.line(format_args!(
        "SIGNAL: {signo}, ADDR {shown_addr:p}, AT {:p}\n",
        pc as *const c_void
    ))?;
    explain(out, signo, fault_addr)?;

    let version_file = CStr::from_ptr(VERSION_FILE.load(Ordering::SeqCst));
    show_version(out, version_file)?;
    show_command_line(out, CMDLINE_FILE)?;
    show_memory_map(out, MAPS_FILE)?;

    out.line(format_args!("BACKTRACE\n"))?;
    unwind::platform().unwind(out, context)?;
    out.line(format_args!("DONE\n"))?;

    let port = DEBUG_SERVER_PORT.load(Ordering::SeqCst);
    if port != 0 {
        attach_debug_server(port);
    }
    Some(())
}

fn explain(out: &Reporter, signo: c_int, addr: *const c_void) -> Option<()> {
    match signo {
        libc::SIGSEGV => out.line(format_args!("ILLEGAL ADDRESS {addr:p}\n")),
        libc::SIGFPE => out.line(format_args!("FLOATING POINT EXCEPTION AT {addr:p}\n")),
        libc::SIGTRAP => out.line(format_args!("TRAP AT {addr:p}\n")),
        libc::SIGABRT => out.line(format_args!("ABORT\n")),
        libc::SIGILL => out.line(format_args!("ILLEGAL INSTRUCTION AT {addr:p}\n")),
        libc::SIGBUS => out.line(format_args!("BUS ERROR AT {addr:p}\n")),
        _ => out.line(format_args!("UNEXPECTED SIGNAL {signo}\n")),
    }
}

fn show_version(out: &Reporter, path: &CStr) -> Option<()> {
    out.bytes(b"FRAMEWORK VERSION\n")?;
    let mut buf = [0u8; LINE_BYTES];
    let n = RawFile::open(path).map_or(0, |file| file.read(&mut buf));
    if n > 0 {
        out.bytes(&buf[..n])?;
        out.bytes(b"\n")
    } else {
        out.bytes(b"Cannot read framework version\n")
    }
}

fn show_command_line(out: &Reporter, path: &CStr) -> Option<()> {
    out.bytes(b"PROCESS COMMAND LINE\n")?;
    let Some(file) = RawFile::open(path) else {
        return Some(());
    };
    let mut buf = [0u8; LINE_BYTES];
    loop {
        let n = file.read(&mut buf);
        if n == 0 {
            break;
        }
        for byte in &mut buf[..n] {
            if *byte == 0 {
                *byte = b' ';
            }
        }
        out.bytes(&buf[..n])?;
    }
    out.bytes(b"\n")
}

fn show_memory_map(out: &Reporter, path: &CStr) -> Option<()> {
    out.bytes(b"PROCESS MAP\n")?;
    let Some(file) = RawFile::open(path) else {
        return Some(());
    };
    let mut line = LineBuf::new();
    let mut byte = [0u8; 1];
    while file.read(&mut byte) == 1 {
        line.push(byte[0]);
        if byte[0] == b'\n' || line.is_full() {
            out.bytes(line.as_bytes())?;
            line.clear();
        }
    }
    if !line.is_empty() {
        out.bytes(line.as_bytes())?;
    }
    Some(())
}

/// Fork a `gdbserver` attached to this process and wait for it to exit.
fn attach_debug_server(port: u16) {
    let mut port_arg = LineBuf::new();
    let mut pid_arg = LineBuf::new();
    let _ = write!(port_arg, ":{port}\0");
    let _ = write!(pid_arg, "{}\0", unsafe { libc::getpid() });
    let argv: [*const c_char; 5] = [
        c"gdbserver".as_ptr(),
        port_arg.as_ptr(),
        c"--attach".as_ptr(),
        pid_arg.as_ptr(),
        ptr::null(),
    ];

    match unsafe { libc::fork() } {
        0 => unsafe {
            libc::execvp(argv[0], argv.as_ptr());
            libc::_exit(127)
        },
        -1 => {}
        child => {
            let mut status = 0;
            unsafe { libc::waitpid(child, &mut status, 0) };
        }
    }
}
