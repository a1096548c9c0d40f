use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Output};

use nix::sys::signal::Signal;

fn sigmon(args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sigmon"));
    cmd.args(args)
        .env_remove("SIGNAL_SHOW_INFO")
        .env_remove("GDBSERVER_PORT")
        .env_remove("SIGMON_LOGLEVEL");
    cmd
}

fn run(cmd: &mut Command) -> (Output, String) {
    let output = cmd.output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    (output, stderr)
}

#[test]
fn test_segv_is_reported_then_terminates() {
    let (output, stderr) = run(&mut sigmon(&["crash", "segv"]));

    assert!(stderr.contains("PROCESS:"), "{stderr}");
    assert!(stderr.contains("SIGNAL: 11, ADDR 0x10, AT 0x"), "{stderr}");
    assert!(stderr.contains("ILLEGAL ADDRESS 0x10"), "{stderr}");
    assert!(stderr.contains("FRAMEWORK VERSION"), "{stderr}");
    assert!(stderr.contains("PROCESS COMMAND LINE"), "{stderr}");
    assert!(stderr.contains("crash segv"), "{stderr}");
    assert!(stderr.contains("PROCESS MAP"), "{stderr}");
    assert!(stderr.contains("BACKTRACE"), "{stderr}");
    assert!(stderr.contains("#0 : 0x"), "{stderr}");
    assert!(stderr.contains("DONE"), "{stderr}");

    assert!(!output.status.success());
    assert_eq!(output.status.signal(), Some(Signal::SIGSEGV as i32));
}

#[test]
fn test_abort_hides_fault_address() {
    let (output, stderr) = run(&mut sigmon(&["crash", "abort"]));

    assert!(stderr.contains("SIGNAL: 6, ADDR 0x0"), "{stderr}");
    assert!(stderr.contains("ABORT\n"), "{stderr}");
    assert!(stderr.contains("BACKTRACE"), "{stderr}");
    assert_eq!(output.status.signal(), Some(Signal::SIGABRT as i32));
}

#[test]
fn test_raised_fpe_is_reported_once() {
    let (output, stderr) = run(&mut sigmon(&["crash", "fpe"]));

    assert!(stderr.contains("FLOATING POINT EXCEPTION AT"), "{stderr}");
    assert_eq!(stderr.matches("PROCESS:").count(), 1, "{stderr}");
    assert_eq!(output.status.signal(), Some(Signal::SIGFPE as i32));
}

#[test]
fn test_disabled_reporter_uses_default_action() {
    for value in ["disable", "NO"] {
        let (output, stderr) = run(sigmon(&["crash", "segv"]).env("SIGNAL_SHOW_INFO", value));

        assert!(!stderr.contains("PROCESS:"), "{stderr}");
        assert!(!stderr.contains("BACKTRACE"), "{stderr}");
        assert_eq!(output.status.signal(), Some(Signal::SIGSEGV as i32));
    }
}

#[test]
fn test_bad_gdbserver_port_is_ignored() {
    let (output, stderr) = run(sigmon(&["crash", "ill"]).env("GDBSERVER_PORT", "not-a-port"));

    assert!(stderr.contains("ILLEGAL INSTRUCTION AT"), "{stderr}");
    assert!(stderr.contains("DONE"), "{stderr}");
    assert_eq!(output.status.signal(), Some(Signal::SIGILL as i32));
}
