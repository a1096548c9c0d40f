//! Machine context access for the interrupted thread.

use nix::libc;

/// Program counter at the time of the fault, 0 where unsupported.
///
/// # Safety
/// `context` must be the `ucontext_t` pointer handed to an `SA_SIGINFO`
/// handler.
#[cfg(target_arch = "x86_64")]
pub(crate) unsafe fn program_counter(context: *const libc::ucontext_t) -> usize {
    (*context).uc_mcontext.gregs[libc::REG_RIP as usize] as usize
}

#[cfg(target_arch = "x86")]
pub(crate) unsafe fn program_counter(context: *const libc::ucontext_t) -> usize {
    (*context).uc_mcontext.gregs[libc::REG_EIP as usize] as usize
}

#[cfg(target_arch = "arm")]
pub(crate) unsafe fn program_counter(context: *const libc::ucontext_t) -> usize {
    (*context).uc_mcontext.arm_pc as usize
}

#[cfg(target_arch = "aarch64")]
pub(crate) unsafe fn program_counter(context: *const libc::ucontext_t) -> usize {
    (*context).uc_mcontext.pc as usize
}

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "arm",
    target_arch = "aarch64"
)))]
pub(crate) unsafe fn program_counter(_context: *const libc::ucontext_t) -> usize {
    0
}
