//! Best-effort stack walkers for the crash report.

use nix::libc;

#[cfg(not(all(target_arch = "arm", not(target_feature = "thumb-mode"))))]
use super::context::program_counter;
use super::io::Reporter;

pub(crate) trait StackUnwinder {
    /// Writes one line per frame of the interrupted thread. `None` once an
    /// output write comes up short.
    ///
    /// # Safety
    /// `context` must be the `ucontext_t` of the signal being handled.
    unsafe fn unwind(&self, out: &Reporter, context: *const libc::ucontext_t) -> Option<()>;
}

/// Library-assisted unwinding from the handler's own frame.
///
/// Output starts at the interrupted frame, found by matching the program
/// counter saved in the signal context. Without a context, or if no frame
/// matches, only the walker's own frames are skipped.
#[cfg(not(all(target_arch = "arm", not(target_feature = "thumb-mode"))))]
pub(crate) struct GenericUnwinder;

#[cfg(not(all(target_arch = "arm", not(target_feature = "thumb-mode"))))]
impl GenericUnwinder {
    const PRINTED_FRAMES: usize = 10;
    const WALKED_FRAMES: usize = 64;
    // the closure's caller inside the backtrace crate, and `unwind`
    const SKIPPED_FRAMES: usize = 2;
}

#[cfg(not(all(target_arch = "arm", not(target_feature = "thumb-mode"))))]
impl StackUnwinder for GenericUnwinder {
    unsafe fn unwind(&self, out: &Reporter, context: *const libc::ucontext_t) -> Option<()> {
        let mut ips = [0usize; Self::WALKED_FRAMES];
        let mut len = 0;
        // the synchronized variant takes a lock, which a crashing thread may hold
        backtrace::trace_unsynchronized(|frame| {
            ips[len] = frame.ip() as usize;
            len += 1;
            len < Self::WALKED_FRAMES
        });
        let frames = &ips[..len];

        let pc = if context.is_null() {
            0
        } else {
            program_counter(context)
        };
        let start = frames
            .iter()
            .position(|&ip| pc != 0 && ip == pc)
            .unwrap_or(Self::SKIPPED_FRAMES.min(len));

        for (index, &ip) in frames[start..].iter().take(Self::PRINTED_FRAMES).enumerate() {
            out.line(format_args!("#{index} : {:p}\n", ip as *const libc::c_void))?;
        }
        Some(())
    }
}

/// Walks the saved frame pointer / link register chain.
///
/// On ARM the frame pointer points at the saved LR, with the caller's frame
/// pointer in the word below it:
///
/// ```text
/// FP[0] -> LR[1]
///          FP[1] -> LR[2]
///                   FP[2] -> ...
/// ```
///
/// This is the ARM-mode (`r11`) layout. Thumb builds use the generic unwinder.
#[cfg(all(target_arch = "arm", not(target_feature = "thumb-mode")))]
pub(crate) struct FramePointerUnwinder;

#[cfg(all(target_arch = "arm", not(target_feature = "thumb-mode")))]
impl FramePointerUnwinder {
    const WINDOW_BYTES: usize = 1024 * 1024;
    const STACK_DUMP_WORDS: usize = 256;
}

#[cfg(all(target_arch = "arm", not(target_feature = "thumb-mode")))]
impl StackUnwinder for FramePointerUnwinder {
    unsafe fn unwind(&self, out: &Reporter, context: *const libc::ucontext_t) -> Option<()> {
        let mc = &(*context).uc_mcontext;

        let base: *const usize;
        core::arch::asm!("mov {}, r11", out(reg) base, options(nomem, nostack));
        let lowest = base as usize;
        let highest = lowest.saturating_add(Self::WINDOW_BYTES);

        let mut frame = base;
        let mut addr = mc.arm_pc as usize;
        let mut at_pc = true;
        loop {
            let kind = if at_pc { "PC" } else { "LR" };
            out.line(format_args!("{kind} at {addr:08x}\n"))?;

            if (frame as usize) < lowest || (frame as usize) > highest {
                break;
            }
            if at_pc {
                addr = mc.arm_lr as usize;
                frame = *frame.sub(1) as *const usize;
                at_pc = false;
            } else {
                let caller = *frame.sub(1) as *const usize;
                // caller frames live higher up a descending stack
                if caller <= frame {
                    break;
                }
                frame = caller;
                addr = *frame;
            }
        }

        out.line(format_args!(
            "r0  {:08x} r1  {:08x} r2  {:08x} r3  {:08x} r4  {:08x} r5  {:08x}\n",
            mc.arm_r0, mc.arm_r1, mc.arm_r2, mc.arm_r3, mc.arm_r4, mc.arm_r5
        ))?;
        out.line(format_args!(
            "r6  {:08x} r7  {:08x} r8  {:08x} r9  {:08x} r10 {:08x} cpsr {:08x}\n",
            mc.arm_r6, mc.arm_r7, mc.arm_r8, mc.arm_r9, mc.arm_r10, mc.arm_cpsr
        ))?;
        out.line(format_args!(
            "fp  {:08x} ip  {:08x} sp  {:08x} lr  {:08x} pc  {:08x}\n",
            mc.arm_fp, mc.arm_ip, mc.arm_sp, mc.arm_lr, mc.arm_pc
        ))?;
        out.line(format_args!(
            "STACK {:08x}, FRAME {:08x}\n",
            mc.arm_sp, mc.arm_fp
        ))?;

        let sp = mc.arm_sp as usize as *const u32;
        for row in (0..Self::STACK_DUMP_WORDS).step_by(8) {
            let words = sp.add(row);
            let w = |i: usize| words.add(i).read_volatile();
            out.line(format_args!(
                "{:08x}: {:08x} {:08x} {:08x} {:08x} {:08x} {:08x} {:08x} {:08x}\n",
                words as usize,
                w(0),
                w(1),
                w(2),
                w(3),
                w(4),
                w(5),
                w(6),
                w(7)
            ))?;
        }
        Some(())
    }
}

#[cfg(not(all(target_arch = "arm", not(target_feature = "thumb-mode"))))]
pub(crate) fn platform() -> impl StackUnwinder {
    GenericUnwinder
}

#[cfg(all(target_arch = "arm", not(target_feature = "thumb-mode")))]
pub(crate) fn platform() -> impl StackUnwinder {
    FramePointerUnwinder
}
