//! Raw descriptor I/O usable from a signal handler: fixed stack buffers,
//! single `write(2)` calls, no allocation.

use std::ffi::{c_char, CStr};
use std::fmt;
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::libc;

pub(crate) const LINE_BYTES: usize = 256;

const STDERR_FD: RawFd = 2;

/// A line assembled on the stack. Formatting past the end truncates.
pub(crate) struct LineBuf {
    buf: [u8; LINE_BYTES],
    len: usize,
}

impl LineBuf {
    pub(crate) const fn new() -> Self {
        LineBuf {
            buf: [0; LINE_BYTES],
            len: 0,
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub(crate) fn as_ptr(&self) -> *const c_char {
        self.buf.as_ptr().cast()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len == LINE_BYTES
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }

    pub(crate) fn push(&mut self, byte: u8) {
        if !self.is_full() {
            self.buf[self.len] = byte;
            self.len += 1;
        }
    }
}

impl fmt::Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = LINE_BYTES - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        if n < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

/// Writes `bytes` with a single `write(2)`; false unless all of it went out.
pub(crate) fn write_exact(fd: RawFd, bytes: &[u8]) -> bool {
    let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
    n >= 0 && n as usize == bytes.len()
}

/// Crash report sink. Every method returns `None` once output is short, so
/// callers can bail out with `?`.
pub(crate) struct Reporter {
    fd: RawFd,
}

impl Reporter {
    pub(crate) const fn new(fd: RawFd) -> Self {
        Reporter { fd }
    }

    pub(crate) const fn stderr() -> Self {
        Reporter::new(STDERR_FD)
    }

    pub(crate) fn bytes(&self, bytes: &[u8]) -> Option<()> {
        write_exact(self.fd, bytes).then_some(())
    }

    pub(crate) fn line(&self, args: fmt::Arguments<'_>) -> Option<()> {
        let mut line = LineBuf::new();
        let _ = fmt::Write::write_fmt(&mut line, args);
        self.bytes(line.as_bytes())
    }
}

/// Read-only descriptor closed on drop.
pub(crate) struct RawFile(RawFd);

impl RawFile {
    pub(crate) fn open(path: &CStr) -> Option<Self> {
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
        (fd >= 0).then_some(RawFile(fd))
    }

    /// Bytes read, zero at end of file or on error.
    pub(crate) fn read(&self, buf: &mut [u8]) -> usize {
        loop {
            let n = unsafe { libc::read(self.0, buf.as_mut_ptr().cast(), buf.len()) };
            if n >= 0 {
                return n as usize;
            }
            if Errno::last() != Errno::EINTR {
                return 0;
            }
        }
    }
}

impl Drop for RawFile {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}
