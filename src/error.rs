//! Fatal machine exceptions and the errno newtype used on the syscall return path.
//!
//! The distinction matters: a [`MachineError`] always terminates the current
//! run (the syscall that raised it never returns to the guest), while an
//! [`Errno`] is a perfectly normal Linux ABI return value that gets folded
//! into `a0` and execution continues.

use thiserror::Error;

/// Fatal conditions that stop the guest. Mirrors the error kinds in the
/// syscall/memory design: out-of-memory, illegal page operations, and
/// explicit `EBREAK` traps are all unrecoverable for the current run.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MachineError {
    #[error("out of memory: page {page_no:#x} would exceed the {pages_total}-page budget")]
    OutOfMemory { page_no: u64, pages_total: u64 },

    #[error("illegal memory operation: {0}")]
    IllegalOperation(&'static str),

    #[error("unhandled syscall: {0}")]
    UnhandledSyscall(&'static str),

    #[error("guest address {addr:#x} is not mapped with the required permission")]
    Fault { addr: u64 },

    #[error("malformed ELF image: {0}")]
    InvalidElf(&'static str),

    #[error("malformed decoder cache image: {0}")]
    InvalidCacheImage(&'static str),
}

pub type Result<T> = core::result::Result<T, MachineError>;

/// A Linux `errno` value as returned to the guest in `a0`, i.e. already
/// negated (`-EBADF`, not `EBADF`). Never fatal: a syscall handler that
/// produces an `Errno` writes it into the guest's return register and the
/// interpreter loop continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i64);

impl Errno {
    pub const EPERM: Errno = Errno(-libc::EPERM as i64);
    pub const ENOENT: Errno = Errno(-libc::ENOENT as i64);
    pub const EBADF: Errno = Errno(-libc::EBADF as i64);
    pub const EINVAL: Errno = Errno(-libc::EINVAL as i64);
    pub const ENOMEM: Errno = Errno(-libc::ENOMEM as i64);
    pub const ENOSYS: Errno = Errno(-libc::ENOSYS as i64);
    pub const EFAULT: Errno = Errno(-libc::EFAULT as i64);

    /// Build an `Errno` from the current `errno` left by a failed libc call.
    pub fn from_last_os_error() -> Errno {
        Errno(-(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)) as i64)
    }

    pub fn as_a0(self) -> i64 {
        self.0
    }
}
