//! Kernel error type
//!
//! One sum type covers every failure the kernel reports, replacing the
//! scattered integer codes the subsystems would otherwise invent. Syscalls
//! surface these as negative errno values in EAX; kernel-internal callers
//! propagate them through [`KResult`].

use core::fmt;

/// Kernel-wide result alias.
pub type KResult<T> = Result<T, KernelError>;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Operation not permitted.
    NotPermitted,
    /// No such file or directory.
    NotFound,
    /// Device I/O failure (ATA, stream).
    Io,
    /// Bad file descriptor.
    BadDescriptor,
    /// No free frames, no heap space or no descriptor slot.
    OutOfMemory,
    /// Argument validation failure.
    InvalidArgument,
    /// Too many open files.
    TooManyOpenFiles,
    /// Expected a directory.
    NotADirectory,
    /// Expected a file.
    IsADirectory,
    /// User pointer reaching into kernel space.
    BadAddress,
    /// Operation would block (reserved; blocking callers wait instead).
    WouldBlock,
}

impl KernelError {
    /// Classic errno value for this error.
    pub const fn errno(self) -> i32 {
        match self {
            KernelError::NotPermitted => 1,     // EPERM
            KernelError::NotFound => 2,         // ENOENT
            KernelError::Io => 5,               // EIO
            KernelError::BadDescriptor => 9,    // EBADF
            KernelError::WouldBlock => 11,      // EAGAIN
            KernelError::OutOfMemory => 12,     // ENOMEM
            KernelError::BadAddress => 14,      // EFAULT
            KernelError::NotADirectory => 20,   // ENOTDIR
            KernelError::IsADirectory => 21,    // EISDIR
            KernelError::InvalidArgument => 22, // EINVAL
            KernelError::TooManyOpenFiles => 24, // EMFILE
        }
    }

    /// Negative errno form, as stored into a syscall frame's EAX.
    pub const fn sysret(self) -> i32 {
        -self.errno()
    }

    /// Short symbolic name, for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            KernelError::NotPermitted => "EPERM",
            KernelError::NotFound => "ENOENT",
            KernelError::Io => "EIO",
            KernelError::BadDescriptor => "EBADF",
            KernelError::WouldBlock => "EAGAIN",
            KernelError::OutOfMemory => "ENOMEM",
            KernelError::BadAddress => "EFAULT",
            KernelError::NotADirectory => "ENOTDIR",
            KernelError::IsADirectory => "EISDIR",
            KernelError::InvalidArgument => "EINVAL",
            KernelError::TooManyOpenFiles => "EMFILE",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", self.name(), self.errno())
    }
}

/// Fold a `KResult<usize>` into the signed return convention used by the
/// syscall layer: payload on success, `-errno` on failure.
pub fn sysret_from(result: KResult<usize>) -> i32 {
    match result {
        Ok(value) => value as i32,
        Err(err) => err.sysret(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_match_the_classic_table() {
        assert_eq!(KernelError::NotPermitted.errno(), 1);
        assert_eq!(KernelError::NotFound.errno(), 2);
        assert_eq!(KernelError::Io.errno(), 5);
        assert_eq!(KernelError::BadDescriptor.errno(), 9);
        assert_eq!(KernelError::OutOfMemory.errno(), 12);
        assert_eq!(KernelError::BadAddress.errno(), 14);
        assert_eq!(KernelError::NotADirectory.errno(), 20);
        assert_eq!(KernelError::IsADirectory.errno(), 21);
        assert_eq!(KernelError::InvalidArgument.errno(), 22);
        assert_eq!(KernelError::TooManyOpenFiles.errno(), 24);
    }

    #[test]
    fn sysret_is_negative_errno() {
        assert_eq!(KernelError::NotFound.sysret(), -2);
        assert_eq!(sysret_from(Err(KernelError::BadDescriptor)), -9);
        assert_eq!(sysret_from(Ok(42)), 42);
    }
}
