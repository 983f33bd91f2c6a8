//! User-buffer copying
//!
//! Syscalls never touch user memory in place: the buffer is staged
//! through a kernel-heap copy, with the CR3 switched to the caller's
//! directory only for the transfer itself. Pointers reaching into the
//! kernel half are rejected with `EFAULT` before any switch happens.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{KResult, KernelError};
use crate::mm::layout::KERNEL_VIRTUAL_START;

/// Upper bound for user-supplied path strings.
pub const USER_PATH_MAX: u32 = 256;

/// Validate that `[ptr, ptr + len)` lies entirely in user space.
pub fn validate_user_range(ptr: u32, len: u32) -> KResult<()> {
    if ptr == 0 {
        return Err(KernelError::BadAddress);
    }
    let end = ptr.checked_add(len).ok_or(KernelError::BadAddress)?;
    if ptr >= KERNEL_VIRTUAL_START || end > KERNEL_VIRTUAL_START {
        return Err(KernelError::BadAddress);
    }
    Ok(())
}

/// Run `f` with the current process's directory loaded.
#[cfg(all(target_arch = "x86", target_os = "none"))]
fn with_user_dir<R>(f: impl FnOnce() -> R) -> KResult<R> {
    let current = crate::process::current_task().ok_or(KernelError::BadAddress)?;
    let dir_phys = crate::process::with_tasks(|tasks| {
        tasks.get(current.0).map(|task| task.process)
    })
    .and_then(|pid| {
        crate::process::with_processes(|processes| {
            processes.get(pid.0).and_then(|process| process.page_dir_phys)
        })
    });
    // Kernel threads already see the kernel directory.
    let result = match dir_phys {
        Some(phys) => {
            // SAFETY: process directories share the kernel half.
            unsafe { crate::arch::x86::load_cr3(phys) };
            let result = f();
            crate::mm::restore_kernel_dir();
            result
        }
        None => f(),
    };
    Ok(result)
}

/// Copy `len` bytes from user space into a kernel buffer (one spare byte
/// for NUL termination).
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn copy_from_user(ptr: u32, len: u32) -> KResult<Vec<u8>> {
    validate_user_range(ptr, len)?;
    let mut buffer = alloc::vec![0u8; len as usize + 1];
    with_user_dir(|| {
        // SAFETY: the range was validated against the kernel boundary and
        // the caller's directory is active.
        unsafe {
            core::ptr::copy_nonoverlapping(ptr as *const u8, buffer.as_mut_ptr(), len as usize);
        }
    })?;
    buffer.truncate(len as usize);
    Ok(buffer)
}

/// Copy a kernel buffer out to user space.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn copy_to_user(ptr: u32, data: &[u8]) -> KResult<()> {
    validate_user_range(ptr, data.len() as u32)?;
    with_user_dir(|| {
        // SAFETY: as in copy_from_user, in the other direction.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
        }
    })
}

/// Read a NUL-terminated user string of at most [`USER_PATH_MAX`] bytes.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn read_user_cstr(ptr: u32) -> KResult<String> {
    let raw = copy_from_user(ptr, USER_PATH_MAX)?;
    let end = raw.iter().position(|byte| *byte == 0).unwrap_or(raw.len());
    core::str::from_utf8(&raw[..end])
        .map(String::from)
        .map_err(|_| KernelError::InvalidArgument)
}

// Hosted stand-ins: validation still runs, transfers cannot.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn copy_from_user(ptr: u32, len: u32) -> KResult<Vec<u8>> {
    validate_user_range(ptr, len)?;
    Err(KernelError::BadAddress)
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn copy_to_user(ptr: u32, data: &[u8]) -> KResult<()> {
    validate_user_range(ptr, data.len() as u32)?;
    Err(KernelError::BadAddress)
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn read_user_cstr(ptr: u32) -> KResult<String> {
    validate_user_range(ptr, USER_PATH_MAX)?;
    Err(KernelError::BadAddress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_range_validation() {
        assert!(validate_user_range(0x1000, 64).is_ok());
        assert!(validate_user_range(0xBFFF_FF00, 0x100).is_ok());
        // Null pointer.
        assert_eq!(
            validate_user_range(0, 1).unwrap_err(),
            KernelError::BadAddress
        );
        // Pointer in kernel space.
        assert_eq!(
            validate_user_range(0xC000_0000, 1).unwrap_err(),
            KernelError::BadAddress
        );
        assert_eq!(
            validate_user_range(0xC010_0000, 4).unwrap_err(),
            KernelError::BadAddress
        );
        // Range leaking across the boundary.
        assert_eq!(
            validate_user_range(0xBFFF_FFFF, 2).unwrap_err(),
            KernelError::BadAddress
        );
        // Wrapping range.
        assert_eq!(
            validate_user_range(0xFFFF_FFF0, 0x20).unwrap_err(),
            KernelError::BadAddress
        );
    }
}
