//! System-call layer
//!
//! The `int 0x80` gate (DPL=3) lands every syscall in [`dispatch`] with
//! the full trap frame. Entry switches to the kernel directory and saves
//! the caller's frame into its task; the handler's result lands in
//! `frame.eax`; exit restores the caller's directory before the stub
//! `iretd`s back. Arguments travel in EBX/ECX/EDX.
//!
//! | id  | name     | ebx    | ecx  | edx   |
//! |-----|----------|--------|------|-------|
//! | 1   | exit     | status |      |       |
//! | 3   | read     | fd     | buf  | count |
//! | 4   | write    | fd     | buf  | count |
//! | 5   | open     | path   | flags|       |
//! | 6   | close    | fd     |      |       |
//! | 141 | getdents | fd     | buf  | count |

pub mod fs;
pub mod process;
pub mod usercopy;

use crate::arch::x86::context::TrapFrame;

/// Returned for unknown syscall numbers.
pub const ENOSYS: i32 = 38;

/// Syscall numbers (part of the user ABI).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Exit = 1,
    Read = 3,
    Write = 4,
    Open = 5,
    Close = 6,
    GetDents = 141,
}

impl TryFrom<u32> for Syscall {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Syscall::Exit),
            3 => Ok(Syscall::Read),
            4 => Ok(Syscall::Write),
            5 => Ok(Syscall::Open),
            6 => Ok(Syscall::Close),
            141 => Ok(Syscall::GetDents),
            _ => Err(()),
        }
    }
}

impl Syscall {
    pub const fn name(self) -> &'static str {
        match self {
            Syscall::Exit => "exit",
            Syscall::Read => "read",
            Syscall::Write => "write",
            Syscall::Open => "open",
            Syscall::Close => "close",
            Syscall::GetDents => "getdents",
        }
    }
}

/// Kernel-side entry for vector 0x80.
pub fn dispatch(frame: &mut TrapFrame) {
    // The handler body runs on the kernel address space and segments;
    // the entry stub already loaded the kernel data segment.
    crate::mm::restore_kernel_dir();

    if let Some(current) = crate::process::current_task() {
        crate::process::with_tasks(|tasks| {
            if let Some(task) = tasks.get_mut(current.0) {
                task.save_frame(frame);
            }
        });
    }

    let result = match Syscall::try_from(frame.eax) {
        Ok(Syscall::Exit) => process::sys_exit(frame),
        Ok(Syscall::Read) => fs::sys_read(frame),
        Ok(Syscall::Write) => fs::sys_write(frame),
        Ok(Syscall::Open) => fs::sys_open(frame),
        Ok(Syscall::Close) => fs::sys_close(frame),
        Ok(Syscall::GetDents) => fs::sys_getdents(frame),
        Err(()) => {
            log::warn!("syscall: unknown id {}", frame.eax);
            -ENOSYS
        }
    };
    frame.eax = result as u32;

    // Back to the caller's address space for the return path.
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    restore_caller_dir();
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn restore_caller_dir() {
    let dir_phys = crate::process::current_task()
        .and_then(|task| {
            crate::process::with_tasks(|tasks| tasks.get(task.0).map(|task| task.process))
        })
        .and_then(|pid| {
            crate::process::with_processes(|processes| {
                processes.get(pid.0).and_then(|process| process.page_dir_phys)
            })
        });
    if let Some(phys) = dir_phys {
        // SAFETY: process directories share the kernel half.
        unsafe { crate::arch::x86::load_cr3(phys) };
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::process::TEST_LOCK;

    fn frame_with(eax: u32, ebx: u32, ecx: u32, edx: u32) -> TrapFrame {
        // SAFETY: TrapFrame is plain-old-data; all-zero is valid.
        let mut frame: TrapFrame = unsafe { core::mem::zeroed() };
        frame.vector = 0x80;
        frame.eax = eax;
        frame.ebx = ebx;
        frame.ecx = ecx;
        frame.edx = edx;
        frame
    }

    #[test]
    fn unknown_ids_return_minus_enosys() {
        let _guard = TEST_LOCK.lock();
        crate::process::init();
        let mut frame = frame_with(9999, 0, 0, 0);
        dispatch(&mut frame);
        assert_eq!(frame.eax as i32, -ENOSYS);
    }

    #[test]
    fn numbers_round_trip_through_the_enum() {
        for (id, syscall) in [
            (1u32, Syscall::Exit),
            (3, Syscall::Read),
            (4, Syscall::Write),
            (5, Syscall::Open),
            (6, Syscall::Close),
            (141, Syscall::GetDents),
        ] {
            assert_eq!(Syscall::try_from(id), Ok(syscall));
            assert_eq!(syscall as u32, id);
        }
        assert!(Syscall::try_from(2).is_err());
        assert!(Syscall::try_from(0).is_err());
    }

    #[test]
    fn kernel_pointers_are_rejected_with_efault() {
        let _guard = TEST_LOCK.lock();
        crate::process::init();
        // write(1, kernel_ptr, 4)
        let mut frame = frame_with(4, 1, 0xC010_0000, 4);
        dispatch(&mut frame);
        assert_eq!(frame.eax as i32, KernelError::BadAddress.sysret());
        // read(3, kernel_ptr, 4)
        let mut frame = frame_with(3, 3, 0xC010_0000, 4);
        dispatch(&mut frame);
        assert_eq!(frame.eax as i32, KernelError::BadAddress.sysret());
    }

    #[test]
    fn dispatch_preserves_the_return_context() {
        // Invariant: only EAX changes; EIP/CS/EFLAGS/ESP/SS survive.
        let _guard = TEST_LOCK.lock();
        crate::process::init();
        let mut frame = frame_with(9999, 1, 2, 3);
        frame.eip = 0x4000_1234;
        frame.cs = 0x1B;
        frame.eflags = 0x202;
        frame.user_esp = 0xBFFF_F000;
        frame.ss = 0x23;
        dispatch(&mut frame);
        assert_eq!(frame.eip, 0x4000_1234);
        assert_eq!(frame.cs, 0x1B);
        assert_eq!(frame.eflags, 0x202);
        assert_eq!(frame.user_esp, 0xBFFF_F000);
        assert_eq!(frame.ss, 0x23);
    }

    #[test]
    fn stdio_close_is_a_no_op() {
        let _guard = TEST_LOCK.lock();
        crate::process::init();
        for fd in 0..3 {
            let mut frame = frame_with(6, fd, 0, 0);
            dispatch(&mut frame);
            assert_eq!(frame.eax, 0);
        }
    }
}
