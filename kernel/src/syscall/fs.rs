//! File syscalls
//!
//! User descriptors 0/1/2 are the standard streams: reads on 0 come from
//! the calling process's keyboard buffer (blocking on
//! `WaitReason::Keyboard` when empty), writes on 1/2 go to the console
//! sink. Descriptors from 3 upward map onto the VFS table (`fd - 2`).

use crate::arch::x86::context::TrapFrame;
use crate::error::{sysret_from, KernelError};
use crate::fs::vfs::{NodeKind, OpenMode};
use crate::fs::VFS;
use crate::process::task::WaitReason;

use super::usercopy::{copy_from_user, copy_to_user, read_user_cstr, validate_user_range};

pub const STDIN: i32 = 0;
pub const STDOUT: i32 = 1;
pub const STDERR: i32 = 2;
/// First user descriptor backed by the VFS table.
pub const USER_FD_BASE: i32 = 3;

/// Directory-entry type codes reported by getdents.
pub const DT_DIR: u8 = 4;
pub const DT_REG: u8 = 8;

/// Fixed-layout dirent copied out by getdents: 8.3 name (NUL padded)
/// plus a type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct UserDirent {
    pub name: [u8; 13],
    pub kind: u8,
}

pub const USER_DIRENT_SIZE: usize = core::mem::size_of::<UserDirent>();

impl UserDirent {
    pub fn from_entry(entry: &crate::fs::VfsDirEntry) -> Self {
        let mut name = [0u8; 13];
        for (slot, byte) in name.iter_mut().zip(entry.name.bytes()) {
            *slot = byte;
        }
        Self {
            name,
            kind: match entry.kind {
                NodeKind::Dir => DT_DIR,
                NodeKind::File => DT_REG,
            },
        }
    }

    pub fn as_bytes(&self) -> [u8; USER_DIRENT_SIZE] {
        let mut out = [0u8; USER_DIRENT_SIZE];
        out[..13].copy_from_slice(&self.name);
        out[13] = self.kind;
        out
    }
}

fn vfs_fd(user_fd: i32) -> i32 {
    user_fd - (USER_FD_BASE - 1)
}

/// open(path, flags) -> fd.
pub fn sys_open(frame: &mut TrapFrame) -> i32 {
    let result = (|| {
        let path = read_user_cstr(frame.ebx)?;
        let mode = OpenMode::from_flags(frame.ecx)?;
        let fd = VFS.lock().open(&path, mode)?;
        Ok(fd as usize + (USER_FD_BASE - 1) as usize)
    })();
    sysret_from(result)
}

/// close(fd).
pub fn sys_close(frame: &mut TrapFrame) -> i32 {
    let fd = frame.ebx as i32;
    if (STDIN..USER_FD_BASE).contains(&fd) {
        return 0;
    }
    sysret_from(VFS.lock().close(vfs_fd(fd)).map(|()| 0))
}

/// write(fd, buf, count) -> bytes written.
pub fn sys_write(frame: &mut TrapFrame) -> i32 {
    let fd = frame.ebx as i32;
    let count = frame.edx;
    let result = (|| {
        let data = copy_from_user(frame.ecx, count)?;
        match fd {
            STDOUT | STDERR => {
                crate::serial::write_bytes(&data);
                Ok(data.len())
            }
            STDIN => Err(KernelError::BadDescriptor),
            _ => VFS.lock().write(vfs_fd(fd), &data),
        }
    })();
    sysret_from(result)
}

/// read(fd, buf, count) -> bytes read. Descriptor 0 drains the keyboard
/// buffer and blocks when it is empty.
pub fn sys_read(frame: &mut TrapFrame) -> i32 {
    let fd = frame.ebx as i32;
    let count = frame.edx;
    if fd == STDIN {
        return sys_read_keyboard(frame, count);
    }
    if fd < USER_FD_BASE {
        return KernelError::BadDescriptor.sysret();
    }
    let result = (|| {
        validate_user_range(frame.ecx, count)?;
        let mut buffer = alloc::vec![0u8; count as usize];
        let read = VFS.lock().read(vfs_fd(fd), &mut buffer)?;
        copy_to_user(frame.ecx, &buffer[..read])?;
        Ok(read)
    })();
    sysret_from(result)
}

/// The blocking stdin path. With no bytes buffered the task parks on the
/// keyboard wait queue and the syscall is restarted after wakeup by
/// backing the saved EIP up over the `int 0x80` instruction.
fn sys_read_keyboard(frame: &mut TrapFrame, count: u32) -> i32 {
    if count == 0 {
        return KernelError::InvalidArgument.sysret();
    }
    if let Err(err) = validate_user_range(frame.ecx, count) {
        return err.sysret();
    }

    // Pull freshly staged scancodes in before deciding to sleep.
    crate::drivers::keyboard::dispatch_pending();

    let mut bytes = alloc::vec::Vec::with_capacity(count as usize);
    while bytes.len() < count as usize {
        match crate::process::current_keyboard_pop() {
            Some(byte) => bytes.push(byte),
            None => break,
        }
    }

    if bytes.is_empty() {
        return block_and_restart(frame);
    }
    sysret_from(copy_to_user(frame.ecx, &bytes).map(|()| bytes.len()))
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn block_and_restart(frame: &mut TrapFrame) -> i32 {
    let _ = frame;
    if let Some(current) = crate::process::current_task() {
        crate::process::with_tasks(|tasks| {
            if let Some(task) = tasks.get_mut(current.0) {
                // Re-execute the `int 0x80` (two bytes) after wakeup.
                task.registers.eip -= 2;
            }
        });
        crate::sched::block_current(WaitReason::Keyboard);
        crate::sched::reschedule();
    }
    KernelError::BadDescriptor.sysret()
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn block_and_restart(_frame: &mut TrapFrame) -> i32 {
    // Hosted builds cannot context-switch; report the would-block state.
    let _ = WaitReason::Keyboard;
    KernelError::WouldBlock.sysret()
}

/// getdents(fd, buf, count): one fixed-size entry per call, 0 at the end
/// of the directory.
pub fn sys_getdents(frame: &mut TrapFrame) -> i32 {
    let fd = frame.ebx as i32;
    if fd < USER_FD_BASE {
        return KernelError::BadDescriptor.sysret();
    }
    if (frame.edx as usize) < USER_DIRENT_SIZE {
        return KernelError::InvalidArgument.sysret();
    }
    let result = (|| {
        validate_user_range(frame.ecx, USER_DIRENT_SIZE as u32)?;
        match VFS.lock().readdir(vfs_fd(fd))? {
            Some(entry) => {
                let dirent = UserDirent::from_entry(&entry);
                copy_to_user(frame.ecx, &dirent.as_bytes())?;
                Ok(USER_DIRENT_SIZE)
            }
            None => Ok(0),
        }
    })();
    sysret_from(result)
}
