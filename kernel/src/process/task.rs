//! Tasks
//!
//! A task is a schedulable register image plus its stack extent, owned by
//! a process. The register layout is the one the context-switch stubs
//! restore from, so field order is part of the ABI with
//! `arch::x86::usermode`.

use crate::arch::x86::context::TrapFrame;
use crate::arch::x86::gdt::{
    KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, USER_CODE_SELECTOR, USER_DATA_SELECTOR,
};
use crate::process::table::SlotHandle;
use crate::process::ProcessId;

/// EFLAGS with IF set (user entry).
pub const EFLAGS_USER: u32 = 0x200;
/// EFLAGS with IF plus the always-set reserved bit (kernel threads).
pub const EFLAGS_KERNEL: u32 = 0x202;

/// Handle to a task slot in the global task arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub SlotHandle);

/// Saved register file. Field order matches the restore stubs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TaskRegisters {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl TaskRegisters {
    /// Ring-3 entry image: user selectors, IF set, empty registers.
    pub fn user_entry(entry_point: u32, stack_top: u32) -> Self {
        Self {
            eip: entry_point,
            eflags: EFLAGS_USER,
            esp: stack_top,
            ebp: stack_top,
            cs: USER_CODE_SELECTOR as u32,
            ss: USER_DATA_SELECTOR as u32,
            ..Self::default()
        }
    }

    /// Ring-0 entry image for kernel threads.
    pub fn kernel_entry(entry_point: u32, stack_top: u32) -> Self {
        Self {
            eip: entry_point,
            eflags: EFLAGS_KERNEL,
            esp: stack_top,
            ebp: stack_top,
            cs: KERNEL_CODE_SELECTOR as u32,
            ss: KERNEL_DATA_SELECTOR as u32,
            ..Self::default()
        }
    }
}

/// Scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Run,
    Block,
}

/// Why a task sits on the wait queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Keyboard,
    Io,
}

/// One task.
#[derive(Debug)]
pub struct Task {
    pub process: ProcessId,
    pub registers: TaskRegisters,
    pub state: TaskState,
    pub stack_top: u32,
    pub stack_bottom: u32,
    pub waiting_on: Option<WaitReason>,
}

impl Task {
    pub fn new(process: ProcessId, registers: TaskRegisters, stack_bottom: u32, stack_top: u32) -> Self {
        Self {
            process,
            registers,
            state: TaskState::Ready,
            stack_top,
            stack_bottom,
            waiting_on: None,
        }
    }

    /// Capture an interrupt frame as this task's resume state. For traps
    /// out of ring 0 the CPU pushed no SS:ESP, so the pre-trap stack
    /// pointer is reconstructed from the frame's own location.
    pub fn save_frame(&mut self, frame: &TrapFrame) {
        self.registers.edi = frame.edi;
        self.registers.esi = frame.esi;
        self.registers.ebp = frame.ebp;
        self.registers.ebx = frame.ebx;
        self.registers.edx = frame.edx;
        self.registers.ecx = frame.ecx;
        self.registers.eax = frame.eax;
        self.registers.eip = frame.eip;
        self.registers.cs = frame.cs;
        self.registers.eflags = frame.eflags;
        if frame.from_user_mode() {
            self.registers.esp = frame.user_esp;
            self.registers.ss = frame.ss;
        } else {
            self.registers.esp = &frame.user_esp as *const u32 as u32;
            self.registers.ss = KERNEL_DATA_SELECTOR as u32;
        }
    }

    pub fn block(&mut self, reason: WaitReason) {
        self.state = TaskState::Block;
        self.waiting_on = Some(reason);
    }

    pub fn unblock(&mut self) {
        if self.state == TaskState::Block {
            self.state = TaskState::Ready;
            self.waiting_on = None;
        }
    }
}
