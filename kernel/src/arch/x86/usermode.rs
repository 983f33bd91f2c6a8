//! Register-restore stubs for entering a task
//!
//! `task_enter_user` builds the five-word `iret` frame from a saved
//! [`TaskRegisters`](crate::process::task::TaskRegisters) image and drops
//! to ring 3. `task_enter_kernel` performs the ring-0 variant, where
//! `iret` does not pop SS:ESP, by switching to the target stack first.
//! Both never return; the next kernel entry is an interrupt or syscall.

#[cfg(all(target_arch = "x86", target_os = "none"))]
core::arch::global_asm!(
    r#"
.section .text

// fn(regs: *const TaskRegisters) -> !
// TaskRegisters layout: edi esi ebp ebx edx ecx eax eip cs eflags esp ss.
.global task_enter_user
task_enter_user:
    movl 4(%esp), %eax

    // User data segments; CS/SS come from the iret frame.
    movl 44(%eax), %ecx
    movw %cx, %ds
    movw %cx, %es
    movw %cx, %fs
    movw %cx, %gs

    pushl 44(%eax)          // ss
    pushl 40(%eax)          // esp
    pushl 36(%eax)          // eflags
    pushl 32(%eax)          // cs
    pushl 28(%eax)          // eip

    movl 0(%eax), %edi
    movl 4(%eax), %esi
    movl 8(%eax), %ebp
    movl 12(%eax), %ebx
    movl 16(%eax), %edx
    movl 20(%eax), %ecx
    movl 24(%eax), %eax
    iret

.global task_enter_kernel
task_enter_kernel:
    movl 4(%esp), %eax

    // Move onto the task's stack and synthesize the three-word frame.
    movl 40(%eax), %ecx
    subl $12, %ecx
    movl 36(%eax), %edx
    movl %edx, 8(%ecx)      // eflags
    movl 32(%eax), %edx
    movl %edx, 4(%ecx)      // cs
    movl 28(%eax), %edx
    movl %edx, 0(%ecx)      // eip
    movl %ecx, %esp

    movl 0(%eax), %edi
    movl 4(%eax), %esi
    movl 8(%eax), %ebp
    movl 12(%eax), %ebx
    movl 16(%eax), %edx
    movl 20(%eax), %ecx
    movl 24(%eax), %eax
    iret
"#,
    options(att_syntax)
);

#[cfg(all(target_arch = "x86", target_os = "none"))]
extern "C" {
    fn task_enter_user(regs: *const crate::process::task::TaskRegisters) -> !;
    fn task_enter_kernel(regs: *const crate::process::task::TaskRegisters) -> !;
}

/// Restore a saved register image and resume the task it belongs to.
///
/// # Safety
///
/// `regs` must describe a runnable context: a mapped EIP/ESP in the
/// address space currently loaded in CR3 and selector values built by
/// task creation.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub unsafe fn enter_task(regs: &crate::process::task::TaskRegisters) -> ! {
    if regs.cs & 0x3 == 0x3 {
        // SAFETY: forwarded caller contract; the stub consumes the image.
        unsafe { task_enter_user(regs) }
    } else {
        // SAFETY: as above, for the ring-0 variant.
        unsafe { task_enter_kernel(regs) }
    }
}

/// Hosted stand-in; tests never context-switch.
///
/// # Safety
///
/// Never returns normally; see the bare-metal variant for the contract.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub unsafe fn enter_task(_regs: &crate::process::task::TaskRegisters) -> ! {
    unimplemented!("task entry is only available on bare-metal x86")
}
