//! Process syscalls

use crate::arch::x86::context::TrapFrame;
use crate::process;

/// exit(status): detach the calling task; the last task of a process
/// tears the whole process down. The status byte is logged only — there
/// are no parent-wait semantics.
pub fn sys_exit(frame: &mut TrapFrame) -> i32 {
    let status = frame.ebx;
    log::info!("syscall: task exit with status {:#x}", status);
    if let Some(current) = process::current_task() {
        crate::sched::retire(current);
        process::task_exit(current);
        process::set_current_task(None);
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        crate::sched::reschedule();
    }
    status as i32
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::process::TEST_LOCK;

    fn noreturn() -> ! {
        unreachable!()
    }

    #[test]
    fn exit_of_the_last_task_destroys_the_process() {
        let _guard = TEST_LOCK.lock();
        process::init();
        crate::sched::init();
        let pid = process::kspawn("ONESHOT", noreturn).unwrap();
        let task = process::first_task(pid).unwrap();
        process::set_current_task(Some(task));

        // SAFETY: TrapFrame is plain-old-data; all-zero is valid.
        let mut frame: TrapFrame = unsafe { core::mem::zeroed() };
        frame.ebx = 0;
        sys_exit(&mut frame);

        assert!(process::with_processes(|processes| processes.get(pid.0).is_none()));
        assert_eq!(process::current_task(), None);
    }
}
