//! Scheduling
//!
//! Round-robin over the ready queue with a separate wait queue keyed by
//! wake reason. The timer interrupt preempts through [`preempt`]; blocking
//! syscalls park the current task with [`block_current`] and the device
//! paths release it via [`wakeup`]. When the ready queue runs dry the
//! resident idle thread takes over.

pub mod scheduler;
pub mod wait;

use scheduler::RoundRobin;
use wait::WaitQueue;

use crate::arch::x86::context::TrapFrame;
use crate::process::task::{TaskId, TaskState, WaitReason};
use crate::process::{self};
use crate::sync::IrqLock;

static READY: IrqLock<RoundRobin> = IrqLock::new(RoundRobin::new());
static WAITING: IrqLock<WaitQueue> = IrqLock::new(WaitQueue::new());
static IDLE_TASK: IrqLock<Option<TaskId>> = IrqLock::new(None);

/// Reset scheduler state (bring-up and tests).
pub fn init() {
    READY.with(|ready| *ready = RoundRobin::new());
    WAITING.with(|waiting| *waiting = WaitQueue::new());
    IDLE_TASK.with(|idle| *idle = None);
}

/// Register the always-resident idle task.
pub fn set_idle(task: TaskId) {
    IDLE_TASK.with(|idle| *idle = Some(task));
}

pub fn idle_task() -> Option<TaskId> {
    IDLE_TASK.with(|idle| *idle)
}

/// Enqueue a task iff it is READY.
pub fn add(task: TaskId) {
    let ready = process::with_tasks(|tasks| {
        tasks
            .get(task.0)
            .map(|task| task.state == TaskState::Ready)
            .unwrap_or(false)
    });
    if ready {
        READY.with(|queue| {
            queue.enqueue(task);
        });
    }
}

/// Number of runnable tasks queued.
pub fn ready_len() -> usize {
    READY.with(|queue| queue.len())
}

/// Park the current task on the wait queue with `reason`. The caller is
/// responsible for rescheduling afterwards.
pub fn block_current(reason: WaitReason) -> Option<TaskId> {
    let current = process::current_task()?;
    process::with_tasks(|tasks| {
        if let Some(task) = tasks.get_mut(current.0) {
            task.block(reason);
        }
    });
    WAITING.with(|waiting| waiting.push(current, reason));
    Some(current)
}

/// Requeue every task blocked on `reason`.
pub fn wakeup(reason: WaitReason) {
    let woken: [Option<TaskId>; wait::WAIT_CAPACITY] = WAITING.with(|waiting| {
        let mut out = [None; wait::WAIT_CAPACITY];
        for (slot, task) in out.iter_mut().zip(waiting.take_matching(reason)) {
            *slot = Some(task);
        }
        out
    });
    for task in woken.into_iter().flatten() {
        process::with_tasks(|tasks| {
            if let Some(task) = tasks.get_mut(task.0) {
                task.unblock();
            }
        });
        add(task);
    }
}

/// Forget a task entirely (exit path).
pub fn retire(task: TaskId) {
    READY.with(|queue| queue.remove(task));
    WAITING.with(|waiting| waiting.remove(task));
}

/// Pick what runs next: the ready queue, or the idle thread when empty.
pub fn pick_next() -> Option<TaskId> {
    READY.with(|queue| queue.dequeue()).or_else(idle_task)
}

/// Timer-driven yield. Saves the interrupted context into the current
/// task, requeues it when it is still runnable, and switches to the next
/// task. Never returns: the switch ends in `iretd`.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn preempt(frame: &mut TrapFrame) -> ! {
    if let Some(current) = process::current_task() {
        process::with_tasks(|tasks| {
            if let Some(task) = tasks.get_mut(current.0) {
                task.save_frame(frame);
                if task.state == TaskState::Run {
                    task.state = TaskState::Ready;
                }
            }
        });
        add(current);
    }
    reschedule()
}

/// Dispatch-from-IRQ helper for hosted builds (tests never switch).
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn preempt(_frame: &mut TrapFrame) {}

/// Switch to the next runnable task. Never returns.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn reschedule() -> ! {
    use crate::arch::x86::{gdt, usermode};
    use crate::mm::layout::KERNEL_STACK_TOP;

    // Move staged keyboard bytes toward the foreground process before
    // handing the CPU away.
    crate::drivers::keyboard::dispatch_pending();

    let next = pick_next().expect("scheduler: no runnable task and no idle thread");
    let (registers, dir_phys) = process::with_tasks(|tasks| {
        let task = tasks.get_mut(next.0).expect("scheduler: stale task handle");
        task.state = TaskState::Run;
        let pid = task.process;
        let registers = task.registers;
        let dir = process::with_processes(|processes| {
            processes.get(pid.0).and_then(|process| process.page_dir_phys)
        });
        (registers, dir)
    });
    process::set_current_task(Some(next));

    // Ring-3 tasks re-enter the kernel on the shared ring-0 stack.
    gdt::set_kernel_stack(KERNEL_STACK_TOP);
    match dir_phys {
        // SAFETY: process directories share the kernel half, so the
        // switch cannot unmap the running code.
        Some(phys) => unsafe { crate::arch::x86::load_cr3(phys) },
        None => crate::mm::restore_kernel_dir(),
    }
    // SAFETY: the registers were seeded by task creation or captured
    // from a live trap frame.
    unsafe { usermode::enter_task(&registers) }
}

/// Log queue depths.
pub fn dump() {
    log::info!(
        "sched: {} ready, {} waiting, idle {}",
        READY.with(|queue| queue.len()),
        WAITING.with(|waiting| waiting.len()),
        if idle_task().is_some() { "armed" } else { "missing" }
    );
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::process::{kspawn, with_tasks};
    use crate::process::TEST_LOCK as TEST_GUARD;

    fn noreturn() -> ! {
        unreachable!()
    }

    fn spawn_task(name: &str) -> TaskId {
        let pid = kspawn(name, noreturn).unwrap();
        crate::process::first_task(pid).unwrap()
    }

    #[test]
    fn add_only_accepts_ready_tasks() {
        let _guard = TEST_GUARD.lock();
        process::init();
        init();
        let task = spawn_task("T1");
        add(task);
        assert_eq!(ready_len(), 1);
        // Mark RUN and try again: rejected.
        with_tasks(|tasks| tasks.get_mut(task.0).unwrap().state = TaskState::Run);
        READY.with(|queue| {
            queue.dequeue();
        });
        add(task);
        assert_eq!(ready_len(), 0);
    }

    #[test]
    fn pick_next_falls_back_to_idle() {
        let _guard = TEST_GUARD.lock();
        process::init();
        init();
        let idle = spawn_task("IDLE");
        set_idle(idle);
        assert_eq!(pick_next(), Some(idle));
        let worker = spawn_task("W");
        add(worker);
        assert_eq!(pick_next(), Some(worker));
    }

    #[test]
    fn blocking_read_state_machine() {
        // The S5 walk: READY -> BLOCK on the keyboard, wake on byte
        // arrival, back to READY in the ready queue.
        let _guard = TEST_GUARD.lock();
        process::init();
        init();
        let task = spawn_task("SHELL");
        process::set_current_task(Some(task));

        let blocked = block_current(WaitReason::Keyboard);
        assert_eq!(blocked, Some(task));
        with_tasks(|tasks| {
            assert_eq!(tasks.get(task.0).unwrap().state, TaskState::Block);
        });
        assert_eq!(ready_len(), 0);

        // Wrong reason leaves it parked.
        wakeup(WaitReason::Io);
        assert_eq!(ready_len(), 0);

        wakeup(WaitReason::Keyboard);
        with_tasks(|tasks| {
            assert_eq!(tasks.get(task.0).unwrap().state, TaskState::Ready);
            assert_eq!(tasks.get(task.0).unwrap().waiting_on, None);
        });
        assert_eq!(ready_len(), 1);
        assert_eq!(pick_next(), Some(task));
    }

    #[test]
    fn retire_clears_both_queues() {
        let _guard = TEST_GUARD.lock();
        process::init();
        init();
        let task = spawn_task("DOOMED");
        add(task);
        retire(task);
        assert_eq!(ready_len(), 0);
        process::set_current_task(Some(task));
        block_current(WaitReason::Io);
        retire(task);
        wakeup(WaitReason::Io);
        assert_eq!(ready_len(), 0);
    }
}
