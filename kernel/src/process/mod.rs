//! Processes
//!
//! A process owns an address space, up to [`MAX_TASKS_PER_PROCESS`]
//! tasks, and a keyboard buffer fed by the foreground dispatch path.
//! Kernel threads reuse the kernel page directory; user processes get a
//! fresh directory with the kernel half shared by reference. Processes
//! and tasks live in generation-counted arenas (`table`), and the last
//! task exiting tears the process down, returning every lower-half frame
//! to the frame allocator.

pub mod table;
pub mod task;

use alloc::string::String;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicU16, Ordering};

use table::{SlotArena, SlotHandle};
use task::{Task, TaskId, TaskRegisters, TaskState};

use crate::ds::Fifo;
use crate::error::{KResult, KernelError};
use crate::mm::layout::{KERNEL_VIRTUAL_START, USER_STACK_SIZE};
use crate::sync::IrqLock;

/// Tasks per process.
pub const MAX_TASKS_PER_PROCESS: usize = 16;
/// Process arena capacity.
pub const MAX_PROCESSES: usize = 32;
/// Task arena capacity.
pub const MAX_TASKS: usize = MAX_PROCESSES * 4;
/// Kernel-thread stack size.
pub const KERNEL_TASK_STACK_SIZE: usize = 4096;

/// Handle to a process slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessId(pub SlotHandle);

/// How the process image got here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessImage {
    /// Flat binary loaded from the filesystem.
    Binary,
    /// Kernel thread running in the kernel address space.
    KernelThread,
}

/// One process.
pub struct Process {
    pub pid: u16,
    pub filename: String,
    pub tasks: Vec<TaskId>,
    /// Physical address of the process page directory; `None` for kernel
    /// threads (they run on the kernel directory).
    pub page_dir_phys: Option<u32>,
    pub image: ProcessImage,
    /// Loaded image size in bytes.
    pub size: u32,
    /// Bytes dispatched from the global keyboard FIFO when foreground.
    pub keyboard_buffer: Fifo<128>,
    pub arguments: Vec<String>,
}

impl Process {
    fn new(pid: u16, filename: &str, image: ProcessImage) -> Self {
        Self {
            pid,
            filename: String::from(filename),
            tasks: Vec::new(),
            page_dir_phys: None,
            image,
            size: 0,
            keyboard_buffer: Fifo::new(),
            arguments: Vec::new(),
        }
    }
}

/// Global process arena.
pub static PROCESSES: IrqLock<Option<SlotArena<Process>>> = IrqLock::new(None);
/// Global task arena.
pub static TASKS: IrqLock<Option<SlotArena<Task>>> = IrqLock::new(None);
/// Currently running task.
static CURRENT_TASK: IrqLock<Option<TaskId>> = IrqLock::new(None);
/// Foreground process receiving keyboard bytes.
static FOREGROUND: IrqLock<Option<ProcessId>> = IrqLock::new(None);

static NEXT_PID: AtomicU16 = AtomicU16::new(1);

/// The arenas are global; tests that reset them take this lock.
#[cfg(all(test, not(target_os = "none")))]
pub(crate) static TEST_LOCK: spin::Mutex<()> = spin::Mutex::new(());

/// Allocate the arenas. Called once during bring-up (and per test).
pub fn init() {
    PROCESSES.with(|slot| *slot = Some(SlotArena::with_capacity(MAX_PROCESSES)));
    TASKS.with(|slot| *slot = Some(SlotArena::with_capacity(MAX_TASKS)));
    CURRENT_TASK.with(|current| *current = None);
    FOREGROUND.with(|foreground| *foreground = None);
}

/// Run `f` on the process arena.
pub fn with_processes<R>(f: impl FnOnce(&mut SlotArena<Process>) -> R) -> R {
    PROCESSES.with(|slot| f(slot.as_mut().expect("process table not initialized")))
}

/// Run `f` on the task arena.
pub fn with_tasks<R>(f: impl FnOnce(&mut SlotArena<Task>) -> R) -> R {
    TASKS.with(|slot| f(slot.as_mut().expect("task table not initialized")))
}

pub fn current_task() -> Option<TaskId> {
    CURRENT_TASK.with(|current| *current)
}

pub fn set_current_task(task: Option<TaskId>) {
    CURRENT_TASK.with(|current| *current = task);
}

/// Make `pid` the foreground process (keyboard byte sink).
pub fn set_foreground(pid: ProcessId) {
    FOREGROUND.with(|foreground| *foreground = Some(pid));
}

pub fn foreground() -> Option<ProcessId> {
    FOREGROUND.with(|foreground| *foreground)
}

/// Push one decoded byte into the foreground process's keyboard buffer.
/// Returns false when there is no foreground process or its buffer is
/// full.
pub fn foreground_push(byte: u8) -> bool {
    let Some(pid) = foreground() else {
        return false;
    };
    with_processes(|processes| {
        processes
            .get_mut(pid.0)
            .map(|process| process.keyboard_buffer.enqueue(byte))
            .unwrap_or(false)
    })
}

/// Pop one byte from the current task's process keyboard buffer.
pub fn current_keyboard_pop() -> Option<u8> {
    let task = current_task()?;
    let pid = with_tasks(|tasks| tasks.get(task.0).map(|task| task.process))?;
    with_processes(|processes| {
        processes
            .get_mut(pid.0)
            .and_then(|process| process.keyboard_buffer.dequeue())
    })
}

/// Per-task user stack slice: slices grow down from the top of the user
/// address space.
pub fn stack_slice_for(task_index: usize) -> (u32, u32) {
    let slice = USER_STACK_SIZE / MAX_TASKS_PER_PROCESS as u32;
    let top = KERNEL_VIRTUAL_START - task_index as u32 * slice;
    (top - slice, top)
}

/// Spawn a kernel thread: kernel address space, heap-allocated stack,
/// ring-0 selectors.
pub fn kspawn(name: &str, entry: fn() -> !) -> KResult<ProcessId> {
    let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
    let process = Process::new(pid, name, ProcessImage::KernelThread);
    let process_id = ProcessId(with_processes(|processes| processes.insert(process))?);

    let stack = Vec::leak(alloc::vec![0u8; KERNEL_TASK_STACK_SIZE]);
    let stack_bottom = stack.as_ptr() as u32;
    let stack_top = stack_bottom + KERNEL_TASK_STACK_SIZE as u32;
    let registers = TaskRegisters::kernel_entry(entry as usize as u32, stack_top);
    let task = Task::new(process_id, registers, stack_bottom, stack_top);
    let task_id = TaskId(with_tasks(|tasks| tasks.insert(task))?);

    with_processes(|processes| {
        if let Some(process) = processes.get_mut(process_id.0) {
            process.tasks.push(task_id);
        }
    });
    log::info!("process: kernel thread '{}' (pid {})", name, pid);
    Ok(process_id)
}

/// Spawn a user process from a flat binary on the filesystem: fresh page
/// directory, code/bss and heap mapped, stack slice mapped per task, the
/// image copied to `USER_CODE_START`, registers seeded for ring 3.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn spawn(path: &str) -> KResult<ProcessId> {
    use crate::arch::x86;
    use crate::mm::layout::{USER_BSS_END, USER_CODE_START, USER_HEAP_END, USER_HEAP_START};
    use crate::mm::paging::USER_PSE;

    // Stage the image through the kernel heap first; the copy into the
    // user mapping happens under the target directory.
    let image = load_binary(path)?;

    let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
    let mut process = Process::new(pid, path, ProcessImage::Binary);
    process.size = image.len() as u32;

    let mut dir = crate::mm::create_process_directory()?;
    process.page_dir_phys = Some(dir.phys_addr());

    let map_result = crate::mm::PFA.with(|pfa| {
        dir.map_between(pfa, USER_CODE_START, USER_BSS_END, USER_PSE)?;
        dir.map_between(pfa, USER_HEAP_START, USER_HEAP_END, USER_PSE)
    });
    if map_result.is_err() {
        crate::mm::destroy_process_directory(&mut dir);
        return Err(KernelError::OutOfMemory);
    }

    let (stack_bottom, stack_top) = stack_slice_for(0);
    crate::mm::PFA.with(|pfa| dir.map_between(pfa, stack_bottom, stack_top - 1, USER_PSE))?;

    // Copy the image in under the new directory, then come back.
    // SAFETY: the directory shares the kernel half, and the code window
    // was just mapped, so the copy targets fresh user memory.
    unsafe {
        crate::mm::paging::set_dir(&dir);
        core::ptr::copy_nonoverlapping(
            image.as_ptr(),
            USER_CODE_START as *mut u8,
            image.len(),
        );
    }
    crate::mm::restore_kernel_dir();
    x86::flush_tlb();

    let registers = TaskRegisters::user_entry(USER_CODE_START, stack_top);
    let process_id = ProcessId(with_processes(|processes| processes.insert(process))?);
    let task = Task::new(process_id, registers, stack_bottom, stack_top);
    let task_id = TaskId(with_tasks(|tasks| tasks.insert(task))?);
    with_processes(|processes| {
        if let Some(process) = processes.get_mut(process_id.0) {
            process.tasks.push(task_id);
        }
    });

    log::info!(
        "process: spawned '{}' (pid {}, {} bytes)",
        path,
        pid,
        image.len()
    );
    Ok(process_id)
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn spawn(_path: &str) -> KResult<ProcessId> {
    Err(KernelError::Io)
}

/// Read a flat binary through the VFS into a staging buffer.
#[cfg(all(target_arch = "x86", target_os = "none"))]
fn load_binary(path: &str) -> KResult<Vec<u8>> {
    use crate::fs::vfs::OpenMode;

    let mut vfs = crate::fs::VFS.lock();
    let fd = vfs.open(path, OpenMode::Read)?;
    let stat = vfs.stat(fd)?;
    let mut image = alloc::vec![0u8; stat.size as usize];
    let read = vfs.read(fd, &mut image)?;
    vfs.close(fd)?;
    if read != image.len() {
        return Err(KernelError::Io);
    }
    Ok(image)
}

/// Detach a task from its process; tearing down the process when its
/// last task leaves. Returns the owning process id when the process died
/// with it.
pub fn task_exit(task_id: TaskId) -> Option<ProcessId> {
    let process_id = with_tasks(|tasks| tasks.remove(task_id.0).map(|task| task.process))?;
    let now_empty = with_processes(|processes| {
        let process = processes.get_mut(process_id.0)?;
        process.tasks.retain(|id| *id != task_id);
        Some(process.tasks.is_empty())
    })?;
    if current_task() == Some(task_id) {
        set_current_task(None);
    }
    if now_empty {
        process_exit(process_id);
        return Some(process_id);
    }
    None
}

/// Destroy a process: drop remaining tasks, return every lower-half frame
/// and the page directory to the frame allocator, release the slot.
pub fn process_exit(process_id: ProcessId) {
    let Some(process) = with_processes(|processes| processes.remove(process_id.0)) else {
        return;
    };
    for task_id in &process.tasks {
        with_tasks(|tasks| tasks.remove(task_id.0));
    }
    if foreground() == Some(process_id) {
        FOREGROUND.with(|foreground| *foreground = None);
    }
    if let Some(dir_phys) = process.page_dir_phys {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        {
            use crate::mm::layout::p2v;
            use crate::mm::paging::{PageDirectory, PageEntry};
            // SAFETY: the directory page stays mapped through the
            // higher-half window until destroy returns it to the PFA.
            let mut dir =
                unsafe { PageDirectory::from_ptr(p2v(dir_phys) as *mut PageEntry) };
            crate::mm::destroy_process_directory(&mut dir);
        }
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        let _ = dir_phys;
    }
    log::info!("process: pid {} ('{}') exited", process.pid, process.filename);
}

/// First (main) task of a process.
pub fn first_task(process_id: ProcessId) -> Option<TaskId> {
    with_processes(|processes| processes.get(process_id.0).and_then(|p| p.tasks.first().copied()))
}

/// Log the process table.
pub fn dump() {
    with_processes(|processes| {
        for (_, process) in processes.iter() {
            log::info!(
                "process: pid {} '{}' tasks={} dir={:?} size={}",
                process.pid,
                process.filename,
                process.tasks.len(),
                process.page_dir_phys,
                process.size
            );
        }
    });
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::task::WaitReason;
    use super::*;
    use crate::process::TEST_LOCK as TEST_GUARD;

    fn idle_entry() -> ! {
        unreachable!()
    }

    #[test]
    fn kernel_threads_spawn_with_one_task() {
        let _guard = TEST_GUARD.lock();
        init();
        let pid = kspawn("IDLE", idle_entry).unwrap();
        let (task_count, image) = with_processes(|processes| {
            let process = processes.get(pid.0).unwrap();
            (process.tasks.len(), process.image)
        });
        assert_eq!(task_count, 1);
        assert_eq!(image, ProcessImage::KernelThread);
        let task_id = with_processes(|processes| processes.get(pid.0).unwrap().tasks[0]);
        with_tasks(|tasks| {
            let task = tasks.get(task_id.0).unwrap();
            assert_eq!(task.state, TaskState::Ready);
            assert_eq!(task.registers.cs, 0x08);
            assert_eq!(task.stack_top - task.stack_bottom, KERNEL_TASK_STACK_SIZE as u32);
        });
    }

    #[test]
    fn stack_slices_partition_the_stack_window() {
        let (bottom0, top0) = stack_slice_for(0);
        let (bottom1, top1) = stack_slice_for(1);
        assert_eq!(top0, KERNEL_VIRTUAL_START);
        assert_eq!(top0 - bottom0, USER_STACK_SIZE / 16);
        assert_eq!(top1, bottom0);
        assert_eq!(top1 - bottom1, USER_STACK_SIZE / 16);
        let (bottom15, _) = stack_slice_for(15);
        assert_eq!(bottom15, KERNEL_VIRTUAL_START - USER_STACK_SIZE);
    }

    #[test]
    fn foreground_bytes_land_in_the_process_buffer() {
        let _guard = TEST_GUARD.lock();
        init();
        let pid = kspawn("SHELL", idle_entry).unwrap();
        assert!(!foreground_push(b'x'), "no foreground process yet");
        set_foreground(pid);
        assert!(foreground_push(b'a'));
        let task_id = with_processes(|processes| processes.get(pid.0).unwrap().tasks[0]);
        set_current_task(Some(task_id));
        assert_eq!(current_keyboard_pop(), Some(b'a'));
        assert_eq!(current_keyboard_pop(), None);
    }

    #[test]
    fn last_task_exit_tears_down_the_process() {
        let _guard = TEST_GUARD.lock();
        init();
        let pid = kspawn("ONESHOT", idle_entry).unwrap();
        let task_id = with_processes(|processes| processes.get(pid.0).unwrap().tasks[0]);
        let died = task_exit(task_id);
        assert_eq!(died, Some(pid));
        assert!(with_processes(|processes| processes.get(pid.0).is_none()));
        assert!(with_tasks(|tasks| tasks.get(task_id.0).is_none()));
    }

    #[test]
    fn blocked_tasks_record_their_reason() {
        let _guard = TEST_GUARD.lock();
        init();
        let pid = kspawn("WAITER", idle_entry).unwrap();
        let task_id = with_processes(|processes| processes.get(pid.0).unwrap().tasks[0]);
        with_tasks(|tasks| tasks.get_mut(task_id.0).unwrap().block(WaitReason::Keyboard));
        with_tasks(|tasks| {
            assert_eq!(tasks.get(task_id.0).unwrap().waiting_on, Some(WaitReason::Keyboard));
        });
    }
}
