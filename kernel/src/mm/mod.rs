//! Memory management
//!
//! Ties together the physical frame allocator, the paging layer and the
//! kernel heap, and owns their global instances. Bring-up order: the PFA
//! is seeded from the Multiboot2 memory map, the kernel directory is
//! built and loaded, then the heap maps its first chunk.

pub mod frame_allocator;
pub mod heap;
pub mod layout;
pub mod paging;

use frame_allocator::{Frame, FrameAllocator};
use layout::{
    p2v, v2p, FRAMEBUFFER_PHYS_BASE, FRAMEBUFFER_SIZE, KERNEL_HEAP_END, KERNEL_HEAP_START,
    KERNEL_PHYS_BASE, KERNEL_PHYS_END, PAGE_SIZE, PSE_PAGE_SIZE,
};
use paging::{PageDirectory, PageEntry, DIR_ENTRIES, KERNEL_PSE};

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::arch::x86;
use crate::error::KResult;
use crate::sync::IrqLock;

/// Global physical frame allocator. IRQ paths (page-fault bookkeeping)
/// touch it, so it lives behind the interrupt-masking lock.
pub static PFA: IrqLock<FrameAllocator> = IrqLock::new(FrameAllocator::new());

/// Backing storage for the kernel page directory.
#[repr(C, align(4096))]
struct DirectoryStorage([PageEntry; DIR_ENTRIES]);

static KERNEL_DIRECTORY: Mutex<DirectoryStorage> =
    Mutex::new(DirectoryStorage([PageEntry::empty(); DIR_ENTRIES]));

/// Current kernel-heap break (next unmapped arena byte).
static HEAP_BREAK: AtomicU32 = AtomicU32::new(KERNEL_HEAP_START);

/// Run `f` against the kernel page directory.
pub fn with_kernel_directory<R>(f: impl FnOnce(&mut PageDirectory) -> R) -> R {
    let mut guard = KERNEL_DIRECTORY.lock();
    // SAFETY: the static storage holds exactly DIR_ENTRIES entries and
    // lives forever; exclusive access is provided by the mutex.
    let mut dir = unsafe { PageDirectory::from_ptr(guard.0.as_mut_ptr()) };
    f(&mut dir)
}

/// Physical address of the kernel directory, for CR3.
pub fn kernel_directory_phys() -> u32 {
    let guard = KERNEL_DIRECTORY.lock();
    v2p(guard.0.as_ptr() as u32)
}

/// Load the kernel directory into CR3. Called on every syscall entry and
/// again before returning to user context.
pub fn restore_kernel_dir() {
    // SAFETY: the kernel directory always maps the running kernel.
    unsafe { x86::load_cr3(kernel_directory_phys()) };
}

/// Initialize the PFA: everything used until the memory map says
/// otherwise, then the kernel image window and framebuffer re-marked, and
/// frame 0 kept out of circulation.
pub fn init_pfa(available: impl Iterator<Item = (u64, u64)>) {
    PFA.with(|pfa| {
        pfa.init();
        for (base, length) in available {
            let first = Frame((base / PAGE_SIZE as u64) as u32);
            let last = Frame(((base + length) / PAGE_SIZE as u64).min(layout::MAX_FRAMES as u64) as u32);
            pfa.mark_range_free(first, last);
        }
        pfa.mark_range_used(
            Frame::containing(KERNEL_PHYS_BASE),
            Frame::containing(KERNEL_PHYS_END - 1),
        );
        pfa.mark_range_used(
            Frame::containing(FRAMEBUFFER_PHYS_BASE),
            Frame::containing(FRAMEBUFFER_PHYS_BASE + FRAMEBUFFER_SIZE - 1),
        );
        pfa.mark_used(Frame(0));
    });
}

/// Build the kernel directory and switch to it.
pub fn init_kernel_paging() {
    with_kernel_directory(|dir| dir.init_kernel_map());
    restore_kernel_dir();
}

/// Tear down the early identity mapping once bring-up no longer runs on
/// physical addresses.
pub fn remove_identity_mapping() {
    with_kernel_directory(|dir| dir.remove_identity_mapping());
    log::info!("mm: identity mapping removed");
}

/// Map `chunks` fresh 4 MiB heap chunks at `arena_end`, returning the
/// mapped byte count. `None` when the PFA has no frames or the arena
/// would run into the kernel stack.
pub fn map_heap_chunks(arena_end: usize, chunks: usize) -> Option<usize> {
    let chunks = chunks.max(1);
    let bytes = chunks * PSE_PAGE_SIZE;
    let start = arena_end as u32;
    if start < KERNEL_HEAP_START || (start as u64 + bytes as u64) > KERNEL_HEAP_END as u64 {
        return None;
    }
    let mapped = PFA.with(|pfa| {
        with_kernel_directory(|dir| {
            dir.map_between(pfa, start, start + bytes as u32 - 1, KERNEL_PSE)
        })
    });
    match mapped {
        Ok(()) => {
            x86::flush_tlb();
            HEAP_BREAK.store(start + bytes as u32, Ordering::Release);
            Some(bytes)
        }
        Err(err) => {
            log::error!("mm: heap growth failed: {}", err);
            None
        }
    }
}

/// Map the first heap chunk and hand it to the allocator.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init_heap() {
    let bytes = map_heap_chunks(KERNEL_HEAP_START as usize, 1)
        .expect("kernel heap: first chunk must map");
    // SAFETY: map_heap_chunks just mapped this range as fresh writable
    // kernel memory.
    unsafe {
        crate::ALLOCATOR
            .lock()
            .init(KERNEL_HEAP_START as *mut u8, bytes);
    }
    crate::ALLOCATOR.lock().dump();
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn init_heap() {}

/// Allocate and initialize a page directory for a new process: zeroed
/// lower half, kernel upper half shared by reference.
pub fn create_process_directory() -> KResult<PageDirectory> {
    let frame = PFA.with(|pfa| pfa.alloc())?;
    // SAFETY: the frame is fresh, and every PFA frame below 256 MiB is
    // reachable through the higher-half window.
    let mut dir = unsafe { PageDirectory::from_ptr(p2v(frame.addr()) as *mut PageEntry) };
    dir.zero();
    with_kernel_directory(|kernel| dir.clone_kernel_half(kernel));
    Ok(dir)
}

/// Release a process directory: return every lower-half mapping and the
/// directory page itself to the PFA.
pub fn destroy_process_directory(dir: &mut PageDirectory) {
    PFA.with(|pfa| {
        dir.unmap_between(pfa, 0, layout::USER_STACK_END);
        pfa.free(Frame::containing(dir.phys_addr()));
    });
}

/// Panic if the linked kernel image outgrew its reserved window.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn check_kernel_size() {
    extern "C" {
        static __kernel_start: u8;
        static __kernel_end: u8;
    }
    // SAFETY: linker-provided symbols; only their addresses are used.
    let (start, end) = unsafe {
        (
            &__kernel_start as *const u8 as u32,
            &__kernel_end as *const u8 as u32,
        )
    };
    let size = end - start;
    let window = KERNEL_PHYS_END - KERNEL_PHYS_BASE;
    if size >= window {
        panic!("kernel image ({} bytes) overflows its {} MiB window", size, window >> 20);
    }
    log::info!(
        "mm: kernel image {} KiB of {} MiB window",
        size / 1024,
        window >> 20
    );
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn check_kernel_size() {}
