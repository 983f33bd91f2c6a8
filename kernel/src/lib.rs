//! EmberOS kernel library
//!
//! A 32-bit x86 (i686) kernel booting from a Multiboot2 loader:
//! higher-half paged memory with a bitmap frame allocator and a
//! coalescing block heap, cooperatively scheduled kernel and user tasks
//! with timer preemption, an `int 0x80` syscall boundary, and a VFS with
//! a FAT16 driver over ATA PIO.
//!
//! The crate builds for the bare-metal `i686-unknown-none` target and,
//! for its unit tests, on a hosted target where the hardware-facing
//! paths are stubbed out and the logic runs against RAM-backed devices.

#![no_std]

extern crate alloc;

// Host target: link std and use the system allocator so unit tests can
// allocate normally.
#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

// Bare metal: the kernel heap is the global allocator.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[global_allocator]
pub static ALLOCATOR: mm::heap::LockedHeap = mm::heap::LockedHeap::empty();

#[macro_use]
pub mod print;

pub mod arch;
pub mod bootstrap;
pub mod drivers;
pub mod ds;
pub mod error;
pub mod fs;
pub mod irq;
pub mod logger;
pub mod mm;
pub mod multiboot;
pub mod process;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod syscall;
pub mod timer;

// Re-exports for the boot binary and integration tests.
pub use error::{KResult, KernelError};
