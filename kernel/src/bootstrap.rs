//! Kernel bring-up
//!
//! Ordered initialization from the Multiboot2 handoff to the first
//! scheduled user process: segmentation and interrupts first, then
//! physical memory from the loader's map, paging and the heap, devices,
//! the filesystem, and finally the scheduler with the resident idle
//! thread and the shell as foreground process.

use crate::arch::x86;

/// The user program spawned as the foreground process.
pub const SHELL_PATH: &str = "A:/BIN/ICARSH.BIN";
/// Scheduler tick rate.
pub const TICK_HZ: u32 = 100;

/// The resident idle thread: halt until the next interrupt, forever.
pub fn kidle() -> ! {
    loop {
        x86::halt();
    }
}

/// Full bring-up. Called exactly once from the boot stub with the
/// Multiboot2 magic and the physical info-block address.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn kmain(magic: u32, mbi_phys: u32) -> ! {
    use alloc::boxed::Box;

    use crate::drivers::ata::AtaDevice;
    use crate::mm::layout::p2v;
    use crate::multiboot::{BootInfo, MemoryKind};

    crate::serial::init();
    crate::logger::init(log::LevelFilter::Info);
    log::info!("emberos {} booting", env!("CARGO_PKG_VERSION"));

    x86::gdt::init();
    x86::pic::init();
    x86::idt::init();

    // Physical memory: everything used, then the loader's AVAILABLE
    // ranges freed, kernel image and framebuffer re-marked.
    // SAFETY: the loader's info block is mapped through the higher half
    // and stays untouched during bring-up.
    let boot_info = unsafe { BootInfo::from_loader(magic, p2v(mbi_phys)) }
        .expect("invalid Multiboot2 handoff");
    let available = boot_info
        .memory_regions()
        .expect("Multiboot2 info lacks a memory map")
        .filter(|region| region.kind == MemoryKind::Available)
        .map(|region| (region.base, region.length));
    crate::mm::init_pfa(available);
    if let Some(framebuffer) = boot_info.framebuffer() {
        log::info!(
            "framebuffer: {}x{}x{} at {:#x}",
            framebuffer.width,
            framebuffer.height,
            framebuffer.bpp,
            framebuffer.phys_addr
        );
    }

    crate::mm::init_kernel_paging();
    crate::mm::check_kernel_size();
    crate::mm::init_heap();
    crate::mm::PFA.with(|pfa| pfa.dump(false));

    crate::process::init();
    crate::sched::init();

    crate::drivers::mouse::init();
    crate::timer::init(TICK_HZ);

    // Boot disk and filesystem.
    {
        let mut ata = AtaDevice::new();
        ata.init().expect("ata: identify failed");
        let mut vfs = crate::fs::VFS.lock();
        vfs.register_disk('A', Box::new(ata));
        vfs.mount('A').expect("no mountable filesystem on A:");
    }
    crate::drivers::rtc::load_timezone(&mut crate::fs::VFS.lock());
    crate::drivers::rtc::log_boot_time();

    crate::mm::remove_identity_mapping();

    // Scheduler: resident idle thread plus the shell as foreground.
    let idle = crate::process::kspawn("IDLE", kidle).expect("failed to spawn idle thread");
    let idle_task = crate::process::first_task(idle).expect("idle thread has no task");
    crate::sched::set_idle(idle_task);
    crate::process::set_current_task(Some(idle_task));

    let shell = crate::process::spawn(SHELL_PATH)
        .unwrap_or_else(|err| panic!("failed to spawn {}: {}", SHELL_PATH, err));
    crate::process::set_foreground(shell);
    if let Some(task) = crate::process::first_task(shell) {
        crate::sched::add(task);
    }
    crate::process::dump();

    log::info!("bring-up complete, enabling interrupts");
    x86::enable_interrupts();

    // This context continues as the idle thread until the first timer
    // tick captures it into the idle task's register image.
    crate::arch::halt_loop()
}
