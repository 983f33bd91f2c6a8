//! Programmable interval timer
//!
//! PIT channel 0 programmed at boot for the scheduler tick. The IRQ0
//! handler bumps the tick counter and the scheduler preempts from the
//! same interrupt; `sleep` busy-waits on the counter.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// PIT input clock in Hz.
pub const PIT_BASE_HZ: u32 = 1_193_180;

/// Command: channel 0, lobyte/hibyte access, square-wave mode, binary.
const PIT_COMMAND: u8 = 0b0011_0110;
const PIT_COMMAND_PORT: u16 = 0x43;
const PIT_CHANNEL0_PORT: u16 = 0x40;

static TICKS: AtomicU64 = AtomicU64::new(0);
static HZ: AtomicU32 = AtomicU32::new(0);

/// Divisor that makes the PIT fire at `hz`.
pub const fn divisor_for(hz: u32) -> u16 {
    (PIT_BASE_HZ / hz) as u16
}

/// Program channel 0 for `hz` ticks per second.
pub fn init(hz: u32) {
    HZ.store(hz, Ordering::Release);
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        use crate::arch::x86::port::outb;

        let divisor = divisor_for(hz);
        // SAFETY: the documented channel-0 programming sequence.
        unsafe {
            outb(PIT_COMMAND_PORT, PIT_COMMAND);
            outb(PIT_CHANNEL0_PORT, divisor as u8);
            outb(PIT_CHANNEL0_PORT, (divisor >> 8) as u8);
        }
    }
    log::info!("timer: pit at {} Hz (divisor {})", hz, divisor_for(hz));
}

/// IRQ0 body: advance the tick counter.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Configured tick rate.
pub fn hz() -> u32 {
    HZ.load(Ordering::Acquire)
}

/// Milliseconds since boot at the configured rate.
pub fn uptime_ms() -> u64 {
    let hz = hz().max(1) as u64;
    ticks() * 1000 / hz
}

/// Busy-wait for roughly `ms` milliseconds of ticks. Interrupts must be
/// enabled or the counter never advances.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn sleep(ms: u32) {
    let hz = hz().max(1) as u64;
    let deadline = ticks() + (ms as u64 * hz) / 1000;
    while ticks() < deadline {
        crate::arch::x86::halt();
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn sleep(_ms: u32) {}
