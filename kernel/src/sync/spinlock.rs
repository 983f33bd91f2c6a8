//! xchg-based spinlock and IRQ-masking lock
//!
//! [`SpinLock`] is the bare atomic-exchange mutex for future SMP use.
//! [`IrqLock`] wraps data shared between thread context and interrupt
//! handlers: acquiring it disables interrupts for the critical section and
//! restores the previous interrupt state afterwards, so an IRQ handler can
//! never deadlock against the code it preempted.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;

/// Raw test-and-set spinlock. `swap` compiles to `xchg` on x86.
#[derive(Debug)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Spin until the lock is acquired.
    pub fn lock(&self) {
        while self.locked.swap(true, Ordering::Acquire) {
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Try to acquire the lock without spinning.
    pub fn try_lock(&self) -> bool {
        !self.locked.swap(true, Ordering::Acquire)
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-safe lock around a value.
///
/// The single-CPU kernel relies on IRQ masking for mutual exclusion with
/// interrupt handlers; the inner [`SpinLock`] only matters once a second
/// CPU exists. Never hold the lock across a suspension point.
pub struct IrqLock<T> {
    lock: SpinLock,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by the spinlock plus disabled
// interrupts inside `with`.
unsafe impl<T: Send> Send for IrqLock<T> {}
unsafe impl<T: Send> Sync for IrqLock<T> {}

impl<T> IrqLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            lock: SpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Run `f` with exclusive access to the value, interrupts disabled.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let saved = arch::x86::save_and_disable_interrupts();
        self.lock.lock();
        // SAFETY: the spinlock is held and interrupts are masked, so no
        // other context can be inside this block.
        let result = f(unsafe { &mut *self.data.get() });
        self.lock.unlock();
        arch::x86::restore_interrupts(saved);
        result
    }
}
