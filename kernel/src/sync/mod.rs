//! Kernel synchronization primitives.

pub mod spinlock;

pub use spinlock::{IrqLock, SpinLock};
