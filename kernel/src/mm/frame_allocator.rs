//! Physical frame allocator
//!
//! A bitmap over the full 4 GiB frame space: bit set ⇔ frame used.
//! `init` marks everything used; the bring-up code then clears the
//! AVAILABLE ranges from the Multiboot2 memory map and re-marks the kernel
//! image and framebuffer windows. Allocation is a first-fit linear scan.
//!
//! Not reentrant: callers in IRQ context go through the global
//! [`IrqLock`](crate::sync::IrqLock) instance in `mm`.

use crate::error::{KResult, KernelError};
use crate::mm::layout::{MAX_FRAMES, PAGE_SIZE};

/// Index of a physical 4 KiB frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Frame(pub u32);

impl Frame {
    /// Frame containing the given physical address.
    pub const fn containing(phys_addr: u32) -> Self {
        Self(phys_addr / PAGE_SIZE as u32)
    }

    /// Physical base address of the frame.
    pub const fn addr(self) -> u32 {
        self.0 * PAGE_SIZE as u32
    }
}

const BITMAP_WORDS: usize = MAX_FRAMES / 32;

/// Bitmap frame allocator state.
pub struct FrameAllocator {
    bitmap: [u32; BITMAP_WORDS],
}

impl FrameAllocator {
    /// All frames free; callers almost always want [`init`](Self::init)
    /// right after.
    pub const fn new() -> Self {
        Self {
            bitmap: [0; BITMAP_WORDS],
        }
    }

    /// Mark every frame used. The memory map then clears what exists.
    pub fn init(&mut self) {
        for word in self.bitmap.iter_mut() {
            *word = u32::MAX;
        }
    }

    pub fn mark_used(&mut self, frame: Frame) {
        let (index, offset) = Self::locate(frame);
        self.bitmap[index] |= 1 << offset;
    }

    pub fn mark_free(&mut self, frame: Frame) {
        let (index, offset) = Self::locate(frame);
        self.bitmap[index] &= !(1 << offset);
    }

    pub fn is_used(&self, frame: Frame) -> bool {
        let (index, offset) = Self::locate(frame);
        self.bitmap[index] & (1 << offset) != 0
    }

    /// Mark the inclusive frame range covering `[start, end]` used.
    pub fn mark_range_used(&mut self, start: Frame, end: Frame) {
        for frame in start.0..=end.0.min(MAX_FRAMES as u32 - 1) {
            self.mark_used(Frame(frame));
        }
    }

    /// Mark the frame range `[start, end)` free.
    pub fn mark_range_free(&mut self, start: Frame, end: Frame) {
        for frame in start.0..end.0.min(MAX_FRAMES as u32) {
            self.mark_free(Frame(frame));
        }
    }

    /// First-fit single-frame allocation.
    pub fn alloc(&mut self) -> KResult<Frame> {
        for (index, word) in self.bitmap.iter().enumerate() {
            if *word == u32::MAX {
                continue;
            }
            let offset = word.trailing_ones() as usize;
            let frame = Frame((index * 32 + offset) as u32);
            self.mark_used(frame);
            return Ok(frame);
        }
        Err(KernelError::OutOfMemory)
    }

    /// First-fit allocation of `count` contiguous frames whose first frame
    /// index is a multiple of `align_frames`. Backs 4 MiB PSE mappings
    /// (1024 frames, 1024-frame alignment).
    pub fn alloc_contiguous(&mut self, count: usize, align_frames: usize) -> KResult<Frame> {
        debug_assert!(count > 0);
        let step = align_frames.max(1);
        let mut base = 0usize;
        'scan: while base + count <= MAX_FRAMES {
            for offset in 0..count {
                if self.is_used(Frame((base + offset) as u32)) {
                    base += step;
                    continue 'scan;
                }
            }
            let first = Frame(base as u32);
            self.mark_range_used(first, Frame((base + count - 1) as u32));
            return Ok(first);
        }
        Err(KernelError::OutOfMemory)
    }

    pub fn free(&mut self, frame: Frame) {
        self.mark_free(frame);
    }

    pub fn used_frames(&self) -> usize {
        self.bitmap
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    pub fn free_frames(&self) -> usize {
        MAX_FRAMES - self.used_frames()
    }

    /// Report usage counts through the logger; with `verbose`, one line
    /// per 32-frame bitmap word that is partially used.
    pub fn dump(&self, verbose: bool) {
        let used = self.used_frames();
        let free = self.free_frames();
        log::info!(
            "pfa: {} used / {} free ({} KiB in use, {} KiB free)",
            used,
            free,
            used * PAGE_SIZE / 1024,
            free * PAGE_SIZE / 1024
        );
        if verbose {
            for (index, word) in self.bitmap.iter().enumerate() {
                if *word != 0 && *word != u32::MAX {
                    log::debug!(
                        "pfa: frames {}..{}: {:032b}",
                        index * 32,
                        index * 32 + 31,
                        word
                    );
                }
            }
        }
    }

    fn locate(frame: Frame) -> (usize, usize) {
        let frame = frame.0 as usize;
        debug_assert!(frame < MAX_FRAMES);
        (frame / 32, frame % 32)
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::boxed::Box;

    use super::*;

    fn fresh() -> Box<FrameAllocator> {
        let mut pfa = Box::new(FrameAllocator::new());
        pfa.init();
        // Pretend the map reported 128 MiB of AVAILABLE memory at 0x0.
        pfa.mark_range_free(Frame(0), Frame(128 * 1024 * 1024 / PAGE_SIZE as u32));
        // The first frame stays used, as does the kernel window.
        pfa.mark_used(Frame(0));
        pfa
    }

    #[test]
    fn alloc_returns_first_free_frame() {
        let mut pfa = fresh();
        let frame = pfa.alloc().unwrap();
        assert_eq!(frame, Frame(1));
        assert_eq!(frame.addr(), 4096);
        assert!(pfa.is_used(frame));
    }

    #[test]
    fn freed_frames_are_reused() {
        let mut pfa = fresh();
        let a = pfa.alloc().unwrap();
        let b = pfa.alloc().unwrap();
        assert_ne!(a, b);
        pfa.free(a);
        assert_eq!(pfa.alloc().unwrap(), a);
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let mut pfa = Box::new(FrameAllocator::new());
        pfa.init();
        assert_eq!(pfa.alloc().unwrap_err(), KernelError::OutOfMemory);
    }

    #[test]
    fn contiguous_allocation_respects_alignment() {
        let mut pfa = fresh();
        // Occupy frame 1 so the first aligned 1024-frame run starts at 1024.
        let _ = pfa.alloc().unwrap();
        let run = pfa.alloc_contiguous(1024, 1024).unwrap();
        assert_eq!(run.0 % 1024, 0);
        assert_eq!(run, Frame(1024));
        for offset in 0..1024 {
            assert!(pfa.is_used(Frame(run.0 + offset)));
        }
    }

    #[test]
    fn used_count_tracks_marks() {
        let mut pfa = Box::new(FrameAllocator::new());
        pfa.init();
        assert_eq!(pfa.used_frames(), MAX_FRAMES);
        pfa.mark_range_free(Frame(0), Frame(32));
        assert_eq!(pfa.free_frames(), 32);
        pfa.mark_range_used(Frame(0), Frame(15));
        assert_eq!(pfa.free_frames(), 16);
    }
}
