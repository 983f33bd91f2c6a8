//! 8259 programmable interrupt controller
//!
//! Remaps IRQs 0–15 away from the CPU exception range to vectors
//! 0x20–0x2F and provides the end-of-interrupt discipline: every IRQ
//! handler acknowledges exactly once; IRQs 8–15 acknowledge both PICs.

use super::port::{io_wait, outb};

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// ICW1: edge-triggered init with ICW4 to follow.
const ICW1_INIT: u8 = 0x11;
/// ICW4: 8086 mode.
const ICW4_8086: u8 = 0x01;
const EOI: u8 = 0x20;

/// Vector base for IRQs 0–7 after remapping.
pub const IRQ_BASE: u8 = 0x20;
/// Vector base for IRQs 8–15 after remapping.
pub const IRQ_SLAVE_BASE: u8 = 0x28;
/// Number of PIC-routed IRQ lines.
pub const IRQ_LINES: u8 = 16;

/// Vector the given IRQ line was remapped to.
pub const fn vector_for_irq(irq: u8) -> u8 {
    IRQ_BASE + irq
}

/// IRQ line for a remapped vector, if the vector belongs to the PIC range.
pub const fn irq_for_vector(vector: u8) -> Option<u8> {
    if vector >= IRQ_BASE && vector < IRQ_BASE + IRQ_LINES {
        Some(vector - IRQ_BASE)
    } else {
        None
    }
}

/// Remap both PICs and unmask all lines.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init() {
    // SAFETY: the documented 8259 initialization sequence; runs once with
    // interrupts disabled during bring-up.
    unsafe {
        outb(PIC1_COMMAND, ICW1_INIT);
        io_wait();
        outb(PIC2_COMMAND, ICW1_INIT);
        io_wait();
        outb(PIC1_DATA, IRQ_BASE);
        io_wait();
        outb(PIC2_DATA, IRQ_SLAVE_BASE);
        io_wait();
        // Cascade wiring: slave on IRQ2.
        outb(PIC1_DATA, 0x04);
        io_wait();
        outb(PIC2_DATA, 0x02);
        io_wait();
        outb(PIC1_DATA, ICW4_8086);
        io_wait();
        outb(PIC2_DATA, ICW4_8086);
        io_wait();
        // Unmask everything.
        outb(PIC1_DATA, 0x00);
        outb(PIC2_DATA, 0x00);
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn init() {}

/// Acknowledge the in-service interrupt for `irq`.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn end_of_interrupt(irq: u8) {
    // SAFETY: writing EOI to the command ports is the architected ack.
    unsafe {
        if irq >= 8 {
            outb(PIC2_COMMAND, EOI);
        }
        outb(PIC1_COMMAND, EOI);
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn end_of_interrupt(_irq: u8) {}
