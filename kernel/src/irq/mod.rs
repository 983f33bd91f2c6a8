//! Trap dispatch
//!
//! Central landing point for every IDT vector: CPU exceptions dump state
//! and halt, remapped IRQs run their device body and acknowledge the PIC
//! exactly once, vector 0x80 enters the syscall layer, and anything else
//! is acknowledged and ignored.

use crate::arch::x86::context::TrapFrame;
use crate::arch::x86::pic;
use crate::arch::x86::idt::SYSCALL_VECTOR;

/// Remapped IRQ vectors the kernel handles specifically.
const VECTOR_TIMER: u8 = 0x20;
const VECTOR_KEYBOARD: u8 = 0x21;
const VECTOR_MOUSE: u8 = 0x2C;
const VECTOR_ATA_PRIMARY: u8 = 0x2E;

/// Human-readable CPU exception names, indexed by vector.
pub const EXCEPTION_NAMES: [&str; 32] = [
    "division by zero",
    "debug",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid tss",
    "segment not present",
    "stack-segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "x87 floating-point exception",
    "alignment check",
    "machine check",
    "simd floating-point exception",
    "virtualization exception",
    "control protection exception",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "security exception",
    "reserved",
];

/// Dispatch one trap frame. Called from the common assembly stub.
pub fn handle_trap(frame: &mut TrapFrame) {
    let vector = frame.vector as u8;
    match vector {
        0..=31 => handle_exception(frame),
        VECTOR_TIMER => {
            crate::timer::tick();
            pic::end_of_interrupt(0);
            crate::sched::preempt(frame);
        }
        VECTOR_KEYBOARD => {
            crate::drivers::keyboard::handle_irq();
            pic::end_of_interrupt(1);
        }
        VECTOR_MOUSE => {
            crate::drivers::mouse::handle_irq();
            pic::end_of_interrupt(12);
        }
        VECTOR_ATA_PRIMARY => {
            crate::drivers::ata::handle_irq();
            pic::end_of_interrupt(14);
        }
        _ if vector == SYSCALL_VECTOR => crate::syscall::dispatch(frame),
        _ => {
            // Stray or unhandled device interrupt: acknowledge and move
            // on.
            if let Some(irq) = pic::irq_for_vector(vector) {
                pic::end_of_interrupt(irq);
            }
        }
    }
}

/// Exceptions 0..31 are not recoverable: print CPU state and halt. Page
/// faults additionally report the faulting address (demand paging is the
/// designated growth point here).
fn handle_exception(frame: &mut TrapFrame) -> ! {
    let vector = frame.vector as usize;
    let name = EXCEPTION_NAMES.get(vector).copied().unwrap_or("unknown");
    if vector == 14 {
        log::error!(
            "page fault at {:#010x} (error code {:#x})",
            crate::arch::x86::read_cr2(),
            frame.err_code
        );
    }
    log::error!(
        "exception {} ({}): eip={:#010x} cs={:#06x} eflags={:#010x}",
        vector,
        name,
        frame.eip,
        frame.cs,
        frame.eflags
    );
    log::error!(
        "  eax={:#010x} ebx={:#010x} ecx={:#010x} edx={:#010x}",
        frame.eax,
        frame.ebx,
        frame.ecx,
        frame.edx
    );
    log::error!(
        "  esi={:#010x} edi={:#010x} ebp={:#010x} err={:#x}",
        frame.esi,
        frame.edi,
        frame.ebp,
        frame.err_code
    );
    panic!("unrecoverable CPU exception {} ({})", vector, name);
}
