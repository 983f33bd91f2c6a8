//! Interrupt entry stubs
//!
//! 256 tiny per-vector stubs plus one common entry path. Each stub pushes
//! a dummy error code when the CPU did not push one, then the vector
//! number, and jumps to the common stub, which completes the
//! [`TrapFrame`](super::context::TrapFrame): `pushad`, saved data segment,
//! kernel segment load. The frame pointer is passed to `trap_dispatch`,
//! which hands it to [`crate::irq::handle_trap`].
//!
//! The stub addresses are exported to the IDT builder through
//! `ISR_STUB_TABLE`.

#[cfg(all(target_arch = "x86", target_os = "none"))]
core::arch::global_asm!(
    r#"
.altmacro

// Vectors where the CPU pushes an error code itself: 8, 10-14, 17.
.macro isr_stub num
vector_stub_\num:
    .if (\num == 8) || ((\num >= 10) && (\num <= 14)) || (\num == 17)
    .else
    pushl $0
    .endif
    pushl $\num
    jmp isr_common
.endm

.macro isr_table_entry num
    .long vector_stub_\num
.endm

.section .text

.set vec, 0
.rept 256
    isr_stub %vec
    .set vec, vec + 1
.endr

isr_common:
    pushal
    movl %ds, %eax
    pushl %eax

    // Kernel data segment for the handler body.
    movw $0x10, %ax
    movw %ax, %ds
    movw %ax, %es
    movw %ax, %fs
    movw %ax, %gs

    pushl %esp
    call trap_dispatch
    addl $4, %esp

    // Restore the interrupted context's data segments (DS/ES/FS/GS are
    // kept equal throughout the kernel).
    popl %eax
    movw %ax, %ds
    movw %ax, %es
    movw %ax, %fs
    movw %ax, %gs

    popal
    addl $8, %esp           // vector + error code
    iret

.section .rodata
.global ISR_STUB_TABLE
.align 4
ISR_STUB_TABLE:
.set vec, 0
.rept 256
    isr_table_entry %vec
    .set vec, vec + 1
.endr

.section .text
"#,
    options(att_syntax)
);

/// Common Rust-side landing point for every vector.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[no_mangle]
extern "C" fn trap_dispatch(frame: *mut super::context::TrapFrame) {
    // SAFETY: the common stub passes a pointer to the frame it just built
    // on the current kernel stack; it stays valid for the handler call.
    let frame = unsafe { &mut *frame };
    crate::irq::handle_trap(frame);
}
