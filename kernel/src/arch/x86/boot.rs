//! Multiboot2 header and early entry
//!
//! The loader drops us at `_start` in protected mode with paging off,
//! the magic in EAX and the physical info-block address in EBX. The stub
//! turns on PSE, installs a throwaway boot directory (identity plus the
//! same frames at 0xC0000000) and jumps to the higher half, where it sets
//! up the kernel stack and calls `kernel_main(magic, mbi_phys)`. The
//! identity half is torn down later by `bootstrap::kmain` once the real
//! kernel directory is live.

#[cfg(all(target_arch = "x86", target_os = "none"))]
core::arch::global_asm!(
    r#"
.section .multiboot_header, "aw"
.align 8
multiboot_header_start:
    .long 0xe85250d6                    // Multiboot2 magic
    .long 0                             // architecture: i386
    .long multiboot_header_end - multiboot_header_start
    .long -(0xe85250d6 + 0 + (multiboot_header_end - multiboot_header_start))

    // Framebuffer request: let the loader pick the mode.
    .align 8
    .word 5
    .word 0
    .long 20
    .long 0
    .long 0
    .long 0

    // End tag.
    .align 8
    .word 0
    .word 0
    .long 8
multiboot_header_end:

// Boot page directory: 16 identity PSE entries covering the first 64 MiB,
// mirrored at directory index 768 for the higher half.
.section .data
.align 4096
boot_page_directory:
.set frame, 0
.rept 16
    .long (frame * 0x400000) | 0x83     // present | writable | 4 MiB
    .set frame, frame + 1
.endr
.fill 768 - 16, 4, 0
.set frame, 0
.rept 16
    .long (frame * 0x400000) | 0x83
    .set frame, frame + 1
.endr
.fill 1024 - 768 - 16, 4, 0

.section .boot_text, "ax"
.global _start
_start:
    cli

    // 4 MiB pages.
    movl %cr4, %ecx
    orl $0x10, %ecx
    movl %ecx, %cr4

    // Physical address of the boot directory (the image is linked high).
    movl $boot_page_directory, %ecx
    subl $0xC0000000, %ecx
    movl %ecx, %cr3

    movl %cr0, %ecx
    orl $0x80010000, %ecx               // PG | WP
    movl %ecx, %cr0

    movl $higher_half, %ecx
    jmp *%ecx

.section .text
higher_half:
    movl $0xC2C08000, %esp              // kernel stack top
    xorl %ebp, %ebp

    pushl %ebx                          // multiboot info (physical)
    pushl %eax                          // magic
    call kernel_main

halt_forever:
    cli
    hlt
    jmp halt_forever
"#,
    options(att_syntax)
);
