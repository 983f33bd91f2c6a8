// Global Descriptor Table

use lazy_static::lazy_static;
use spin::Mutex;

use super::tss::TaskStateSegment;
use crate::mm::layout::KERNEL_STACK_TOP;

/// Kernel code segment selector (ring 0).
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
/// Kernel data segment selector (ring 0).
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
/// User code segment selector with RPL 3 (0x18 | 3).
pub const USER_CODE_SELECTOR: u16 = 0x1B;
/// User data segment selector with RPL 3 (0x20 | 3).
pub const USER_DATA_SELECTOR: u16 = 0x23;
/// TSS selector.
pub const TSS_SELECTOR: u16 = 0x28;

/// Number of descriptors: null, kernel code/data, user code/data, TSS.
const GDT_ENTRIES: usize = 6;

/// Pack a segment descriptor from its base, 20-bit limit, access byte and
/// 4-bit flags nibble.
pub const fn descriptor(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    (limit as u64 & 0xFFFF)
        | ((base as u64 & 0xFF_FFFF) << 16)
        | ((access as u64) << 40)
        | (((limit as u64 >> 16) & 0xF) << 48)
        | ((flags as u64 & 0xF) << 52)
        | (((base as u64 >> 24) & 0xFF) << 56)
}

/// Flat 4 GiB code/data descriptors. Access bytes: present | ring |
/// code/data | read-write; flags: 4 KiB granularity, 32-bit.
const KERNEL_CODE_ACCESS: u8 = 0x9A;
const KERNEL_DATA_ACCESS: u8 = 0x92;
const USER_CODE_ACCESS: u8 = 0xFA;
const USER_DATA_ACCESS: u8 = 0xF2;
const FLAT_FLAGS: u8 = 0xC;
/// 32-bit available TSS, present, ring 0; byte granularity.
const TSS_ACCESS: u8 = 0x89;

lazy_static! {
    static ref TSS: Mutex<TaskStateSegment> =
        Mutex::new(TaskStateSegment::new(KERNEL_STACK_TOP, KERNEL_DATA_SELECTOR));
}

lazy_static! {
    static ref GDT: [u64; GDT_ENTRIES] = {
        let tss_base = {
            let guard = TSS.lock();
            &*guard as *const TaskStateSegment as u32
        };
        let tss_limit = core::mem::size_of::<TaskStateSegment>() as u32 - 1;
        [
            0,
            descriptor(0, 0xF_FFFF, KERNEL_CODE_ACCESS, FLAT_FLAGS),
            descriptor(0, 0xF_FFFF, KERNEL_DATA_ACCESS, FLAT_FLAGS),
            descriptor(0, 0xF_FFFF, USER_CODE_ACCESS, FLAT_FLAGS),
            descriptor(0, 0xF_FFFF, USER_DATA_ACCESS, FLAT_FLAGS),
            descriptor(tss_base, tss_limit, TSS_ACCESS, 0),
        ]
    };
}

/// Pointer operand for `lgdt`.
#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

// Loading a new GDT needs a far jump to reload CS; that lives in a
// dedicated stub because inline assembly cannot express it portably.
#[cfg(all(target_arch = "x86", target_os = "none"))]
core::arch::global_asm!(
    r#"
.section .text

// fn(gdtr: *const GdtPointer)
.global gdt_flush
gdt_flush:
    movl 4(%esp), %eax
    lgdt (%eax)
    movw $0x10, %ax
    movw %ax, %ds
    movw %ax, %es
    movw %ax, %fs
    movw %ax, %gs
    movw %ax, %ss
    ljmp $0x08, $1f
1:
    ret

.global tss_flush
tss_flush:
    movw $0x28, %ax
    ltr %ax
    ret
"#,
    options(att_syntax)
);

/// Load the GDT, reload the segment registers and install the TSS.
///
/// Must run once, before interrupts are enabled.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init() {
    extern "C" {
        fn gdt_flush(gdtr: *const GdtPointer);
        fn tss_flush();
    }

    let pointer = GdtPointer {
        limit: (core::mem::size_of::<[u64; GDT_ENTRIES]>() - 1) as u16,
        base: GDT.as_ptr() as u32,
    };
    // SAFETY: the GDT lives in a lazy_static (stable address) and the
    // stub reloads every segment register with selectors into it.
    unsafe {
        gdt_flush(&pointer);
        tss_flush();
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn init() {}

/// Update the ring-0 stack pointer used on ring-3 → ring-0 transitions.
///
/// Called by the scheduler before entering a user task so the next trap
/// lands on that task's kernel stack. Must be called with interrupts
/// disabled.
pub fn set_kernel_stack(stack_top: u32) {
    TSS.lock().esp0 = stack_top;
}

/// Current ring-0 stack pointer recorded in the TSS.
pub fn kernel_stack() -> u32 {
    TSS.lock().esp0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_descriptors_match_reference_encodings() {
        assert_eq!(
            descriptor(0, 0xF_FFFF, KERNEL_CODE_ACCESS, FLAT_FLAGS),
            0x00CF_9A00_0000_FFFF
        );
        assert_eq!(
            descriptor(0, 0xF_FFFF, KERNEL_DATA_ACCESS, FLAT_FLAGS),
            0x00CF_9200_0000_FFFF
        );
        assert_eq!(
            descriptor(0, 0xF_FFFF, USER_CODE_ACCESS, FLAT_FLAGS),
            0x00CF_FA00_0000_FFFF
        );
        assert_eq!(
            descriptor(0, 0xF_FFFF, USER_DATA_ACCESS, FLAT_FLAGS),
            0x00CF_F200_0000_FFFF
        );
    }

    #[test]
    fn tss_descriptor_encodes_base_and_limit() {
        let d = descriptor(0xC010_2000, 103, TSS_ACCESS, 0);
        assert_eq!(d & 0xFFFF, 103);
        assert_eq!((d >> 16) & 0xFF_FFFF, 0x10_2000);
        assert_eq!((d >> 56) & 0xFF, 0xC0);
        assert_eq!((d >> 40) & 0xFF, TSS_ACCESS as u64);
    }

    #[test]
    fn selectors_carry_requested_privilege_levels() {
        assert_eq!(USER_CODE_SELECTOR & 0x3, 3);
        assert_eq!(USER_DATA_SELECTOR & 0x3, 3);
        assert_eq!(KERNEL_CODE_SELECTOR & 0x3, 0);
    }

    #[test]
    fn set_kernel_stack_updates_esp0() {
        set_kernel_stack(0xC2C0_4000);
        assert_eq!(kernel_stack(), 0xC2C0_4000);
        set_kernel_stack(KERNEL_STACK_TOP);
    }
}
