//! Virtual and physical memory layout
//!
//! Fixed address-space map shared by the paging, heap and process layers.
//!
//! | Range                     | Owner                                   |
//! |---------------------------|-----------------------------------------|
//! | 0x00000000 – 0x3FFFFFFF   | user code + bss (1 GiB)                 |
//! | 0x40000000 – 0xBFBFFFFF   | user heap (grows up)                    |
//! | 0xBFC00000 – 0xBFFFFFFF   | user stacks, sliced per task            |
//! | 0xC0000000 – 0xC2FFFFFF   | kernel image + heap + kernel stack      |
//! | 0xE0000000 – 0xE03FFFFF   | framebuffer MMIO window                 |

/// 4 KiB page / frame size.
pub const PAGE_SIZE: usize = 4096;
/// 4 MiB page-size-extension mapping granule.
pub const PSE_PAGE_SIZE: usize = 0x40_0000;
/// Frames needed to back one PSE mapping.
pub const FRAMES_PER_PSE_PAGE: usize = PSE_PAGE_SIZE / PAGE_SIZE;

/// Frames covering the full 4 GiB physical space.
pub const MAX_FRAMES: usize = 0x1_0000_0000u64 as usize / PAGE_SIZE;

/// Start of the kernel's higher-half window.
pub const KERNEL_VIRTUAL_START: u32 = 0xC000_0000;
/// Physical base the higher half maps from.
pub const KERNEL_PHYS_BASE: u32 = 0x0;
/// Reserved physical window for the kernel image (16 MiB).
pub const KERNEL_PHYS_END: u32 = 0x0100_0000;

/// Kernel heap arena start; grows upward in 4 MiB chunks.
pub const KERNEL_HEAP_START: u32 = 0xC100_0000;
/// Exclusive upper bound for the heap arena (the kernel stack follows).
pub const KERNEL_HEAP_END: u32 = 0xC2C0_0000;

/// Ring-0 stack (32 KiB under the TSS contract).
pub const KERNEL_STACK_BOTTOM: u32 = 0xC2C0_0000;
pub const KERNEL_STACK_TOP: u32 = 0xC2C0_8000;

/// Framebuffer MMIO window (page-directory entry 896).
pub const FRAMEBUFFER_VIRT_BASE: u32 = 0xE000_0000;
pub const FRAMEBUFFER_PHYS_BASE: u32 = 0xFD00_0000;
pub const FRAMEBUFFER_SIZE: u32 = 0x40_0000;

/// User address-space contract.
pub const USER_CODE_START: u32 = 0x0000_0000;
pub const USER_BSS_END: u32 = 0x3FFF_FFFF;
pub const USER_HEAP_START: u32 = 0x4000_0000;
pub const USER_HEAP_END: u32 = 0xBFBF_FFFF;
pub const USER_STACK_BOTTOM: u32 = 0xBFC0_0000;
pub const USER_STACK_END: u32 = 0xBFFF_FFFF;
pub const USER_STACK_SIZE: u32 = 0x40_0000;

/// Translate a higher-half virtual address to physical.
pub const fn v2p(virt: u32) -> u32 {
    virt.wrapping_sub(KERNEL_VIRTUAL_START)
}

/// Translate a physical address into the higher-half window.
pub const fn p2v(phys: u32) -> u32 {
    phys.wrapping_add(KERNEL_VIRTUAL_START)
}

/// Page-directory index for a virtual address (top 10 bits).
pub const fn dir_index(virt: u32) -> usize {
    (virt >> 22) as usize
}

/// Page-table index for a virtual address (middle 10 bits).
pub const fn table_index(virt: u32) -> usize {
    ((virt >> 12) & 0x3FF) as usize
}

/// Align down to a 4 MiB boundary.
pub const fn pse_align_down(addr: u32) -> u32 {
    addr & !(PSE_PAGE_SIZE as u32 - 1)
}

/// Align up to a 4 MiB boundary (saturating at the top of the space).
pub const fn pse_align_up(addr: u32) -> u32 {
    match addr.checked_add(PSE_PAGE_SIZE as u32 - 1) {
        Some(sum) => sum & !(PSE_PAGE_SIZE as u32 - 1),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_half_translation_is_a_fixed_offset() {
        assert_eq!(v2p(0xC000_0000), 0);
        assert_eq!(v2p(0xC110_2000), 0x0110_2000);
        assert_eq!(p2v(0x0010_0000), 0xC010_0000);
        assert_eq!(p2v(v2p(0xC2C0_0000)), 0xC2C0_0000);
    }

    #[test]
    fn directory_and_table_indices() {
        assert_eq!(dir_index(0x0000_0000), 0);
        assert_eq!(dir_index(0x0040_0000), 1);
        assert_eq!(dir_index(KERNEL_VIRTUAL_START), 768);
        assert_eq!(dir_index(FRAMEBUFFER_VIRT_BASE), 896);
        assert_eq!(dir_index(USER_STACK_BOTTOM), 767);
        assert_eq!(table_index(0x0000_1000), 1);
        assert_eq!(table_index(0x003F_F000), 1023);
    }

    #[test]
    fn pse_alignment_helpers() {
        assert_eq!(pse_align_down(0x0040_0001), 0x0040_0000);
        assert_eq!(pse_align_down(0x003F_FFFF), 0);
        assert_eq!(pse_align_up(0x0040_0001), 0x0080_0000);
        assert_eq!(pse_align_up(0x0040_0000), 0x0040_0000);
    }

    #[test]
    fn user_regions_tile_the_lower_three_gigabytes() {
        assert_eq!(USER_BSS_END + 1, USER_HEAP_START);
        assert_eq!(USER_HEAP_END + 1, USER_STACK_BOTTOM);
        assert_eq!(USER_STACK_END + 1, KERNEL_VIRTUAL_START);
        assert_eq!(USER_STACK_BOTTOM + USER_STACK_SIZE - 1, USER_STACK_END);
    }
}
