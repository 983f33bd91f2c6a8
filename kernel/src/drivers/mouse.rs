//! PS/2 mouse driver
//!
//! IRQ12 feeds one byte per interrupt into a three-state packet decoder.
//! Byte 0 carries the button and sign flags and must have the alignment
//! bit set, or the cycle resets to resynchronize. Byte 2 completes the
//! packet: the 9-bit two's-complement deltas are reconstructed by
//! folding the sign flags in (`flags << 3/4 & 0x100`) and accumulated
//! into the `(x, y)` position.

use bitflags::bitflags;

use crate::sync::IrqLock;

bitflags! {
    /// First-byte packet flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        const LEFT_BUTTON   = 1 << 0;
        const RIGHT_BUTTON  = 1 << 1;
        const MIDDLE_BUTTON = 1 << 2;
        /// Always set in a well-formed first byte.
        const ALIGNED       = 1 << 3;
        const X_SIGN        = 1 << 4;
        const Y_SIGN        = 1 << 5;
        const Y_OVERFLOW    = 1 << 6;
        const X_OVERFLOW    = 1 << 7;
    }
}

/// Sign-extension bit position for the 9-bit deltas.
const SIGN_BIT: i16 = 0x100;

/// Packet decoder and position accumulator.
#[derive(Debug, Default)]
pub struct MouseState {
    pub x: i16,
    pub y: i16,
    cycle: u8,
    flags: PacketFlags,
    x_movement: u8,
}

impl Default for PacketFlags {
    fn default() -> Self {
        PacketFlags::empty()
    }
}

impl MouseState {
    pub const fn new() -> Self {
        Self {
            x: 0,
            y: 0,
            cycle: 0,
            flags: PacketFlags::empty(),
            x_movement: 0,
        }
    }

    pub fn buttons(&self) -> PacketFlags {
        self.flags
            & (PacketFlags::LEFT_BUTTON | PacketFlags::RIGHT_BUTTON | PacketFlags::MIDDLE_BUTTON)
    }

    /// Feed one raw byte from the device.
    pub fn handle_byte(&mut self, byte: u8) {
        match self.cycle {
            0 => {
                let flags = PacketFlags::from_bits_truncate(byte);
                // A cleared alignment bit means we are mid-packet;
                // restart the cycle to resynchronize.
                if !flags.contains(PacketFlags::ALIGNED) {
                    self.cycle = 0;
                    return;
                }
                self.flags = flags;
                self.cycle = 1;
            }
            1 => {
                self.x_movement = byte;
                self.cycle = 2;
            }
            _ => {
                let y_movement = byte;
                if !self.flags.contains(PacketFlags::X_OVERFLOW)
                    || !self.flags.contains(PacketFlags::Y_OVERFLOW)
                {
                    let delta_x =
                        self.x_movement as i16 - (((self.flags.bits() as i16) << 4) & SIGN_BIT);
                    let delta_y = y_movement as i16 - (((self.flags.bits() as i16) << 3) & SIGN_BIT);
                    self.x = self.x.wrapping_add(delta_x);
                    self.y = self.y.wrapping_add(delta_y);
                }
                self.cycle = 0;
            }
        }
    }
}

/// Global decoder state fed from IRQ12.
pub static MOUSE: IrqLock<MouseState> = IrqLock::new(MouseState::new());

/// IRQ12 body: pull the byte and advance the packet state machine.
pub fn handle_irq() {
    let byte = super::ps2::receive();
    MOUSE.with(|mouse| mouse.handle_byte(byte));
}

/// Enable the auxiliary device and data reporting.
pub fn init() {
    super::ps2::init_mouse();
    log::info!("mouse: ps/2 auxiliary device enabled");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(mouse: &mut MouseState, packet: [u8; 3]) {
        for byte in packet {
            mouse.handle_byte(byte);
        }
    }

    #[test]
    fn positive_deltas_accumulate() {
        let mut mouse = MouseState::new();
        feed(&mut mouse, [PacketFlags::ALIGNED.bits(), 10, 5]);
        assert_eq!((mouse.x, mouse.y), (10, 5));
        feed(&mut mouse, [PacketFlags::ALIGNED.bits(), 1, 2]);
        assert_eq!((mouse.x, mouse.y), (11, 7));
    }

    #[test]
    fn sign_bits_make_deltas_negative() {
        let mut mouse = MouseState::new();
        // delta_x = -2: raw 0xFE with X_SIGN set (0xFE - 0x100).
        let flags = PacketFlags::ALIGNED | PacketFlags::X_SIGN;
        feed(&mut mouse, [flags.bits(), 0xFE, 0]);
        assert_eq!((mouse.x, mouse.y), (-2, 0));
        // delta_y = -1.
        let flags = PacketFlags::ALIGNED | PacketFlags::Y_SIGN;
        feed(&mut mouse, [flags.bits(), 0, 0xFF]);
        assert_eq!((mouse.x, mouse.y), (-2, -1));
    }

    #[test]
    fn misaligned_first_byte_resets_the_cycle() {
        let mut mouse = MouseState::new();
        // Garbage without the alignment bit is discarded...
        mouse.handle_byte(0x00);
        mouse.handle_byte(0x04);
        // ...and a proper packet afterwards still decodes.
        feed(&mut mouse, [PacketFlags::ALIGNED.bits(), 3, 4]);
        assert_eq!((mouse.x, mouse.y), (3, 4));
    }

    #[test]
    fn buttons_are_reported_from_the_flags_byte() {
        let mut mouse = MouseState::new();
        let flags = PacketFlags::ALIGNED | PacketFlags::LEFT_BUTTON;
        feed(&mut mouse, [flags.bits(), 0, 0]);
        assert!(mouse.buttons().contains(PacketFlags::LEFT_BUTTON));
        assert!(!mouse.buttons().contains(PacketFlags::RIGHT_BUTTON));
    }

    #[test]
    fn double_overflow_packets_do_not_move_the_pointer() {
        let mut mouse = MouseState::new();
        let flags = PacketFlags::ALIGNED | PacketFlags::X_OVERFLOW | PacketFlags::Y_OVERFLOW;
        feed(&mut mouse, [flags.bits(), 100, 100]);
        assert_eq!((mouse.x, mouse.y), (0, 0));
    }
}
