//! PS/2 controller glue
//!
//! Byte-level send/receive on the 8042 controller plus the mouse
//! auxiliary-device enable sequence. The keyboard and mouse IRQ handlers
//! pull their raw bytes through [`receive`].

#![allow(dead_code)]

use crate::arch::x86::port::{inb, outb};

pub const DATA_PORT: u16 = 0x60;
pub const STATUS_COMMAND_PORT: u16 = 0x64;

/// Status bit: output buffer full (data readable).
const STATUS_OUTPUT_FULL: u8 = 1 << 0;
/// Status bit: input buffer full (controller busy).
const STATUS_INPUT_FULL: u8 = 1 << 1;

// Mouse command set.
const MOUSE_ENABLE_AUX: u8 = 0xA8;
const MOUSE_GET_COMPAQ_STATUS: u8 = 0x20;
const MOUSE_SET_COMPAQ_STATUS: u8 = 0x60;
const MOUSE_SEND_COMMAND: u8 = 0xD4;
const MOUSE_SET_DEFAULT: u8 = 0xF6;
const MOUSE_ENABLE_DATA_REPORT: u8 = 0xF4;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod imp {
    use super::*;

    /// Wait until the controller has a byte, then read it.
    pub fn receive() -> u8 {
        // SAFETY: status polling then a data read, per the 8042 protocol.
        unsafe {
            while inb(STATUS_COMMAND_PORT) & STATUS_OUTPUT_FULL == 0 {
                core::hint::spin_loop();
            }
            inb(DATA_PORT)
        }
    }

    /// Wait for the controller input buffer, then write `value` to
    /// `port`.
    pub fn send(port: u16, value: u8) {
        // SAFETY: see `receive`.
        unsafe {
            while inb(STATUS_COMMAND_PORT) & STATUS_INPUT_FULL != 0 {
                core::hint::spin_loop();
            }
            outb(port, value);
        }
    }

    /// Enable the auxiliary device, its IRQ line and data reporting.
    pub fn init_mouse() {
        send(STATUS_COMMAND_PORT, MOUSE_ENABLE_AUX);

        send(STATUS_COMMAND_PORT, MOUSE_GET_COMPAQ_STATUS);
        let status = receive() | 0b10; // IRQ12 enable
        send(STATUS_COMMAND_PORT, MOUSE_SET_COMPAQ_STATUS);
        send(DATA_PORT, status);

        send(STATUS_COMMAND_PORT, MOUSE_SEND_COMMAND);
        send(DATA_PORT, MOUSE_SET_DEFAULT);
        receive();

        send(STATUS_COMMAND_PORT, MOUSE_SEND_COMMAND);
        send(DATA_PORT, MOUSE_ENABLE_DATA_REPORT);
        receive();
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod imp {
    pub fn receive() -> u8 {
        0
    }
    pub fn send(_port: u16, _value: u8) {}
    pub fn init_mouse() {}
}

pub use imp::{init_mouse, receive, send};
