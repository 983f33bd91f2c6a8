//! PS/2 keyboard driver
//!
//! IRQ1 reads one scancode and stages it in a global FIFO; nothing else
//! happens in interrupt context. [`dispatch_pending`] later drains the
//! staging FIFO, decodes set-1 scancodes through the `pc_keyboard` crate
//! (make/break tracking, shift/caps state) and pushes the resulting
//! ASCII bytes into the foreground process's keyboard buffer, waking any
//! task blocked on [`WaitReason::Keyboard`].

use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

use crate::ds::Fifo;
use crate::process::task::WaitReason;
use crate::sync::IrqLock;

/// Raw scancode staging between IRQ context and the dispatch step.
static SCANCODES: IrqLock<Fifo<128>> = IrqLock::new(Fifo::new());

/// Scancode decoder state (modifiers, multi-byte sequences).
static DECODER: Mutex<Option<Keyboard<layouts::Us104Key, ScancodeSet1>>> = Mutex::new(None);

/// IRQ1 body: stage the scancode; a full FIFO drops the byte.
pub fn handle_irq() {
    let scancode = super::ps2::receive();
    push_scancode(scancode);
}

/// Stage one raw scancode.
pub fn push_scancode(scancode: u8) {
    SCANCODES.with(|fifo| {
        let _ = fifo.enqueue(scancode);
    });
}

fn new_decoder() -> Keyboard<layouts::Us104Key, ScancodeSet1> {
    Keyboard::new(
        ScancodeSet1::new(),
        layouts::Us104Key,
        HandleControl::Ignore,
    )
}

/// Run one scancode through a decoder; `Some` only for complete ASCII
/// keystrokes.
fn decode_with(
    keyboard: &mut Keyboard<layouts::Us104Key, ScancodeSet1>,
    scancode: u8,
) -> Option<u8> {
    let event = keyboard.add_byte(scancode).ok().flatten()?;
    match keyboard.process_keyevent(event)? {
        DecodedKey::Unicode(ch) if ch.is_ascii() => Some(ch as u8),
        _ => None,
    }
}

/// Decode a single scancode against the global modifier state.
pub fn decode(scancode: u8) -> Option<u8> {
    let mut guard = DECODER.lock();
    let keyboard = guard.get_or_insert_with(new_decoder);
    decode_with(keyboard, scancode)
}

/// Drain staged scancodes into the foreground process's keyboard buffer.
/// Runs outside interrupt context (scheduler background step and the
/// `sys_read` path). Wakes keyboard waiters when at least one byte
/// arrived.
pub fn dispatch_pending() {
    let mut delivered = false;
    loop {
        let scancode = SCANCODES.with(|fifo| fifo.dequeue());
        let Some(scancode) = scancode else { break };
        if let Some(byte) = decode(scancode) {
            if crate::process::foreground_push(byte) {
                delivered = true;
            }
        }
    }
    if delivered {
        crate::sched::wakeup(WaitReason::Keyboard);
    }
}
