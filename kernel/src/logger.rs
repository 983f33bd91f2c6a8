//! Kernel logger
//!
//! Wires the `log` facade to the serial console. Every subsystem logs
//! through `log::info!` and friends; the level filter is fixed at init.

use log::{LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::serial::_print(format_args!(
            "[{:5}] {}\n",
            record.level(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// Install the logger. Later calls are ignored.
pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
