//! Small kernel data structures.

pub mod fifo;

pub use fifo::Fifo;
