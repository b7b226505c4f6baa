//! Execution core for a CDC Cyber 962 mainframe emulator: Central Memory
//! and its coherence protocol, the Cyber 180 Central Processor, the
//! Cyber 962 Peripheral Processor, and the I/O Unit that hosts them.
//!
//! This crate is the execution substrate only. Device emulations (tape,
//! disk, console, terminals), system configuration/assembly tooling
//! beyond [`System::create`], and an operating-system image are the
//! responsibility of a host application; see `System`/`Iou`/`Channel` for
//! the seams they plug into.

pub mod cache;
pub mod channel;
pub mod cp;
pub mod error;
pub mod iou;
pub mod memory;
pub mod pp;
pub mod sync;
pub mod system;

pub use error::{CoreError, Fault};
pub use system::{System, SystemConfig};
