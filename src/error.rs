//! Error types surfaced by the core.
//!
//! Two distinct kinds of failure exist here. [`CoreError`] covers
//! construction-time failures (bad configuration, an OS that refuses to
//! hand out a thread) and is returned from `Result`-returning constructors.
//! [`Fault`] covers the conditions a running processor can hit mid-stream —
//! an illegal opcode, a misaligned address — which the ISA this core
//! emulates treats as interrupts into monitor mode. Since exchange-jump
//! itself is out of scope, a `Fault` is reported to the caller instead of
//! silently vanishing into an unimplemented interrupt handler.

use thiserror::Error;

/// Shorthand for construction-time fallible results.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failures that can occur while building or growing the system.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("central memory capacity {0} is not a positive multiple of 8 bytes")]
    InvalidCapacity(u64),

    #[error("port index {index} out of range (capacity is {capacity} ports)")]
    InvalidPortIndex { index: usize, capacity: usize },

    #[error("invalid system configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to start worker thread: {0}")]
    ResourceExhaustion(#[from] std::io::Error),
}

/// A condition raised by a running processor that spec.md's target ISA
/// handles via exchange-jump into monitor mode. Exchange-jump is out of
/// scope for this core, so these are reported up through the processor's
/// step/run API instead of being silently dispatched to a handler that
/// doesn't exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The CP decoder found no handler at all for this opcode byte.
    IllegalInstruction { pc: u64, opcode: u8 },
    /// A load/store address failed an alignment or range check.
    AddressSpecification { pc: u64, address: u64 },
    /// `ISOM`/`ISOB` with `pos + len > 63`.
    InstructionSpecification { pc: u64 },
    /// The opcode is a real, named opcode this core recognizes but has not
    /// implemented (floating point, exchange jump, `CALLREL`, ...).
    NotImplemented { pc: u64, opcode: u8 },
}
