//! The Cyber 962 Peripheral Processor: a 16-bit word-addressed processor
//! with 8 KW of local storage and a 12-bit opcode instruction set.

pub mod decode;
pub mod execute;
pub mod registers;

use std::sync::{Arc, Mutex};

use crate::channel::Channel;
use crate::memory::CMPort;
use registers::Registers;

/// A PP's barrel index, used to restrict which channels it may address in
/// implementations that enforce spec.md §4.7's barrel grouping policy.
pub fn barrel_index(pp_index: usize) -> usize {
    pp_index % 5
}

pub struct Pp {
    pub registers: Registers,
    /// The IOU's single shared CM port — spec.md §3 gives each PP "a
    /// non-owning IOU handle"; since the only IOU service a PP's
    /// instruction set reaches is CM access, this holds that handle
    /// directly rather than a full back-reference to the IOU.
    cm_port: Arc<CMPort>,
    /// The IOU's channels, shared across all of its PPs. `None` until
    /// [`Pp::attach_channels`] is called (the IOU wires this up at
    /// construction).
    channels: Option<Arc<Vec<Mutex<Channel>>>>,
}

impl Pp {
    pub fn new(cm_port: Arc<CMPort>) -> Pp {
        Pp {
            registers: Registers::new(),
            cm_port,
            channels: None,
        }
    }

    pub fn attach_channels(&mut self, channels: Arc<Vec<Mutex<Channel>>>) {
        self.channels = Some(channels);
    }

    /// Runs one fetch/decode/execute cycle.
    pub fn step(&mut self) {
        let word = self.registers.read(self.registers.p);
        let opcode = decode::opcode(word);
        let group = decode::classify(opcode);
        if let Some(advance) = execute::dispatch(self, group, word) {
            self.registers.p = self.registers.p.wrapping_add(advance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::CentralMemory;

    #[test]
    fn reset_then_step_over_pass_advances_p_by_one() {
        let cm = Arc::new(CentralMemory::new(64 * 1024, 2, &[]).unwrap());
        let mut pp = Pp::new(Arc::new(CMPort::new(cm, 0)));
        let start = pp.registers.p;
        pp.registers.write(start, 0); // opcode 0 -> Pass
        pp.step();
        assert_eq!(pp.registers.p, start.wrapping_add(1));
    }

    #[test]
    fn barrel_index_wraps_modulo_5() {
        assert_eq!(barrel_index(0), 0);
        assert_eq!(barrel_index(4), 4);
        assert_eq!(barrel_index(5), 0);
        assert_eq!(barrel_index(19), 4);
    }
}
