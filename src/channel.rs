//! The I/O channel abstraction: a status register plus an externally
//! attached device hook set.
//!
//! Grounded on `Cyber962IOChannel.c`/`.h`'s status-bit layout and
//! four-function-pointer "device vector", generalized to a trait object —
//! the idiomatic replacement for a C function-pointer table, the same
//! move this crate's `bitflags!` usage borrows from `game_boy/interrupts.rs`.

use bitflags::bitflags;

bitflags! {
    /// Channel status bits, per spec.md §4.8.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelStatus: u8 {
        const ACTIVE = 0b0001;
        const FULL   = 0b0010;
        const FLAG   = 0b0100;
        const ERROR  = 0b1000;
    }
}

/// The host-side device behind a channel. Replaces the original's
/// four-function-pointer attachment vector (`read`/`write`/`control`/
/// `checkState`, all-or-nothing) with a trait object.
pub trait ChannelDevice: Send {
    /// Host-initiated read; returns the number of bytes actually read.
    fn read(&mut self, buf: &mut [u8]) -> usize;
    /// Host-initiated write; returns the number of bytes actually written.
    fn write(&mut self, buf: &[u8]) -> usize;
    /// 12-bit control function issued by a PP's I/O instruction.
    fn control(&mut self, word: u16);
    /// Re-evaluates device state during a long transfer.
    fn check_state(&mut self) -> ChannelStatus;
}

pub struct Channel {
    status: ChannelStatus,
    device: Option<Box<dyn ChannelDevice>>,
}

impl Default for Channel {
    fn default() -> Self {
        Channel::new()
    }
}

impl Channel {
    pub fn new() -> Channel {
        Channel {
            status: ChannelStatus::empty(),
            device: None,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn is_attached(&self) -> bool {
        self.device.is_some()
    }

    /// Attaches a device. Spec.md §4.8 requires all four hooks non-null in
    /// the original vector form; a `Box<dyn ChannelDevice>` is either fully
    /// present or absent, which already enforces that.
    pub fn attach(&mut self, device: Box<dyn ChannelDevice>) {
        self.device = Some(device);
    }

    /// Detaches the device. Only valid in quiescent state (spec.md §4.8);
    /// panics otherwise, since a detach mid-transfer indicates a caller
    /// bug rather than a recoverable runtime condition.
    pub fn detach(&mut self) {
        assert!(
            !self.status.contains(ChannelStatus::ACTIVE),
            "cannot detach a channel while a transfer is active"
        );
        self.device = None;
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        match &mut self.device {
            Some(device) => {
                self.status.insert(ChannelStatus::ACTIVE);
                let n = device.read(buf);
                self.status.remove(ChannelStatus::ACTIVE);
                n
            }
            None => 0,
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> usize {
        match &mut self.device {
            Some(device) => {
                self.status.insert(ChannelStatus::ACTIVE);
                let n = device.write(buf);
                self.status.remove(ChannelStatus::ACTIVE);
                n
            }
            None => 0,
        }
    }

    pub fn control(&mut self, word: u16) {
        if let Some(device) = &mut self.device {
            device.control(word);
        }
    }

    pub fn check_state(&mut self) {
        if let Some(device) = &mut self.device {
            self.status = device.check_state();
        }
    }
}
