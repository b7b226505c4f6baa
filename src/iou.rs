//! The Cyber 962 Input/Output Unit: a fixed population of 20 PPs and 20
//! channels sharing one CM port.
//!
//! Grounded on `Cyber962IOU.c`/`.h`: "an IOU is assumed to be fully
//! populated, thus no choice is available in how many Peripheral
//! Processors or channels it supports" — this crate reproduces the fixed
//! 20/20 shape rather than making it configurable.

use std::sync::{Arc, Mutex};

use crate::channel::Channel;
use crate::error::Result;
use crate::memory::{CMPort, CentralMemory};
use crate::pp::Pp;
use crate::sync::{ThreadHandle, Worker};

pub const PERIPHERAL_PROCESSOR_COUNT: usize = 20;
pub const CHANNEL_COUNT: usize = 20;

/// Drives one PP's fetch/decode/execute loop on its own thread. A PP has
/// no recoverable-fault surface of its own (spec.md's error table only
/// names CP-level conditions), so unlike [`crate::system::CpWorker`] this
/// worker has nothing to report back beyond the step itself.
struct PpWorker {
    pp: Arc<Mutex<Pp>>,
}

impl Worker for PpWorker {
    fn run_once(&mut self) {
        self.pp.lock().expect("PP mutex poisoned").step();
    }
}

/// A running PP: the shared register/storage state plus the thread
/// driving it.
pub struct PeripheralProcessorHandle {
    pp: Arc<Mutex<Pp>>,
    thread: ThreadHandle,
}

impl PeripheralProcessorHandle {
    pub fn start(&self) {
        self.thread.start();
    }

    pub fn stop(&self) {
        self.thread.stop();
    }

    pub fn terminate(&self) {
        self.thread.terminate();
    }

    /// Locks and returns a clone of the current `A`/`P`/`R` snapshot.
    /// Exposed for the same reason `Cyber962GetInputOutputUnit` exists in
    /// the original: a host needs to observe processor state without
    /// owning it.
    pub fn with_pp<T>(&self, f: impl FnOnce(&Pp) -> T) -> T {
        f(&self.pp.lock().expect("PP mutex poisoned"))
    }

    /// As [`PeripheralProcessorHandle::with_pp`], but for mutating access.
    pub fn with_pp_mut<T>(&self, f: impl FnOnce(&mut Pp) -> T) -> T {
        f(&mut self.pp.lock().expect("PP mutex poisoned"))
    }
}

pub struct Iou {
    index: usize,
    peripheral_processors: Vec<PeripheralProcessorHandle>,
    channels: Arc<Vec<Mutex<Channel>>>,
    cm_port: Arc<CMPort>,
}

impl Iou {
    /// `port_index` is this IOU's index into the system's CM port array
    /// (assigned by [`crate::system::System::create`], after the CP ports).
    pub(crate) fn new(cm: Arc<CentralMemory>, port_index: usize, iou_index: usize) -> Result<Iou> {
        let cm_port = Arc::new(CMPort::new(cm, port_index));
        let channels: Arc<Vec<Mutex<Channel>>> =
            Arc::new((0..CHANNEL_COUNT).map(|_| Mutex::new(Channel::new())).collect());

        let mut peripheral_processors = Vec::with_capacity(PERIPHERAL_PROCESSOR_COUNT);
        for pp_index in 0..PERIPHERAL_PROCESSOR_COUNT {
            let mut pp = Pp::new(cm_port.clone());
            pp.attach_channels(channels.clone());
            let pp = Arc::new(Mutex::new(pp));

            let thread = ThreadHandle::spawn(
                format!("iou{iou_index}-pp{pp_index}"),
                PpWorker { pp: pp.clone() },
            )?;

            peripheral_processors.push(PeripheralProcessorHandle { pp, thread });
        }

        Ok(Iou {
            index: iou_index,
            peripheral_processors,
            channels,
            cm_port,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn peripheral_processor(&self, index: usize) -> Option<&PeripheralProcessorHandle> {
        self.peripheral_processors.get(index)
    }

    pub fn peripheral_processors(&self) -> &[PeripheralProcessorHandle] {
        &self.peripheral_processors
    }

    pub fn channel(&self, index: usize) -> Option<&Mutex<Channel>> {
        self.channels.get(index)
    }

    pub fn cm_port(&self) -> &Arc<CMPort> {
        &self.cm_port
    }

    /// Starts every PP in this IOU.
    pub fn start_all(&self) {
        for pp in &self.peripheral_processors {
            pp.start();
        }
    }

    pub fn stop_all(&self) {
        for pp in &self.peripheral_processors {
            pp.stop();
        }
    }
}
