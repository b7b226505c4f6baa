//! System assembly: the crate's single public entry point.
//!
//! Grounded on `Cyber962.c`/`.h`'s `Cyber962Create`: validate every
//! construction constraint from spec.md §6 before any side effect (before
//! `CentralMemory::new`, before any thread is spawned), then wire CM ports
//! to CPs first and IOUs second, exactly as the original's port-assignment
//! loop order (`for cp ...` before `for iou ...`).

use std::sync::{Arc, Mutex};

use crate::cp::Cp;
use crate::error::{CoreError, Fault, Result};
use crate::iou::Iou;
use crate::memory::{CMPort, CentralMemory};
use crate::sync::{ThreadHandle, Worker};

const MIB: u64 = 1024 * 1024;
const VALID_MEMORY_SIZES_MIB: [u64; 4] = [64, 128, 192, 256];

/// Construction parameters for a [`System`], per spec.md §6's
/// `createSystem(id, memoryBytes, centralProcessors, ioUnits)`.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub identifier: String,
    pub memory_bytes: u64,
    pub central_processors: usize,
    pub input_output_units: usize,
}

/// Drives one CP's fetch/decode/execute loop. Unlike a PP, a CP can raise
/// a [`Fault`] (spec.md §7); the most recent one is latched here so a host
/// polling between `run_once` iterations can observe it without the
/// worker thread needing any callback back into application code.
pub(crate) struct CpWorker {
    cp: Arc<Mutex<Cp>>,
    last_fault: Arc<Mutex<Option<Fault>>>,
}

impl Worker for CpWorker {
    fn run_once(&mut self) {
        let outcome = self.cp.lock().expect("CP mutex poisoned").step();
        if let Err(fault) = outcome {
            log::warn!("CP fault: {fault:?}");
            *self.last_fault.lock().expect("fault mutex poisoned") = Some(fault);
        }
    }
}

/// A running CP: its register/cache state plus the thread driving it.
pub struct CentralProcessorHandle {
    cp: Arc<Mutex<Cp>>,
    last_fault: Arc<Mutex<Option<Fault>>>,
    thread: ThreadHandle,
}

impl CentralProcessorHandle {
    pub fn start(&self) {
        self.thread.start();
    }

    pub fn stop(&self) {
        self.thread.stop();
    }

    pub fn terminate(&self) {
        self.thread.terminate();
    }

    pub fn with_cp<T>(&self, f: impl FnOnce(&Cp) -> T) -> T {
        f(&self.cp.lock().expect("CP mutex poisoned"))
    }

    /// As [`CentralProcessorHandle::with_cp`], but for mutating access —
    /// driving a CP's fetch/decode/execute loop or byte I/O directly from
    /// a host that isn't going through `start()`/`stop()`.
    pub fn with_cp_mut<T>(&self, f: impl FnOnce(&mut Cp) -> T) -> T {
        f(&mut self.cp.lock().expect("CP mutex poisoned"))
    }

    /// The most recent [`Fault`] raised by this CP's loop, if any. Per
    /// spec.md §7, the core does not retry a fault on its own; a host
    /// reads this, decides what to do (stop the CP, log it, terminate
    /// the system), and acts.
    pub fn last_fault(&self) -> Option<Fault> {
        *self.last_fault.lock().expect("fault mutex poisoned")
    }
}

/// A constructed, not-yet-necessarily-running Cyber 962 system: one
/// Central Memory, 1-2 Central Processors, 1-3 I/O Units.
pub struct System {
    identifier: String,
    central_memory: Arc<CentralMemory>,
    central_processors: Vec<CentralProcessorHandle>,
    input_output_units: Vec<Iou>,
}

impl System {
    /// Validates `config` against spec.md §6's construction constraints
    /// and, if valid, builds the Central Memory, spawns one thread per CP
    /// and one thread per PP across all IOUs (every thread starts
    /// `Stopped`; call [`System::start_all`] or start processors
    /// individually).
    pub fn create(config: SystemConfig) -> Result<System> {
        if config.identifier.trim().is_empty() {
            return Err(CoreError::InvalidConfiguration("identifier must not be empty".into()));
        }
        if !VALID_MEMORY_SIZES_MIB.contains(&(config.memory_bytes / MIB)) || config.memory_bytes % MIB != 0 {
            return Err(CoreError::InvalidConfiguration(format!(
                "memory_bytes must be one of {{64,128,192,256}} MiB, got {}",
                config.memory_bytes
            )));
        }
        if !(1..=2).contains(&config.central_processors) {
            return Err(CoreError::InvalidConfiguration(format!(
                "central_processors must be 1 or 2, got {}",
                config.central_processors
            )));
        }
        if !(1..=3).contains(&config.input_output_units) {
            return Err(CoreError::InvalidConfiguration(format!(
                "input_output_units must be 1 to 3, got {}",
                config.input_output_units
            )));
        }

        let port_count = config.central_processors + config.input_output_units;
        let caching_ports: Vec<usize> = (0..config.central_processors).collect();
        let central_memory = Arc::new(CentralMemory::new(config.memory_bytes, port_count, &caching_ports)?);

        let mut central_processors = Vec::with_capacity(config.central_processors);
        for cp_index in 0..config.central_processors {
            let port = CMPort::new(central_memory.clone(), cp_index);
            let cp = Arc::new(Mutex::new(Cp::new(port)));
            let last_fault = Arc::new(Mutex::new(None));

            let thread = ThreadHandle::spawn(
                format!("{}-cp{cp_index}", config.identifier),
                CpWorker {
                    cp: cp.clone(),
                    last_fault: last_fault.clone(),
                },
            )?;

            central_processors.push(CentralProcessorHandle { cp, last_fault, thread });
        }

        let iou_port_base = config.central_processors;
        let mut input_output_units = Vec::with_capacity(config.input_output_units);
        for iou_index in 0..config.input_output_units {
            input_output_units.push(Iou::new(
                central_memory.clone(),
                iou_port_base + iou_index,
                iou_index,
            )?);
        }

        Ok(System {
            identifier: config.identifier,
            central_memory,
            central_processors,
            input_output_units,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn central_memory(&self) -> &Arc<CentralMemory> {
        &self.central_memory
    }

    pub fn central_processor(&self, index: usize) -> Option<&CentralProcessorHandle> {
        self.central_processors.get(index)
    }

    pub fn input_output_unit(&self, index: usize) -> Option<&Iou> {
        self.input_output_units.get(index)
    }

    /// Starts every CP and every PP in the system.
    pub fn start_all(&self) {
        for cp in &self.central_processors {
            cp.start();
        }
        for iou in &self.input_output_units {
            iou.start_all();
        }
    }

    pub fn stop_all(&self) {
        for cp in &self.central_processors {
            cp.stop();
        }
        for iou in &self.input_output_units {
            iou.stop_all();
        }
    }
}
