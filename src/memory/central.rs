//! The Central Memory backing store and its coherence protocol.
//!
//! CM owns the linear word store and the single system-wide access lock.
//! It also owns, per port, an optional cache-eviction queue: CP ports have
//! one, IOU ports typically do not (spec.md §4.4). CM never holds a
//! reference to its consumers — [`super::port::CMPort`] is the handle a
//! consumer is given, carrying an `Arc` back to CM plus its port index,
//! which is the "owned container + weak back-reference" idiom spec.md §9
//! calls for to break the CM ↔ CMPort ↔ Cache ↔ CP cycle.

use std::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::sync::Queue;

/// A half-open range of 64-byte cache line addresses, `[start, start +
/// count)`, enqueued onto every other port's eviction queue after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionRange {
    pub start_line: u32,
    pub line_count: u32,
}

const LINE_SIZE: u64 = 64;
const WORD_SIZE: u64 = 8;

struct Port {
    /// `Some` for ports that front a CP cache; `None` for IOU ports, which
    /// have no cache to invalidate.
    eviction_queue: Option<Queue<EvictionRange>>,
}

pub struct CentralMemory {
    storage: Mutex<Vec<u64>>,
    capacity: u64,
    ports: Vec<Port>,
}

impl CentralMemory {
    /// `capacity` is in bytes and must be a positive multiple of 8.
    /// `port_count` must be at least 2 (spec.md §3); `caching_ports` names
    /// which port indices own an eviction queue (normally the CP ports).
    pub fn new(capacity: u64, port_count: usize, caching_ports: &[usize]) -> Result<CentralMemory> {
        if capacity == 0 || capacity % WORD_SIZE != 0 {
            return Err(CoreError::InvalidCapacity(capacity));
        }
        if port_count < 2 || port_count > 5 {
            return Err(CoreError::InvalidConfiguration(format!(
                "port_count must be in 2..=5, got {port_count}"
            )));
        }
        for &index in caching_ports {
            if index >= port_count {
                return Err(CoreError::InvalidPortIndex {
                    index,
                    capacity: port_count,
                });
            }
        }

        let ports = (0..port_count)
            .map(|index| Port {
                eviction_queue: if caching_ports.contains(&index) {
                    Some(Queue::new())
                } else {
                    None
                },
            })
            .collect();

        Ok(CentralMemory {
            storage: Mutex::new(vec![0u64; (capacity / WORD_SIZE) as usize]),
            capacity,
            ports,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    fn check_port_index(&self, index: usize) -> Result<()> {
        if index >= self.ports.len() {
            return Err(CoreError::InvalidPortIndex {
                index,
                capacity: self.ports.len(),
            });
        }
        Ok(())
    }

    pub(super) fn lock_storage(&self) -> std::sync::MutexGuard<'_, Vec<u64>> {
        self.storage.lock().unwrap()
    }

    pub(super) fn eviction_queue(&self, port: usize) -> Option<&Queue<EvictionRange>> {
        self.ports[port].eviction_queue.as_ref()
    }

    /// Enqueues `range` onto every port's eviction queue except
    /// `originating_port`. Called with the storage lock already held, after
    /// the write it documents has landed in `storage`.
    pub(super) fn trigger_cache_evictions_for_range(&self, originating_port: usize, range: EvictionRange) {
        for (index, port) in self.ports.iter().enumerate() {
            if index == originating_port {
                continue;
            }
            if let Some(queue) = &port.eviction_queue {
                log::trace!(
                    "CM: broadcasting eviction range {:?} from port {} to port {}",
                    range,
                    originating_port,
                    index
                );
                queue.enqueue(range);
            }
        }
    }

    pub(super) fn port_in_range(&self, index: usize) -> Result<()> {
        self.check_port_index(index)
    }
}

pub(super) fn line_range_for_span(address: u64, byte_count: u64) -> EvictionRange {
    let start_line = (address / LINE_SIZE) as u32;
    let end_line = ((address + byte_count.max(1) - 1) / LINE_SIZE) as u32;
    EvictionRange {
        start_line,
        line_count: end_line - start_line + 1,
    }
}
