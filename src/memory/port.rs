//! Per-consumer handles into [`CentralMemory`].
//!
//! A port never holds storage; it is a thin handle carrying an `Arc` back
//! to the memory it fronts plus its own index. Grounded on
//! `Cyber180CMPort.c`'s `ReadBytesPhysical`/`WriteBytesPhysical`/
//! `ReadWordsPhysical`/`WriteWordsPhysical`, including the `firstWord` /
//! `firstOffset` byte-addressing split used there.

use std::sync::{Arc, MutexGuard};

use super::central::{line_range_for_span, CentralMemory, EvictionRange};
use crate::sync::Queue;

const WORD_SIZE: u64 = 8;

pub struct CMPort {
    cm: Arc<CentralMemory>,
    index: usize,
}

impl CMPort {
    pub(crate) fn new(cm: Arc<CentralMemory>, index: usize) -> CMPort {
        cm.port_in_range(index).expect("port index validated at construction");
        CMPort { cm, index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The eviction queue this port drains from, if it owns one (CP ports
    /// do; IOU ports typically don't).
    pub fn eviction_queue(&self) -> Option<&Queue<EvictionRange>> {
        self.cm.eviction_queue(self.index)
    }

    fn bounds_check(&self, address: u64, byte_count: u64) {
        let capacity = self.cm.capacity();
        assert!(address < capacity, "CM access at {address:#x} exceeds capacity {capacity:#x}");
        assert!(
            address.checked_add(byte_count).map(|end| end <= capacity).unwrap_or(false),
            "CM access [{address:#x}, +{byte_count:#x}) would roll over past capacity {capacity:#x}"
        );
    }

    pub fn read_bytes_physical(&self, address: u64, buf: &mut [u8]) {
        self.bounds_check(address, buf.len() as u64);
        let storage = self.cm.lock_storage();
        read_bytes(&storage, address, buf);
    }

    pub fn write_bytes_physical(&self, address: u64, buf: &[u8]) {
        self.bounds_check(address, buf.len() as u64);
        let mut storage = self.cm.lock_storage();
        write_bytes(&mut storage, address, buf);
        drop(storage);
        self.cm
            .trigger_cache_evictions_for_range(self.index, line_range_for_span(address, buf.len() as u64));
    }

    pub fn read_words_physical(&self, address: u64, buf: &mut [u64]) {
        assert_eq!(address % WORD_SIZE, 0, "word access must be 8-byte aligned");
        self.bounds_check(address, buf.len() as u64 * WORD_SIZE);
        let storage = self.cm.lock_storage();
        let first = (address / WORD_SIZE) as usize;
        buf.copy_from_slice(&storage[first..first + buf.len()]);
    }

    pub fn write_words_physical(&self, address: u64, buf: &[u64]) {
        assert_eq!(address % WORD_SIZE, 0, "word access must be 8-byte aligned");
        self.bounds_check(address, buf.len() as u64 * WORD_SIZE);
        {
            let mut storage = self.cm.lock_storage();
            let first = (address / WORD_SIZE) as usize;
            storage[first..first + buf.len()].copy_from_slice(buf);
        }
        self.cm.trigger_cache_evictions_for_range(
            self.index,
            line_range_for_span(address, buf.len() as u64 * WORD_SIZE),
        );
    }

    /// Opens a transaction: the storage lock is held for the lifetime of
    /// the returned guard, matching spec.md §4.6's "acquire the CMPort lock
    /// for the entire transaction" requirement for CP byte I/O.
    pub fn begin_transaction(&self) -> CmTransaction<'_> {
        CmTransaction {
            storage: self.cm.lock_storage(),
            cm: &self.cm,
            port_index: self.index,
        }
    }
}

/// A held lock over CM storage, used to perform several unlocked
/// operations without releasing and reacquiring the system-wide lock
/// between them.
pub struct CmTransaction<'a> {
    storage: MutexGuard<'a, Vec<u64>>,
    cm: &'a CentralMemory,
    port_index: usize,
}

impl<'a> CmTransaction<'a> {
    pub fn read_word_unlocked(&self, address: u64) -> u64 {
        debug_assert_eq!(address % WORD_SIZE, 0);
        self.storage[(address / WORD_SIZE) as usize]
    }

    pub fn write_word_unlocked(&mut self, address: u64, value: u64) {
        debug_assert_eq!(address % WORD_SIZE, 0);
        self.storage[(address / WORD_SIZE) as usize] = value;
    }

    pub fn read_bytes_unlocked(&self, address: u64, buf: &mut [u8]) {
        read_bytes(&self.storage, address, buf);
    }

    pub fn write_bytes_unlocked(&mut self, address: u64, buf: &[u8]) {
        write_bytes(&mut self.storage, address, buf);
    }

    pub fn trigger_cache_evictions_for_line_range(&mut self, start_line: u32, line_count: u32) {
        self.cm.trigger_cache_evictions_for_range(
            self.port_index,
            EvictionRange { start_line, line_count },
        );
    }
}

fn read_bytes(storage: &[u64], address: u64, buf: &mut [u8]) {
    let mut word_index = (address / WORD_SIZE) as usize;
    let mut offset = (address % WORD_SIZE) as usize;
    for b in buf.iter_mut() {
        *b = storage[word_index].to_ne_bytes()[offset];
        offset += 1;
        if offset == WORD_SIZE as usize {
            offset = 0;
            word_index += 1;
        }
    }
}

fn write_bytes(storage: &mut [u64], address: u64, buf: &[u8]) {
    let mut word_index = (address / WORD_SIZE) as usize;
    let mut offset = (address % WORD_SIZE) as usize;
    for &b in buf {
        let mut word_bytes = storage[word_index].to_ne_bytes();
        word_bytes[offset] = b;
        storage[word_index] = u64::from_ne_bytes(word_bytes);
        offset += 1;
        if offset == WORD_SIZE as usize {
            offset = 0;
            word_index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::CentralMemory;

    fn port_pair() -> (CMPort, CMPort) {
        let cm = Arc::new(CentralMemory::new(64 * 1024, 2, &[0, 1]).unwrap());
        (CMPort::new(cm.clone(), 0), CMPort::new(cm, 1))
    }

    #[test]
    fn word_write_then_read_round_trips() {
        let (writer, _) = port_pair();
        writer.write_words_physical(0x40, &[0x0102_0304_0506_0708]);
        let mut out = [0u64; 1];
        writer.read_words_physical(0x40, &mut out);
        assert_eq!(out[0], 0x0102_0304_0506_0708);
    }

    #[test]
    fn byte_write_then_read_round_trips_across_word_boundary() {
        let (writer, _) = port_pair();
        let data: Vec<u8> = (0u8..20).collect();
        writer.write_bytes_physical(5, &data);
        let mut out = vec![0u8; 20];
        writer.read_bytes_physical(5, &mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn write_through_one_port_notifies_other_ports_eviction_queue() {
        let (writer, other) = port_pair();
        writer.write_bytes_physical(0x30, &[0xAB; 100]);

        let range = other.eviction_queue().unwrap().try_dequeue().unwrap();
        assert_eq!(range.start_line, 0);
        assert_eq!(range.line_count, 2);
        assert!(writer.eviction_queue().unwrap().try_dequeue().is_none());
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_access_panics() {
        let (writer, _) = port_pair();
        let mut out = [0u8; 8];
        writer.read_bytes_physical(64 * 1024, &mut out);
    }
}
