//! The Cyber 180 Central Processor: a threaded, cache-backed, big-endian
//! byte-addressed execution unit.

pub mod address;
pub mod decode;
pub mod execute;
pub mod registers;

use crate::cache::{Cache, LINE_SIZE};
use crate::error::Fault;
use crate::memory::CMPort;
use decode::Instruction;
use registers::Registers;

/// Sentinel advance value meaning "the handler already set `P` itself"
/// (branches) rather than "advance `P` by this many bytes" — spec.md §4.6's
/// "advance of `~0`".
pub const BRANCHED: u8 = u8::MAX;

/// Byte-swaps a 64-bit word. `LX`/`SX` and friends don't need this
/// themselves — they read/write through the cache-backed byte path, whose
/// `to_be_bytes`/`from_be_bytes` already preserve address-order layout
/// regardless of host endianness — but any future fast path that reads a
/// CM word directly (bypassing the byte-granular cache interface) will
/// need exactly this conversion. Named for the original's
/// `Cyber180CMWord64Swap`; kept isolated and unit-tested per spec.md §9's
/// endianness note.
pub fn swap_word64(value: u64) -> u64 {
    value.swap_bytes()
}

pub struct Cp {
    pub registers: Registers,
    cache: Cache,
    port: CMPort,
}

impl Cp {
    pub fn new(port: CMPort) -> Cp {
        Cp {
            registers: Registers::new(),
            cache: Cache::new(),
            port,
        }
    }

    /// Reports whether this CP's cache currently holds the line covering
    /// `rma`, without going through CM. Exposed for the coherence
    /// properties spec.md §8 asks callers to verify directly (e.g. "CP1's
    /// cache contains no line whose address intersects R until Q performs
    /// a transaction").
    pub fn cache_contains_line(&mut self, rma: u64) -> bool {
        self.cache.get_line_for_address(rma as u32)
    }

    /// Runs one fetch/decode/execute cycle, returning the fault raised (if
    /// any) without advancing `P` further.
    pub fn step(&mut self) -> Result<(), Fault> {
        let pc = self.registers.p;

        let mut opcode_byte = [0u8; 1];
        self.read_bytes(pc, &mut opcode_byte)?;
        let length = decode::instruction_length(opcode_byte[0]);

        let mut bytes = [0u8; 4];
        self.read_bytes(pc, &mut bytes[..length as usize])?;
        let instruction = Instruction::decode(&bytes[..length as usize]);

        let advance = execute::dispatch(self, &instruction, pc)?;
        if advance != BRANCHED {
            self.registers.p = self.registers.p.wrapping_add(advance as u64);
        }
        Ok(())
    }

    /// Reads `buf.len()` bytes starting at PVA `pva`, per spec.md §4.6's
    /// byte-I/O-with-cache-interaction procedure: drain pending
    /// invalidations, then for each covered line, hit the cache or load
    /// from CM and insert.
    pub fn read_bytes(&mut self, pva: u64, buf: &mut [u8]) -> Result<(), Fault> {
        if buf.is_empty() {
            return Ok(());
        }

        let mut transaction = self.port.begin_transaction();
        if let Some(queue) = self.port.eviction_queue() {
            self.cache.process_eviction_queue(queue);
        }

        let span_start = pva;
        let span_end = pva + buf.len() as u64;
        let mut line_start = span_start & !(LINE_SIZE as u64 - 1);

        while line_start < span_end {
            let rma = address::translate(line_start) as u64;
            let mut line_buf = [0u8; LINE_SIZE];

            if !self.cache.get_data_for_address(rma as u32, &mut line_buf) {
                transaction.read_bytes_unlocked(rma, &mut line_buf);
                self.cache.add_or_update_data_for_address(rma as u32, &line_buf);
            }

            let overlap_start = line_start.max(span_start);
            let overlap_end = (line_start + LINE_SIZE as u64).min(span_end);
            let line_offset = (overlap_start - line_start) as usize;
            let buf_offset = (overlap_start - span_start) as usize;
            let len = (overlap_end - overlap_start) as usize;
            buf[buf_offset..buf_offset + len].copy_from_slice(&line_buf[line_offset..line_offset + len]);

            line_start += LINE_SIZE as u64;
        }

        Ok(())
    }

    /// Writes `buf` starting at PVA `pva`. Lines fully covered by the span
    /// skip the load (they're entirely overwritten); the first and last
    /// lines are read first and patched, since they may be partial.
    pub fn write_bytes(&mut self, pva: u64, buf: &[u8]) -> Result<(), Fault> {
        if buf.is_empty() {
            return Ok(());
        }

        let mut transaction = self.port.begin_transaction();
        if let Some(queue) = self.port.eviction_queue() {
            self.cache.process_eviction_queue(queue);
        }

        let span_start = pva;
        let span_end = pva + buf.len() as u64;
        let mut line_start = span_start & !(LINE_SIZE as u64 - 1);

        while line_start < span_end {
            let rma = address::translate(line_start) as u64;
            let mut line_buf = [0u8; LINE_SIZE];

            let fully_covered = line_start >= span_start && line_start + LINE_SIZE as u64 <= span_end;
            if !fully_covered {
                if !self.cache.get_data_for_address(rma as u32, &mut line_buf) {
                    transaction.read_bytes_unlocked(rma, &mut line_buf);
                }
            }

            let overlap_start = line_start.max(span_start);
            let overlap_end = (line_start + LINE_SIZE as u64).min(span_end);
            let line_offset = (overlap_start - line_start) as usize;
            let buf_offset = (overlap_start - span_start) as usize;
            let len = (overlap_end - overlap_start) as usize;
            line_buf[line_offset..line_offset + len].copy_from_slice(&buf[buf_offset..buf_offset + len]);

            transaction.write_bytes_unlocked(rma, &line_buf);
            let line_index = (rma / LINE_SIZE as u64) as u32;
            transaction.trigger_cache_evictions_for_line_range(line_index, 1);
            self.cache.add_or_update_data_for_address(rma as u32, &line_buf);

            line_start += LINE_SIZE as u64;
        }

        Ok(())
    }
}
