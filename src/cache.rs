//! A single CP's write-through cache of real-memory lines.
//!
//! Grounded line-for-line on `Cyber180Cache.c`: a flat array of 512 lines
//! searched linearly, LRU tracked with a monotonic "uses" counter bumped on
//! every hit, ties broken by lowest index because the linear scan for the
//! minimum keeps the first one found.

use crate::memory::EvictionRange;
use crate::sync::Queue;

pub const LINE_COUNT: usize = 512;
pub const LINE_SIZE: usize = 64;

#[derive(Clone, Copy)]
struct Line {
    /// Line-aligned real memory address. Meaningless while `last_use == 0`
    /// (an unallocated line).
    address: u32,
    contents: [u8; LINE_SIZE],
    last_use: u64,
}

impl Line {
    const EMPTY: Line = Line {
        address: 0,
        contents: [0; LINE_SIZE],
        last_use: 0,
    };
}

pub struct Cache {
    lines: [Line; LINE_COUNT],
    uses: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Cache::new()
    }
}

impl Cache {
    pub fn new() -> Cache {
        Cache {
            lines: [Line::EMPTY; LINE_COUNT],
            uses: 0,
        }
    }

    fn line_aligned(rma: u32) -> u32 {
        rma & !(LINE_SIZE as u32 - 1)
    }

    /// Returns the index of the line holding `rma`'s line, bumping both the
    /// cache's global use counter and that line's `last_use` on a hit.
    fn find_line(&mut self, rma: u32) -> Option<usize> {
        let target = Self::line_aligned(rma);
        let hit = self
            .lines
            .iter()
            .position(|line| line.last_use != 0 && line.address == target)?;

        self.uses += 1;
        self.lines[hit].last_use = self.uses;
        Some(hit)
    }

    pub fn get_line_for_address(&mut self, rma: u32) -> bool {
        self.find_line(rma).is_some()
    }

    /// Installs `contents` for the line containing `rma`. If a line already
    /// holds that address it is overwritten in place; otherwise the least
    /// recently used line is evicted (lowest index wins ties, matching a
    /// linear scan for the minimum).
    pub fn add_or_update_data_for_address(&mut self, rma: u32, contents: &[u8; LINE_SIZE]) {
        let target = Self::line_aligned(rma);

        if let Some(index) = self.lines.iter().position(|line| line.last_use != 0 && line.address == target) {
            self.uses += 1;
            self.lines[index].contents = *contents;
            self.lines[index].last_use = self.uses;
            return;
        }

        let victim = self
            .lines
            .iter()
            .enumerate()
            .min_by_key(|(_, line)| line.last_use)
            .map(|(index, _)| index)
            .unwrap_or(0);

        self.uses += 1;
        self.lines[victim] = Line {
            address: target,
            contents: *contents,
            last_use: self.uses,
        };
    }

    pub fn get_data_for_address(&mut self, rma: u32, out: &mut [u8; LINE_SIZE]) -> bool {
        match self.find_line(rma) {
            Some(index) => {
                *out = self.lines[index].contents;
                true
            }
            None => false,
        }
    }

    /// Zeroes the matching line's address/last_use/contents, if present.
    pub fn evict_address(&mut self, rma: u32) {
        let target = Self::line_aligned(rma);
        if let Some(line) = self.lines.iter_mut().find(|line| line.last_use != 0 && line.address == target) {
            log::trace!("cache: evicting line {:#010x}", target);
            *line = Line::EMPTY;
        }
    }

    /// Drains every pending range from `queue`, evicting every line address
    /// it covers. `EvictionRange` carries line *indices*; this converts
    /// each to the line-aligned byte address `evict_address` expects.
    pub fn process_eviction_queue(&mut self, queue: &Queue<EvictionRange>) {
        while let Some(range) = queue.try_dequeue() {
            for offset in 0..range.line_count {
                let line_index = range.start_line + offset;
                self.evict_address(line_index * LINE_SIZE as u32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_on_empty_cache() {
        let mut cache = Cache::new();
        assert!(!cache.get_line_for_address(0x1000));
    }

    #[test]
    fn install_then_hit() {
        let mut cache = Cache::new();
        let data = [0xAAu8; LINE_SIZE];
        cache.add_or_update_data_for_address(0x1000, &data);

        let mut out = [0u8; LINE_SIZE];
        assert!(cache.get_data_for_address(0x1000, &mut out));
        assert_eq!(out, data);
    }

    #[test]
    fn evict_address_clears_line() {
        let mut cache = Cache::new();
        cache.add_or_update_data_for_address(0x40, &[1u8; LINE_SIZE]);
        cache.evict_address(0x40);
        assert!(!cache.get_line_for_address(0x40));
    }

    #[test]
    fn lru_eviction_after_512_distinct_lines() {
        let mut cache = Cache::new();
        for i in 0..LINE_COUNT {
            cache.add_or_update_data_for_address((i * LINE_SIZE) as u32, &[i as u8; LINE_SIZE]);
        }
        // Touch every line except index 0 so it becomes least-recently-used.
        for i in 1..LINE_COUNT {
            cache.get_line_for_address((i * LINE_SIZE) as u32);
        }

        // Installing a 513th distinct line must evict line 0.
        cache.add_or_update_data_for_address((LINE_COUNT * LINE_SIZE) as u32, &[0xFF; LINE_SIZE]);
        assert!(!cache.get_line_for_address(0));
        assert!(cache.get_line_for_address((LINE_COUNT * LINE_SIZE) as u32));
    }

    #[test]
    fn process_eviction_queue_drains_covered_lines() {
        let mut cache = Cache::new();
        cache.add_or_update_data_for_address(0x00, &[1u8; LINE_SIZE]);
        cache.add_or_update_data_for_address(0x40, &[2u8; LINE_SIZE]);

        let queue = Queue::new();
        queue.enqueue(EvictionRange {
            start_line: 0,
            line_count: 2,
        });
        cache.process_eviction_queue(&queue);

        assert!(!cache.get_line_for_address(0x00));
        assert!(!cache.get_line_for_address(0x40));
    }
}
