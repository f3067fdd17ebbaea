//! Hooks the address space and the caches call into.

use std::sync::Mutex;

use hashbrown::HashMap;

use crate::manager::MemoryManager;
use crate::{VAddr, DEFAULT_PAGE_BITS};

/// Coherency hooks invoked around GPU-side block transfers and unmaps.
///
/// The address space is handed to the hook rather than stored by the implementor, so a cache
/// can write flushed bytes back into guest memory without the two owning each other.
pub trait RasterizerInterface {
    /// Write back any host-side modifications overlapping `[addr, addr + size)`.
    fn flush_region(&self, gpu_memory: &MemoryManager, addr: VAddr, size: u64);

    /// Drop host copies overlapping `[addr, addr + size)`; guest memory is authoritative.
    fn invalidate_region(&self, addr: VAddr, size: u64);

    fn flush_and_invalidate_region(&self, gpu_memory: &MemoryManager, addr: VAddr, size: u64) {
        self.flush_region(gpu_memory, addr, size);
        self.invalidate_region(addr, size);
    }
}

/// Rasterizer with no caches attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullRasterizer;

impl RasterizerInterface for NullRasterizer {
    fn flush_region(&self, _gpu_memory: &MemoryManager, _addr: VAddr, _size: u64) {}

    fn invalidate_region(&self, _addr: VAddr, _size: u64) {}
}

/// Tells the CPU memory layer which pages are shadowed by GPU caches, so CPU writes to them
/// get reported back (`on_cpu_write`).
pub trait PageCacheTracker: Send + Sync {
    fn update_pages_cached_count(&self, addr: VAddr, size: u64, delta: i32);
}

/// Reference-counted set of cached CPU pages.
#[derive(Debug)]
pub struct CachedPageCounter {
    page_bits: u32,
    counts: Mutex<HashMap<u64, u32>>,
}

impl Default for CachedPageCounter {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_BITS)
    }
}

impl CachedPageCounter {
    pub fn new(page_bits: u32) -> Self {
        Self {
            page_bits,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached objects overlapping the page containing `addr`.
    pub fn count(&self, addr: VAddr) -> u32 {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.get(&(addr >> self.page_bits)).copied().unwrap_or(0)
    }

    pub fn is_cached(&self, addr: VAddr) -> bool {
        self.count(addr) > 0
    }

    /// Number of pages with a non-zero count.
    pub fn cached_pages(&self) -> usize {
        self.counts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl PageCacheTracker for CachedPageCounter {
    fn update_pages_cached_count(&self, addr: VAddr, size: u64, delta: i32) {
        if size == 0 {
            return;
        }
        let first = addr >> self.page_bits;
        let last = (addr + size - 1) >> self.page_bits;
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        for page in first..=last {
            let count = counts.entry(page).or_insert(0);
            if delta >= 0 {
                *count += delta as u32;
            } else {
                let dec = delta.unsigned_abs();
                debug_assert!(*count >= dec, "page {page:#x} cached count underflow");
                *count = count.saturating_sub(dec);
            }
            if *count == 0 {
                counts.remove(&page);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_span_every_touched_page() {
        let counter = CachedPageCounter::default();
        counter.update_pages_cached_count(0x1800, 0x1000, 1);
        assert_eq!(counter.count(0x1000), 1);
        assert_eq!(counter.count(0x2000), 1);
        assert_eq!(counter.count(0x3000), 0);
        assert_eq!(counter.cached_pages(), 2);

        counter.update_pages_cached_count(0x1800, 0x1000, -1);
        assert!(!counter.is_cached(0x1000));
        assert_eq!(counter.cached_pages(), 0);
    }
}
