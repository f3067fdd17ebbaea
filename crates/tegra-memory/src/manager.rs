use std::sync::Arc;

use bytemuck::Pod;
use tracing::{debug, trace, warn};

use crate::guest::GuestMemory;
use crate::page_table::{PageEntry, PageTable};
use crate::rasterizer::RasterizerInterface;
use crate::{GpuVAddr, VAddr, DEFAULT_PAGE_BITS};

#[derive(Clone, Debug)]
pub struct MemoryManagerConfig {
    /// log2 of the page size.
    pub page_bits: u32,
    /// Width of the GPU virtual address space.
    pub address_space_bits: u32,
    /// Lowest address handed out by `find_free_range`.
    pub address_space_start: GpuVAddr,
}

impl Default for MemoryManagerConfig {
    fn default() -> Self {
        Self {
            page_bits: DEFAULT_PAGE_BITS,
            address_space_bits: 40,
            address_space_start: 1 << 32,
        }
    }
}

impl MemoryManagerConfig {
    pub fn with_page_bits(mut self, page_bits: u32) -> Self {
        self.page_bits = page_bits;
        self
    }

    pub fn with_address_space_bits(mut self, bits: u32) -> Self {
        self.address_space_bits = bits;
        self
    }

    pub fn with_address_space_start(mut self, start: GpuVAddr) -> Self {
        self.address_space_start = start;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryManagerError {
    #[error("gpu address 0x{0:x} is not page-aligned")]
    MisalignedGpuAddress(GpuVAddr),
    #[error("cpu address 0x{0:x} is not page-aligned")]
    MisalignedCpuAddress(VAddr),
    #[error("range 0x{gpu_addr:x}+0x{size:x} exceeds the {bits}-bit gpu address space")]
    OutOfRange {
        gpu_addr: GpuVAddr,
        size: u64,
        bits: u32,
    },
    #[error("no free gpu range of 0x{size:x} bytes aligned to 0x{align:x}")]
    NoFreeRange { size: u64, align: u64 },
    #[error("gpu range 0x{gpu_addr:x}+0x{size:x} is already in use")]
    RangeInUse { gpu_addr: GpuVAddr, size: u64 },
}

/// GPU virtual address space backed by guest CPU memory.
///
/// Page-table mutation takes `&mut self`; translation and block access take `&self` and rely on
/// the backing store for synchronisation.
pub struct MemoryManager {
    config: MemoryManagerConfig,
    page_size: u64,
    page_mask: u64,
    page_table: PageTable,
    memory: Arc<dyn GuestMemory>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("config", &self.config)
            .field("resident_leaves", &self.page_table.resident_leaves())
            .finish_non_exhaustive()
    }
}

impl MemoryManager {
    pub fn new(memory: Arc<dyn GuestMemory>) -> Self {
        Self::with_config(memory, MemoryManagerConfig::default())
    }

    pub fn with_config(memory: Arc<dyn GuestMemory>, config: MemoryManagerConfig) -> Self {
        assert!(
            config.page_bits >= 8 && config.page_bits < config.address_space_bits,
            "invalid page configuration: {config:?}"
        );
        let page_size = 1u64 << config.page_bits;
        let num_pages = 1u64 << (config.address_space_bits - config.page_bits);
        Self {
            page_size,
            page_mask: page_size - 1,
            page_table: PageTable::new(num_pages),
            memory,
            config,
        }
    }

    pub fn config(&self) -> &MemoryManagerConfig {
        &self.config
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn memory(&self) -> &Arc<dyn GuestMemory> {
        &self.memory
    }

    /// Maps `[gpu_addr, gpu_addr + size)` onto guest memory at `cpu_addr`.
    pub fn map(
        &mut self,
        cpu_addr: VAddr,
        gpu_addr: GpuVAddr,
        size: u64,
    ) -> Result<GpuVAddr, MemoryManagerError> {
        self.check_range(gpu_addr, size)?;
        if cpu_addr & self.page_mask != 0 {
            return Err(MemoryManagerError::MisalignedCpuAddress(cpu_addr));
        }
        debug!(
            gpu_addr = format_args!("{gpu_addr:#x}"),
            cpu_addr = format_args!("{cpu_addr:#x}"),
            size,
            "map"
        );
        self.update_range(gpu_addr, size, |offset| PageEntry::Mapped(cpu_addr + offset));
        Ok(gpu_addr)
    }

    /// Maps `size` bytes of guest memory at the first free GPU range satisfying `align`.
    pub fn map_allocate(
        &mut self,
        cpu_addr: VAddr,
        size: u64,
        align: u64,
    ) -> Result<GpuVAddr, MemoryManagerError> {
        let gpu_addr = self
            .find_free_range(size, align)
            .ok_or(MemoryManagerError::NoFreeRange { size, align })?;
        self.map(cpu_addr, gpu_addr, size)
    }

    /// Unmaps a range. Host caches over the range are flushed back to guest memory and then
    /// invalidated before the pages go away.
    pub fn unmap(
        &mut self,
        gpu_addr: GpuVAddr,
        size: u64,
        rasterizer: &dyn RasterizerInterface,
    ) -> Result<(), MemoryManagerError> {
        if size == 0 {
            return Ok(());
        }
        self.check_range(gpu_addr, size)?;
        debug!(gpu_addr = format_args!("{gpu_addr:#x}"), size, "unmap");

        for (cpu_addr, len) in self.cpu_runs(gpu_addr, size) {
            rasterizer.flush_and_invalidate_region(self, cpu_addr, len);
        }
        self.update_range(gpu_addr, size, |_| PageEntry::Unmapped);
        Ok(())
    }

    /// Reserves a specific GPU range without backing. Fails (returns `None`) if any page of the
    /// range is already allocated or mapped.
    pub fn allocate_fixed(&mut self, gpu_addr: GpuVAddr, size: u64) -> Option<GpuVAddr> {
        self.check_range(gpu_addr, size).ok()?;
        let first = gpu_addr >> self.config.page_bits;
        let pages = self.pages_for(size);
        if (first..first + pages).any(|page| !self.page_table.get(page).is_unmapped()) {
            return None;
        }
        debug!(gpu_addr = format_args!("{gpu_addr:#x}"), size, "allocate_fixed");
        self.update_range(gpu_addr, size, |_| PageEntry::Allocated);
        Some(gpu_addr)
    }

    pub fn allocate(&mut self, size: u64, align: u64) -> Result<GpuVAddr, MemoryManagerError> {
        let gpu_addr = self
            .find_free_range(size, align)
            .ok_or(MemoryManagerError::NoFreeRange { size, align })?;
        self.allocate_fixed(gpu_addr, size)
            .ok_or(MemoryManagerError::RangeInUse { gpu_addr, size })
    }

    /// First-fit search for `size` unmapped bytes starting at `address_space_start`.
    ///
    /// `align == 0` means page alignment; other values are rounded up to a page multiple.
    pub fn find_free_range(&self, size: u64, align: u64) -> Option<GpuVAddr> {
        let align = if align == 0 {
            self.page_size
        } else {
            align_up(align, self.page_size)
        };
        let size = size.max(1);
        let limit = 1u64 << self.config.address_space_bits;

        let mut gpu_addr = align_up(self.config.address_space_start, align);
        let mut available = 0u64;
        while gpu_addr + available < limit {
            let page = (gpu_addr + available) >> self.config.page_bits;
            if self.page_table.get(page).is_unmapped() {
                available += self.page_size;
                if available >= size {
                    return Some(gpu_addr);
                }
            } else {
                gpu_addr = align_up(gpu_addr + available + self.page_size, align);
                available = 0;
            }
        }
        None
    }

    pub fn page_entry(&self, gpu_addr: GpuVAddr) -> PageEntry {
        self.page_table.get(gpu_addr >> self.config.page_bits)
    }

    pub fn gpu_to_cpu_address(&self, gpu_addr: GpuVAddr) -> Option<VAddr> {
        self.page_entry(gpu_addr)
            .cpu_addr()
            .map(|base| base + (gpu_addr & self.page_mask))
    }

    pub fn is_mapped(&self, gpu_addr: GpuVAddr) -> bool {
        self.gpu_to_cpu_address(gpu_addr).is_some()
    }

    /// CPU address of `gpu_addr` if `len` bytes are backed there.
    pub fn resolve(&self, gpu_addr: GpuVAddr, len: usize) -> Option<VAddr> {
        let cpu_addr = self.gpu_to_cpu_address(gpu_addr)?;
        self.memory
            .is_valid_range(cpu_addr, len)
            .then_some(cpu_addr)
    }

    /// Whether the range translates and stays within one page.
    pub fn is_granular_range(&self, gpu_addr: GpuVAddr, size: u64) -> bool {
        self.gpu_to_cpu_address(gpu_addr).is_some()
            && (gpu_addr & self.page_mask) + size <= self.page_size
    }

    /// Typed read on the fast path.
    ///
    /// # Panics
    ///
    /// If `gpu_addr` does not resolve to backed guest memory. Callers only use this on
    /// addresses the command stream guarantees to be mapped; anything else is a fatal emulation
    /// error. Use [`MemoryManager::try_read`] when that is not guaranteed.
    pub fn read<T: Pod>(&self, gpu_addr: GpuVAddr) -> T {
        match self.try_read(gpu_addr) {
            Some(value) => value,
            None => panic!("typed read from unresolvable gpu address {gpu_addr:#x}"),
        }
    }

    pub fn try_read<T: Pod>(&self, gpu_addr: GpuVAddr) -> Option<T> {
        let cpu_addr = self.resolve(gpu_addr, std::mem::size_of::<T>())?;
        let mut value = T::zeroed();
        self.memory
            .read(cpu_addr, bytemuck::bytes_of_mut(&mut value))
            .ok()?;
        Some(value)
    }

    /// Typed write on the fast path.
    ///
    /// # Panics
    ///
    /// If `gpu_addr` does not resolve to backed guest memory.
    pub fn write<T: Pod>(&self, gpu_addr: GpuVAddr, value: T) {
        if !self.try_write(gpu_addr, value) {
            panic!("typed write to unresolvable gpu address {gpu_addr:#x}");
        }
    }

    pub fn try_write<T: Pod>(&self, gpu_addr: GpuVAddr, value: T) -> bool {
        let Some(cpu_addr) = self.resolve(gpu_addr, std::mem::size_of::<T>()) else {
            return false;
        };
        self.memory
            .write(cpu_addr, bytemuck::bytes_of(&value))
            .is_ok()
    }

    /// Reads a block, flushing host caches over each page chunk first. Holes read as zero.
    pub fn read_block(
        &self,
        gpu_addr: GpuVAddr,
        dst: &mut [u8],
        rasterizer: &dyn RasterizerInterface,
    ) {
        self.walk_pages(gpu_addr, dst.len(), |offset, cpu_addr, len| {
            let chunk = &mut dst[offset..offset + len];
            match cpu_addr {
                Some(cpu_addr) => {
                    rasterizer.flush_region(self, cpu_addr, len as u64);
                    if self.memory.read(cpu_addr, chunk).is_err() {
                        chunk.fill(0);
                    }
                }
                None => chunk.fill(0),
            }
        });
    }

    /// Reads a block without coherency hooks. Holes read as zero.
    pub fn read_block_unsafe(&self, gpu_addr: GpuVAddr, dst: &mut [u8]) {
        self.walk_pages(gpu_addr, dst.len(), |offset, cpu_addr, len| {
            let chunk = &mut dst[offset..offset + len];
            let ok = cpu_addr.is_some_and(|cpu_addr| self.memory.read(cpu_addr, chunk).is_ok());
            if !ok {
                chunk.fill(0);
            }
        });
    }

    /// Writes a block, invalidating host caches over each page chunk first. Holes are skipped.
    pub fn write_block(&self, gpu_addr: GpuVAddr, src: &[u8], rasterizer: &dyn RasterizerInterface) {
        self.walk_pages(gpu_addr, src.len(), |offset, cpu_addr, len| {
            let Some(cpu_addr) = cpu_addr else {
                trace!(gpu_addr = format_args!("{gpu_addr:#x}"), offset, "write_block skipped hole");
                return;
            };
            rasterizer.invalidate_region(cpu_addr, len as u64);
            self.write_chunk(cpu_addr, &src[offset..offset + len]);
        });
    }

    /// Writes a block without coherency hooks. Holes are skipped.
    pub fn write_block_unsafe(&self, gpu_addr: GpuVAddr, src: &[u8]) {
        self.walk_pages(gpu_addr, src.len(), |offset, cpu_addr, len| {
            if let Some(cpu_addr) = cpu_addr {
                self.write_chunk(cpu_addr, &src[offset..offset + len]);
            }
        });
    }

    fn write_chunk(&self, cpu_addr: VAddr, chunk: &[u8]) {
        if let Err(err) = self.memory.write(cpu_addr, chunk) {
            warn!(
                cpu_addr = format_args!("{cpu_addr:#x}"),
                len = chunk.len(),
                %err,
                "guest write dropped"
            );
        }
    }

    pub fn copy_block(
        &self,
        dst_gpu_addr: GpuVAddr,
        src_gpu_addr: GpuVAddr,
        size: usize,
        rasterizer: &dyn RasterizerInterface,
    ) {
        let mut tmp = vec![0u8; size];
        self.read_block(src_gpu_addr, &mut tmp, rasterizer);
        self.write_block(dst_gpu_addr, &tmp, rasterizer);
    }

    pub fn copy_block_unsafe(&self, dst_gpu_addr: GpuVAddr, src_gpu_addr: GpuVAddr, size: usize) {
        let mut tmp = vec![0u8; size];
        self.read_block_unsafe(src_gpu_addr, &mut tmp);
        self.write_block_unsafe(dst_gpu_addr, &tmp);
    }

    /// Calls `f(buffer_offset, cpu_addr, len)` for each page-bounded chunk of the range.
    fn walk_pages(
        &self,
        gpu_addr: GpuVAddr,
        len: usize,
        mut f: impl FnMut(usize, Option<VAddr>, usize),
    ) {
        let mut remaining = len;
        let mut offset = 0usize;
        let mut page = gpu_addr >> self.config.page_bits;
        let mut page_offset = gpu_addr & self.page_mask;
        while remaining > 0 {
            let chunk = ((self.page_size - page_offset) as usize).min(remaining);
            let cpu_addr = self
                .page_table
                .get(page)
                .cpu_addr()
                .map(|base| base + page_offset);
            f(offset, cpu_addr, chunk);
            offset += chunk;
            remaining -= chunk;
            page += 1;
            page_offset = 0;
        }
    }

    /// Coalesces the mapped parts of a GPU range into contiguous CPU runs.
    fn cpu_runs(&self, gpu_addr: GpuVAddr, size: u64) -> Vec<(VAddr, u64)> {
        let mut runs: Vec<(VAddr, u64)> = Vec::new();
        self.walk_pages(gpu_addr, size as usize, |_, cpu_addr, len| {
            let Some(cpu_addr) = cpu_addr else {
                return;
            };
            match runs.last_mut() {
                Some((start, run_len)) if *start + *run_len == cpu_addr => *run_len += len as u64,
                _ => runs.push((cpu_addr, len as u64)),
            }
        });
        runs
    }

    fn pages_for(&self, size: u64) -> u64 {
        size.div_ceil(self.page_size)
    }

    fn check_range(&self, gpu_addr: GpuVAddr, size: u64) -> Result<(), MemoryManagerError> {
        if gpu_addr & self.page_mask != 0 {
            return Err(MemoryManagerError::MisalignedGpuAddress(gpu_addr));
        }
        let limit = 1u64 << self.config.address_space_bits;
        match gpu_addr.checked_add(size) {
            Some(end) if end <= limit => Ok(()),
            _ => Err(MemoryManagerError::OutOfRange {
                gpu_addr,
                size,
                bits: self.config.address_space_bits,
            }),
        }
    }

    fn update_range(&mut self, gpu_addr: GpuVAddr, size: u64, entry: impl Fn(u64) -> PageEntry) {
        let first = gpu_addr >> self.config.page_bits;
        for i in 0..self.pages_for(size) {
            self.page_table.set(first + i, entry(i << self.config.page_bits));
        }
    }
}

pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align > 0);
    value.div_ceil(align) * align
}
