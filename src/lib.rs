//! GPU memory front for a Tegra-class (Maxwell) GPU: the GPU virtual address space and the
//! texture cache that shadows guest memory, wired so that every block transfer and unmap keeps
//! the two coherent.

use std::sync::Arc;

use tegra_memory::{
    GpuVAddr, GuestMemory, MemoryManager, MemoryManagerConfig, MemoryManagerError,
    PageCacheTracker, VAddr,
};
use tegra_texture_cache::{
    Backend, SurfaceParams, SurfaceView, TextureCache, TextureCacheConfig, TextureCacheError,
};
use tracing::debug;

pub use tegra_memory as memory;
pub use tegra_texture_cache as texture_cache;

#[derive(Debug, thiserror::Error)]
pub enum VideoCoreError {
    #[error(transparent)]
    Memory(#[from] MemoryManagerError),
    #[error(transparent)]
    TextureCache(#[from] TextureCacheError),
}

#[derive(Clone, Debug, Default)]
pub struct VideoCoreConfig {
    pub memory: MemoryManagerConfig,
    pub cache: TextureCacheConfig,
}

impl VideoCoreConfig {
    pub fn with_memory(mut self, memory: MemoryManagerConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_cache(mut self, cache: TextureCacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// Owns one GPU address space and the texture cache over it.
///
/// Block transfers go through the cache's coherency hooks: reads flush modified surfaces
/// first, writes invalidate the surfaces they land on, unmaps do both before the pages go.
pub struct VideoCore<B: Backend> {
    memory: MemoryManager,
    cache: TextureCache<B>,
}

impl<B: Backend> VideoCore<B> {
    pub fn new(
        guest: Arc<dyn GuestMemory>,
        backend: B,
        tracker: Arc<dyn PageCacheTracker>,
        config: VideoCoreConfig,
    ) -> Self {
        debug!(
            page_bits = config.memory.page_bits,
            address_space_bits = config.memory.address_space_bits,
            accuracy = ?config.cache.accuracy,
            "video core created"
        );
        Self {
            memory: MemoryManager::with_config(guest, config.memory),
            cache: TextureCache::new(backend, tracker, config.cache),
        }
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn cache(&self) -> &TextureCache<B> {
        &self.cache
    }

    pub fn map(&mut self, cpu_addr: VAddr, gpu_addr: GpuVAddr, size: u64) -> Result<GpuVAddr, VideoCoreError> {
        Ok(self.memory.map(cpu_addr, gpu_addr, size)?)
    }

    pub fn map_allocate(&mut self, cpu_addr: VAddr, size: u64, align: u64) -> Result<GpuVAddr, VideoCoreError> {
        Ok(self.memory.map_allocate(cpu_addr, size, align)?)
    }

    pub fn allocate(&mut self, size: u64, align: u64) -> Result<GpuVAddr, VideoCoreError> {
        Ok(self.memory.allocate(size, align)?)
    }

    pub fn allocate_fixed(&mut self, gpu_addr: GpuVAddr, size: u64) -> Option<GpuVAddr> {
        self.memory.allocate_fixed(gpu_addr, size)
    }

    pub fn unmap(&mut self, gpu_addr: GpuVAddr, size: u64) -> Result<(), VideoCoreError> {
        let Self { memory, cache } = self;
        Ok(memory.unmap(gpu_addr, size, &*cache)?)
    }

    pub fn gpu_to_cpu_address(&self, gpu_addr: GpuVAddr) -> Option<VAddr> {
        self.memory.gpu_to_cpu_address(gpu_addr)
    }

    pub fn read_block(&self, gpu_addr: GpuVAddr, dst: &mut [u8]) {
        self.memory.read_block(gpu_addr, dst, &self.cache);
    }

    pub fn write_block(&self, gpu_addr: GpuVAddr, src: &[u8]) {
        self.memory.write_block(gpu_addr, src, &self.cache);
    }

    pub fn copy_block(&self, dst_gpu_addr: GpuVAddr, src_gpu_addr: GpuVAddr, size: usize) {
        self.memory
            .copy_block(dst_gpu_addr, src_gpu_addr, size, &self.cache);
    }

    pub fn get_surface(
        &self,
        gpu_addr: GpuVAddr,
        params: &SurfaceParams,
        preserve_contents: bool,
        is_render: bool,
    ) -> Result<SurfaceView, VideoCoreError> {
        Ok(self
            .cache
            .get_surface(&self.memory, gpu_addr, params, preserve_contents, is_render)?)
    }

    /// The CPU wrote guest memory directly; surfaces over it are dropped on the next
    /// [`sync_guest_host`](Self::sync_guest_host).
    pub fn on_cpu_write(&self, cpu_addr: VAddr, size: u64) {
        self.cache.on_cpu_write(cpu_addr, size);
    }

    pub fn sync_guest_host(&self) {
        self.cache.sync_guest_host();
    }

    pub fn flush_region(&self, cpu_addr: VAddr, size: u64) {
        self.cache.flush_region(&self.memory, cpu_addr, size);
    }

    pub fn invalidate_region(&self, cpu_addr: VAddr, size: u64) {
        self.cache.invalidate_region(cpu_addr, size);
    }

    pub fn pop_async_flushes(&self) {
        self.cache.pop_async_flushes(&self.memory);
    }
}
