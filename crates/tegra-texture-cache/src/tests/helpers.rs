use std::sync::Arc;

use tegra_memory::{
    CachedPageCounter, GpuVAddr, GuestMemory, MemoryManager, VAddr, VecGuestMemory,
};

use crate::{
    BackendEvent, PixelFormat, RenderTargetDescriptor, SoftwareBackend, SoftwareSurface,
    SurfaceParams, SurfaceView, TextureCache, TextureCacheConfig,
};

/// Guest RAM is mapped in one piece: `GPU_BASE + x` translates to CPU address `x`.
pub(crate) const GPU_BASE: GpuVAddr = 1 << 32;
pub(crate) const RAM_SIZE: usize = 0x40_0000;

pub(crate) struct Harness {
    pub(crate) ram: Arc<VecGuestMemory>,
    pub(crate) memory: MemoryManager,
    pub(crate) pages: Arc<CachedPageCounter>,
    pub(crate) cache: TextureCache<SoftwareBackend>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(TextureCacheConfig::default())
    }

    pub(crate) fn with_config(config: TextureCacheConfig) -> Self {
        let ram = Arc::new(VecGuestMemory::new(RAM_SIZE));
        let mut memory = MemoryManager::new(ram.clone());
        memory.map(0, GPU_BASE, RAM_SIZE as u64).unwrap();
        let pages = Arc::new(CachedPageCounter::default());
        let cache = TextureCache::new(SoftwareBackend::new(), pages.clone(), config);
        Self {
            ram,
            memory,
            pages,
            cache,
        }
    }

    pub(crate) fn write_guest(&self, cpu_addr: VAddr, bytes: &[u8]) {
        GuestMemory::write(&*self.ram, cpu_addr, bytes).unwrap();
    }

    pub(crate) fn get(&self, cpu_addr: VAddr, params: &SurfaceParams) -> SurfaceView {
        self.cache
            .get_surface(&self.memory, GPU_BASE + cpu_addr, params, true, false)
            .unwrap()
    }

    pub(crate) fn host(&self, view: &SurfaceView) -> Arc<SoftwareSurface> {
        self.cache.host_surface(view.surface).unwrap()
    }

    pub(crate) fn is_modified(&self, view: &SurfaceView) -> bool {
        self.cache
            .surface_info(view.surface)
            .unwrap()
            .flags
            .contains(crate::SurfaceFlags::MODIFIED)
    }

    /// Binds a linear colour target at `cpu_addr`, draws `bytes` into it and marks it used.
    pub(crate) fn draw(&self, slot: usize, cpu_addr: VAddr, width: u32, height: u32, bytes: &[u8]) -> SurfaceView {
        let desc = linear_target(cpu_addr, width, height);
        let view = self
            .cache
            .bind_color_buffer(&self.memory, slot, Some(&desc), true)
            .unwrap()
            .unwrap();
        self.host(&view).write_data(0, bytes);
        self.cache.mark_color_buffer_in_use(slot).unwrap();
        view
    }

    pub(crate) fn downloads(&self) -> Vec<u64> {
        self.cache
            .backend()
            .events()
            .into_iter()
            .filter_map(|event| match event {
                BackendEvent::Download { surface, .. } => Some(surface),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count_events(&self, pred: impl Fn(&BackendEvent) -> bool) -> usize {
        self.cache.backend().events().iter().filter(|e| pred(e)).count()
    }
}

pub(crate) fn linear_rgba(width: u32, height: u32) -> SurfaceParams {
    SurfaceParams::new_2d(PixelFormat::A8B8G8R8Unorm, width, height, None)
}

/// Colour target descriptor for a pitch-linear RGBA8 surface at CPU address `cpu_addr`.
pub(crate) fn linear_target(cpu_addr: VAddr, width: u32, height: u32) -> RenderTargetDescriptor {
    RenderTargetDescriptor {
        gpu_addr: GPU_BASE + cpu_addr,
        format: PixelFormat::A8B8G8R8Unorm,
        tiling: None,
        width: width * 4,
        height,
        layers: 1,
        is_3d: false,
    }
}

pub(crate) fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}
