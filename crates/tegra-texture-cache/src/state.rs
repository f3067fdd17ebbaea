//! State guarded by the cache lock: surfaces, the spatial index, render-target bindings and
//! the bookkeeping lists that hang off them.

use std::sync::Arc;

use bitflags::bitflags;
use hashbrown::HashMap;
use tegra_memory::{GpuVAddr, PageCacheTracker, VAddr};
use tracing::trace;

use crate::backend::Backend;
use crate::config::TextureCacheConfig;
use crate::copy::ViewParams;
use crate::flush::AsyncFlushQueue;
use crate::format::{PixelFormat, SiblingFormats, SurfaceTarget};
use crate::params::SurfaceParams;
use crate::registry::{SurfaceRegistry, SurfaceReserve};
use crate::surface::{RenderTargetSlot, SurfaceBase, SurfaceFlags, SurfaceId};

pub const NUM_RENDER_TARGETS: usize = 8;

bitflags! {
    /// Render-target slots whose surface was unregistered and must be re-bound.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DirtyRenderTargets: u16 {
        const COLOR0 = 1 << 0;
        const COLOR1 = 1 << 1;
        const COLOR2 = 1 << 2;
        const COLOR3 = 1 << 3;
        const COLOR4 = 1 << 4;
        const COLOR5 = 1 << 5;
        const COLOR6 = 1 << 6;
        const COLOR7 = 1 << 7;
        const DEPTH = 1 << 8;
    }
}

impl DirtyRenderTargets {
    pub fn color(index: usize) -> Self {
        Self::from_bits_truncate(1 << index)
    }

    pub fn slot(slot: RenderTargetSlot) -> Self {
        match slot {
            RenderTargetSlot::Color(index) => Self::color(index),
            RenderTargetSlot::Depth => Self::DEPTH,
        }
    }
}

/// Handle to a view of a cached surface. Owns nothing: the cache keeps the host objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceView {
    pub surface: SurfaceId,
    pub view: ViewParams,
}

/// Read-only summary of a cached surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub id: SurfaceId,
    pub gpu_addr: GpuVAddr,
    pub cpu_addr: VAddr,
    pub params: SurfaceParams,
    pub flags: SurfaceFlags,
    pub modification_tick: u64,
    pub size_in_bytes: usize,
    pub render_target: Option<RenderTargetSlot>,
}

pub struct CachedSurface<B: Backend> {
    pub base: SurfaceBase,
    pub host: Arc<B::Surface>,
    views: HashMap<ViewParams, B::View>,
}

impl<B: Backend> CachedSurface<B> {
    pub fn new(base: SurfaceBase, host: B::Surface) -> Self {
        Self {
            base,
            host: Arc::new(host),
            views: HashMap::new(),
        }
    }

    /// Creates the backend view for `params` on first use.
    pub fn ensure_view(&mut self, backend: &B, params: ViewParams) {
        if !self.views.contains_key(&params) {
            let view = backend.create_view(&self.host, self.base.params(), &params);
            self.views.insert(params, view);
        }
    }

    pub fn view(&self, params: &ViewParams) -> Option<&B::View> {
        self.views.get(params)
    }

    pub fn info(&self, id: SurfaceId) -> SurfaceInfo {
        SurfaceInfo {
            id,
            gpu_addr: self.base.gpu_addr(),
            cpu_addr: self.base.cpu_addr(),
            params: *self.base.params(),
            flags: self.base.flags(),
            modification_tick: self.base.modification_tick(),
            size_in_bytes: self.base.size_in_bytes(),
            render_target: self.base.render_target(),
        }
    }
}

pub struct CacheState<B: Backend> {
    pub config: TextureCacheConfig,
    pub siblings: SiblingFormats,
    pub surfaces: HashMap<SurfaceId, CachedSurface<B>>,
    next_id: u64,
    pub registry: SurfaceRegistry,
    pub reserve: SurfaceReserve,
    ticks: u64,
    pub guard_render_targets: bool,
    pub guard_samplers: bool,
    pub render_targets: [Option<SurfaceView>; NUM_RENDER_TARGETS],
    pub depth_buffer: Option<SurfaceView>,
    pub dirty: DirtyRenderTargets,
    pub sampled: Vec<SurfaceId>,
    pub null_surfaces: HashMap<SurfaceTarget, SurfaceId>,
    pub marked_for_unregister: Vec<SurfaceId>,
    pub async_flushes: AsyncFlushQueue,
}

impl<B: Backend> CacheState<B> {
    pub fn new(config: TextureCacheConfig) -> Self {
        Self {
            config,
            siblings: SiblingFormats::default(),
            surfaces: HashMap::new(),
            next_id: 0,
            registry: SurfaceRegistry::default(),
            reserve: SurfaceReserve::default(),
            ticks: 0,
            guard_render_targets: false,
            guard_samplers: false,
            render_targets: [None; NUM_RENDER_TARGETS],
            depth_buffer: None,
            dirty: DirtyRenderTargets::empty(),
            sampled: Vec::new(),
            null_surfaces: HashMap::new(),
            marked_for_unregister: Vec::new(),
            async_flushes: AsyncFlushQueue::default(),
        }
    }

    pub fn tick(&mut self) -> u64 {
        self.ticks += 1;
        self.ticks
    }

    pub fn insert(&mut self, surface: CachedSurface<B>) -> SurfaceId {
        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        self.surfaces.insert(id, surface);
        id
    }

    pub fn base(&self, id: SurfaceId) -> &SurfaceBase {
        &self.surfaces[&id].base
    }

    pub fn base_mut(&mut self, id: SurfaceId) -> &mut SurfaceBase {
        match self.surfaces.get_mut(&id) {
            Some(surface) => &mut surface.base,
            None => panic!("{id} is not cached"),
        }
    }

    pub fn mark_as_modified(&mut self, id: SurfaceId, modified: bool) {
        let tick = self.tick();
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.base.mark_as_modified(modified, tick);
        }
    }

    /// Registered surfaces whose CPU range intersects `[addr, addr + size)`.
    pub fn surfaces_in_region(&self, addr: VAddr, size: u64) -> Vec<SurfaceId> {
        if size == 0 {
            return Vec::new();
        }
        let end = addr + size;
        self.registry.candidates(addr, end, |id| {
            self.surfaces
                .get(&id)
                .is_some_and(|surface| surface.base.overlaps(addr, end))
        })
    }

    pub fn view_handle(&mut self, backend: &B, id: SurfaceId, view: ViewParams) -> SurfaceView {
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.ensure_view(backend, view);
        }
        SurfaceView { surface: id, view }
    }

    pub fn main_view(&mut self, backend: &B, id: SurfaceId) -> SurfaceView {
        let view = self.base(id).main_view_params();
        self.view_handle(backend, id, view)
    }

    pub fn is_protected(&self, id: SurfaceId) -> bool {
        self.base(id)
            .is_protected(self.config.protect_only_3d_render_targets)
    }

    pub fn set_flag(&mut self, id: SurfaceId, flag: SurfaceFlags, value: bool) {
        self.base_mut(id).set_flag(flag, value);
    }

    /// Updates the render-target binding of `id` and returns its params, or `None` when the
    /// surface is gone.
    pub fn set_render_target(
        &mut self,
        id: SurfaceId,
        slot: Option<RenderTargetSlot>,
    ) -> Option<SurfaceParams> {
        let surface = self.surfaces.get_mut(&id)?;
        surface.base.mark_as_render_target(slot);
        Some(*surface.base.params())
    }

    pub fn unmark_memory(&mut self, tracker: &dyn PageCacheTracker, id: SurfaceId) {
        let base = self.base(id);
        if !base.is_memory_marked() {
            return;
        }
        let (cpu_addr, size) = (base.cpu_addr(), base.size_in_bytes() as u64);
        tracker.update_pages_cached_count(cpu_addr, size, -1);
        self.set_flag(id, SurfaceFlags::MEMORY_MARKED, false);
    }

    /// Drops `id` from the spatial index and parks it in the reserve. Bound render targets
    /// that are protected stay registered while render targets are guarded.
    pub fn unregister(&mut self, tracker: &dyn PageCacheTracker, id: SurfaceId) {
        let guard = self.guard_render_targets;
        if guard && self.is_protected(id) {
            trace!(%id, "protected render target kept registered");
            return;
        }
        let base = self.base(id);
        if !base.is_registered() {
            return;
        }
        if !guard {
            if let Some(slot) = base.render_target() {
                self.dirty |= DirtyRenderTargets::slot(slot);
            }
        }
        self.unmark_memory(tracker, id);
        if self.base(id).is_sync_pending() {
            self.marked_for_unregister.retain(|&other| other != id);
            self.set_flag(id, SurfaceFlags::SYNC_PENDING, false);
        }
        let base = self.base(id);
        let (start, end, params) = (base.cpu_addr(), base.cpu_addr_end(), *base.params());
        self.registry.remove(id, start, end);
        self.set_flag(id, SurfaceFlags::REGISTERED, false);
        self.reserve.reserve(params, id);
    }

    /// Placeholder bound for invalid texture requests: 1x1 zeroed R8, six layers for cubes.
    /// Never registered, so guest memory never sees it.
    pub fn null_surface(&mut self, backend: &B, target: SurfaceTarget) -> SurfaceView {
        if let Some(&id) = self.null_surfaces.get(&target) {
            return self.main_view(backend, id);
        }
        let depth = match target {
            SurfaceTarget::TextureCubemap | SurfaceTarget::TextureCubeArray => 6,
            _ => 1,
        };
        let params =
            SurfaceParams::new_2d(PixelFormat::R8Unorm, 1, 1, None).with_target(target, depth);
        let host = backend.create_surface(0, &params);
        backend.upload_texture(&host, &params, &vec![0; params.host_size_in_bytes()]);
        let id = self.insert(CachedSurface::new(SurfaceBase::new(0, params), host));
        self.mark_as_modified(id, false);
        self.null_surfaces.insert(target, id);
        self.main_view(backend, id)
    }
}
