//! Public texture cache: locking, front-end entry points and write-back outside the lock.

use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::HashSet;
use tegra_memory::{GpuVAddr, MemoryManager, PageCacheTracker, RasterizerInterface, VAddr};
use tracing::{debug, trace};

use crate::backend::Backend;
use crate::config::TextureCacheConfig;
use crate::copy::BlitConfig;
use crate::descriptor::{
    DepthBufferDescriptor, Fermi2dSurface, ImageEntry, RenderTargetDescriptor, SamplerEntry,
    TextureDescriptor,
};
use crate::error::TextureCacheError;
use crate::format::SurfaceTarget;
use crate::params::SurfaceParams;
use crate::resolve::{self, NeedsFlush, Resolution, Resolver};
use crate::staging::StagingCache;
use crate::state::{
    CacheState, DirtyRenderTargets, SurfaceInfo, SurfaceView, NUM_RENDER_TARGETS,
};
use crate::stats::{CacheStats, CacheStatsSnapshot};
use crate::surface::{RenderTargetSlot, SurfaceFlags, SurfaceId};

/// Resolves guest texture memory into host surfaces and keeps them coherent with guest
/// memory.
///
/// All state sits behind one mutex. Writing a modified surface back to guest memory can block
/// on the host, so it always happens with that mutex released.
pub struct TextureCache<B: Backend> {
    backend: B,
    tracker: Arc<dyn PageCacheTracker>,
    state: Mutex<CacheState<B>>,
    staging: Mutex<StagingCache>,
    stats: CacheStats,
}

impl<B: Backend> TextureCache<B> {
    pub fn new(backend: B, tracker: Arc<dyn PageCacheTracker>, config: TextureCacheConfig) -> Self {
        Self {
            backend,
            tracker,
            staging: Mutex::new(StagingCache::new(config.staging_buffers)),
            state: Mutex::new(CacheState::new(config)),
            stats: CacheStats::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> TextureCacheConfig {
        self.lock_state().config
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState<B>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `op` under the lock, flushing whatever it asks for outside the lock and retrying.
    fn resolve<T>(
        &self,
        gpu_memory: &MemoryManager,
        mut op: impl FnMut(&mut Resolver<'_, B>) -> Resolution<T>,
    ) -> T {
        let mut flushed = HashSet::new();
        loop {
            let pending = {
                let mut state = self.lock_state();
                let mut resolver = Resolver {
                    state: &mut *state,
                    backend: &self.backend,
                    memory: gpu_memory,
                    tracker: self.tracker.as_ref(),
                    staging: &self.staging,
                    stats: &self.stats,
                    flushed: &flushed,
                };
                match op(&mut resolver) {
                    Ok(value) => return value,
                    Err(NeedsFlush(pending)) => pending,
                }
            };
            trace!(count = pending.len(), "flushing overlaps before resolving");
            for id in pending {
                self.flush_surface(gpu_memory, id);
                flushed.insert(id);
            }
        }
    }

    /// Writes a modified surface back to guest memory. Must be called without the state lock.
    fn flush_surface(&self, gpu_memory: &MemoryManager, id: SurfaceId) {
        let snapshot = {
            let state = self.lock_state();
            state
                .surfaces
                .get(&id)
                .filter(|surface| surface.base.is_modified())
                .map(|surface| (Arc::clone(&surface.host), surface.base.clone()))
        };
        let Some((host, base)) = snapshot else {
            return;
        };
        {
            let mut staging = resolve::lock_staging(&self.staging);
            staging.flush_buffer(gpu_memory, &base, |data| {
                self.backend.download_texture(&host, base.params(), data)
            });
        }
        debug!(%id, gpu_addr = format_args!("{:#x}", base.gpu_addr()), "flushed surface");
        self.stats.inc_flushes();
        self.lock_state().mark_as_modified(id, false);
    }

    fn flush_surfaces(&self, gpu_memory: &MemoryManager, ids: impl IntoIterator<Item = SurfaceId>) {
        for id in ids {
            self.flush_surface(gpu_memory, id);
        }
    }

    /// Resolves `params` at `gpu_addr` to a view of a cached surface.
    pub fn get_surface(
        &self,
        gpu_memory: &MemoryManager,
        gpu_addr: GpuVAddr,
        params: &SurfaceParams,
        preserve_contents: bool,
        is_render: bool,
    ) -> Result<SurfaceView, TextureCacheError> {
        let cpu_addr = gpu_memory
            .gpu_to_cpu_address(gpu_addr)
            .ok_or(TextureCacheError::UnmappedAddress(gpu_addr))?;
        Ok(self.resolve(gpu_memory, |resolver| {
            resolver.get_surface(gpu_addr, cpu_addr, params, preserve_contents, is_render)
        }))
    }

    fn get_sampled_surface(
        &self,
        gpu_memory: &MemoryManager,
        tic: &TextureDescriptor,
        target: SurfaceTarget,
        params: impl FnOnce() -> Option<SurfaceParams>,
    ) -> SurfaceView {
        let cpu_addr = (tic.gpu_addr != 0)
            .then(|| gpu_memory.gpu_to_cpu_address(tic.gpu_addr))
            .flatten();
        let (Some(cpu_addr), Some(params)) = (cpu_addr, params()) else {
            return self.null_surface(target);
        };
        self.resolve(gpu_memory, |resolver| {
            let view = resolver.get_surface(tic.gpu_addr, cpu_addr, &params, true, false)?;
            if resolver.state.guard_samplers {
                resolver.state.sampled.push(view.surface);
            }
            Ok(view)
        })
    }

    /// View for a shader sampler. Null surface when the descriptor does not resolve or the
    /// sampler cannot read its texture type.
    pub fn get_texture_surface(
        &self,
        gpu_memory: &MemoryManager,
        tic: &TextureDescriptor,
        entry: &SamplerEntry,
    ) -> SurfaceView {
        self.get_sampled_surface(gpu_memory, tic, entry.expected_target(), || {
            entry
                .accepts(tic.texture_type)
                .then(|| SurfaceParams::for_texture(tic, entry))
        })
    }

    pub fn get_image_surface(
        &self,
        gpu_memory: &MemoryManager,
        tic: &TextureDescriptor,
        entry: &ImageEntry,
    ) -> SurfaceView {
        self.get_sampled_surface(gpu_memory, tic, entry.expected_target(), || {
            Some(SurfaceParams::for_image(tic, entry))
        })
    }

    pub fn guard_render_targets(&self, guard: bool) {
        self.lock_state().guard_render_targets = guard;
    }

    pub fn guard_samplers(&self, guard: bool) {
        self.lock_state().guard_samplers = guard;
    }

    /// Whether a surface sampled since the last call is bound as a render target.
    pub fn texture_barrier(&self) -> bool {
        let mut state = self.lock_state();
        let sampled = std::mem::take(&mut state.sampled);
        sampled.into_iter().any(|id| {
            state
                .surfaces
                .get(&id)
                .is_some_and(|surface| surface.base.is_render_target())
        })
    }

    /// Binds colour target `index`. `None`, address 0 or an unmapped address unbind it.
    pub fn bind_color_buffer(
        &self,
        gpu_memory: &MemoryManager,
        index: usize,
        desc: Option<&RenderTargetDescriptor>,
        preserve_contents: bool,
    ) -> Result<Option<SurfaceView>, TextureCacheError> {
        if index >= NUM_RENDER_TARGETS {
            return Err(TextureCacheError::InvalidRenderTarget(index));
        }
        let resolved = desc
            .filter(|desc| desc.gpu_addr != 0)
            .and_then(|desc| Some((desc, gpu_memory.gpu_to_cpu_address(desc.gpu_addr)?)));
        let Some((desc, cpu_addr)) = resolved else {
            self.set_empty_color_buffer(index)?;
            return Ok(None);
        };
        let params = SurfaceParams::for_render_target(desc);
        let view = self.resolve(gpu_memory, |resolver| {
            let view = resolver.get_surface(desc.gpu_addr, cpu_addr, &params, preserve_contents, true)?;
            let state = &mut *resolver.state;
            if let Some(previous) = state.render_targets[index] {
                let linear = state.set_render_target(previous.surface, None)
                    .is_some_and(|params| !params.is_tiled);
                if linear && state.config.async_gpu {
                    state.async_flushes.push(previous.surface);
                }
            }
            state.render_targets[index] = Some(view);
            state.set_render_target(view.surface, Some(RenderTargetSlot::Color(index)));
            Ok(view)
        });
        Ok(Some(view))
    }

    /// Binds the depth target. `None`, address 0 or an unmapped address unbind it.
    pub fn bind_depth_buffer(
        &self,
        gpu_memory: &MemoryManager,
        desc: Option<&DepthBufferDescriptor>,
        preserve_contents: bool,
    ) -> Option<SurfaceView> {
        let resolved = desc
            .filter(|desc| desc.gpu_addr != 0)
            .and_then(|desc| Some((desc, gpu_memory.gpu_to_cpu_address(desc.gpu_addr)?)));
        let Some((desc, cpu_addr)) = resolved else {
            self.set_empty_depth_buffer();
            return None;
        };
        let params = SurfaceParams::for_depth_buffer(desc);
        let view = self.resolve(gpu_memory, |resolver| {
            let view = resolver.get_surface(desc.gpu_addr, cpu_addr, &params, preserve_contents, true)?;
            let state = &mut *resolver.state;
            if let Some(previous) = state.depth_buffer {
                state.set_render_target(previous.surface, None);
            }
            state.depth_buffer = Some(view);
            state.set_render_target(view.surface, Some(RenderTargetSlot::Depth));
            Ok(view)
        });
        Some(view)
    }

    pub fn mark_color_buffer_in_use(&self, index: usize) -> Result<(), TextureCacheError> {
        let mut state = self.lock_state();
        let slot = state
            .render_targets
            .get(index)
            .ok_or(TextureCacheError::InvalidRenderTarget(index))?;
        if let Some(view) = *slot {
            state.mark_as_modified(view.surface, true);
        }
        Ok(())
    }

    pub fn mark_depth_buffer_in_use(&self) {
        let mut state = self.lock_state();
        if let Some(view) = state.depth_buffer {
            state.mark_as_modified(view.surface, true);
        }
    }

    pub fn set_empty_color_buffer(&self, index: usize) -> Result<(), TextureCacheError> {
        let mut state = self.lock_state();
        let slot = state
            .render_targets
            .get_mut(index)
            .ok_or(TextureCacheError::InvalidRenderTarget(index))?;
        if let Some(view) = slot.take() {
            state.set_render_target(view.surface, None);
        }
        Ok(())
    }

    pub fn set_empty_depth_buffer(&self) {
        let mut state = self.lock_state();
        if let Some(view) = state.depth_buffer.take() {
            state.set_render_target(view.surface, None);
        }
    }

    pub fn color_buffer(&self, index: usize) -> Option<SurfaceView> {
        self.lock_state().render_targets.get(index).copied().flatten()
    }

    pub fn depth_buffer(&self) -> Option<SurfaceView> {
        self.lock_state().depth_buffer
    }

    /// Slots whose surface was unregistered since the last call; the front-end must re-bind
    /// them.
    pub fn take_dirty_render_targets(&self) -> DirtyRenderTargets {
        std::mem::take(&mut self.lock_state().dirty)
    }

    /// 2D engine surface-to-surface copy.
    pub fn fermi_copy(
        &self,
        gpu_memory: &MemoryManager,
        src: &Fermi2dSurface,
        dst: &Fermi2dSurface,
        config: &BlitConfig,
    ) -> Result<(), TextureCacheError> {
        let src_cpu = gpu_memory
            .gpu_to_cpu_address(src.gpu_addr)
            .ok_or(TextureCacheError::UnmappedAddress(src.gpu_addr))?;
        let dst_cpu = gpu_memory
            .gpu_to_cpu_address(dst.gpu_addr)
            .ok_or(TextureCacheError::UnmappedAddress(dst.gpu_addr))?;
        self.resolve(gpu_memory, |resolver| {
            let mut src_params = SurfaceParams::for_fermi_copy(src);
            let mut dst_params = SurfaceParams::for_fermi_copy(dst);
            resolver.deduce_best_blit(&mut src_params, &mut dst_params, src.gpu_addr, dst.gpu_addr);
            let dst_view = resolver.get_surface(dst.gpu_addr, dst_cpu, &dst_params, true, false)?;
            let src_view = resolver.get_surface(src.gpu_addr, src_cpu, &src_params, true, false)?;
            let state = &mut *resolver.state;
            let views = state
                .surfaces
                .get(&src_view.surface)
                .and_then(|surface| surface.view(&src_view.view))
                .zip(
                    state
                        .surfaces
                        .get(&dst_view.surface)
                        .and_then(|surface| surface.view(&dst_view.view)),
                );
            if let Some((from, to)) = views {
                resolver.backend.image_blit(from, to, config);
            }
            state.mark_as_modified(dst_view.surface, true);
            Ok(())
        });
        Ok(())
    }

    /// Registered surface starting exactly at `cpu_addr`.
    pub fn try_find_framebuffer_surface(&self, cpu_addr: VAddr) -> Option<SurfaceId> {
        if cpu_addr == 0 {
            return None;
        }
        let state = self.lock_state();
        state
            .registry
            .candidates(cpu_addr, cpu_addr + 1, |id| {
                state
                    .surfaces
                    .get(&id)
                    .is_some_and(|surface| surface.base.cpu_addr() == cpu_addr)
            })
            .first()
            .copied()
    }

    pub fn null_surface(&self, target: SurfaceTarget) -> SurfaceView {
        self.lock_state().null_surface(&self.backend, target)
    }

    /// Drops every surface overlapping the range without writing it back.
    pub fn invalidate_region(&self, addr: VAddr, size: u64) {
        let mut state = self.lock_state();
        let overlaps = state.surfaces_in_region(addr, size);
        if overlaps.is_empty() {
            return;
        }
        trace!(addr = format_args!("{addr:#x}"), size, count = overlaps.len(), "invalidating");
        self.stats.inc_invalidations();
        for id in overlaps {
            state.unregister(self.tracker.as_ref(), id);
        }
    }

    /// The CPU wrote the range: surfaces over it are unregistered on the next
    /// [`sync_guest_host`](Self::sync_guest_host).
    pub fn on_cpu_write(&self, addr: VAddr, size: u64) {
        let mut state = self.lock_state();
        let overlaps = state.surfaces_in_region(addr, size);
        for id in overlaps {
            if state.base(id).is_memory_marked() {
                state.unmark_memory(self.tracker.as_ref(), id);
                state.set_flag(id, SurfaceFlags::SYNC_PENDING, true);
                state.marked_for_unregister.push(id);
            }
        }
    }

    pub fn sync_guest_host(&self) {
        let mut state = self.lock_state();
        let marked = std::mem::take(&mut state.marked_for_unregister);
        for id in marked {
            if state.base(id).is_registered() {
                state.set_flag(id, SurfaceFlags::SYNC_PENDING, false);
                state.unregister(self.tracker.as_ref(), id);
            }
        }
    }

    /// Writes back every modified surface overlapping the range, oldest modification first.
    pub fn flush_region(&self, gpu_memory: &MemoryManager, addr: VAddr, size: u64) {
        let overlaps = {
            let state = self.lock_state();
            let mut overlaps = state.surfaces_in_region(addr, size);
            overlaps.sort_by_key(|&id| state.base(id).modification_tick());
            overlaps
        };
        self.flush_surfaces(gpu_memory, overlaps);
    }

    pub fn must_flush_region(&self, addr: VAddr, size: u64) -> bool {
        let state = self.lock_state();
        state
            .surfaces_in_region(addr, size)
            .into_iter()
            .any(|id| state.base(id).is_modified())
    }

    pub fn async_flush_surface(&self, id: SurfaceId) {
        self.lock_state().async_flushes.push(id);
    }

    pub fn commit_async_flushes(&self) {
        self.lock_state().async_flushes.commit();
    }

    pub fn has_uncommitted_flushes(&self) -> bool {
        self.lock_state().async_flushes.has_uncommitted()
    }

    pub fn should_wait_async_flushes(&self) -> bool {
        self.lock_state().async_flushes.should_wait()
    }

    pub fn pop_async_flushes(&self, gpu_memory: &MemoryManager) {
        let batch = self.lock_state().async_flushes.pop();
        if let Some(batch) = batch {
            self.flush_surfaces(gpu_memory, batch);
        }
    }

    /// Advances the modification clock.
    pub fn tick(&self) -> u64 {
        self.lock_state().tick()
    }

    pub fn surface_info(&self, id: SurfaceId) -> Option<SurfaceInfo> {
        self.lock_state()
            .surfaces
            .get(&id)
            .map(|surface| surface.info(id))
    }

    pub fn view(&self, view: &SurfaceView) -> Option<B::View> {
        self.lock_state()
            .surfaces
            .get(&view.surface)
            .and_then(|surface| surface.view(&view.view).cloned())
    }

    pub fn host_surface(&self, id: SurfaceId) -> Option<Arc<B::Surface>> {
        self.lock_state()
            .surfaces
            .get(&id)
            .map(|surface| Arc::clone(&surface.host))
    }

    pub fn registered_surfaces(&self) -> Vec<SurfaceId> {
        self.lock_state().registry.all()
    }

    /// Destroys every reserved surface that is not registered again.
    pub fn clear_reserve(&self) -> usize {
        let mut state = self.lock_state();
        let state = &mut *state;
        let surfaces = &state.surfaces;
        let free = state.reserve.drain_free(|id| {
            surfaces
                .get(&id)
                .is_some_and(|surface| !surface.base.is_registered())
        });
        for id in &free {
            state.surfaces.remove(id);
            state.async_flushes.forget(*id);
            state.sampled.retain(|other| other != id);
        }
        for slot in state.render_targets.iter_mut().chain([&mut state.depth_buffer]) {
            if slot.is_some_and(|view| free.contains(&view.surface)) {
                *slot = None;
            }
        }
        debug!(count = free.len(), "cleared surface reserve");
        free.len()
    }
}

impl<B: Backend> RasterizerInterface for TextureCache<B> {
    fn flush_region(&self, gpu_memory: &MemoryManager, addr: VAddr, size: u64) {
        TextureCache::flush_region(self, gpu_memory, addr, size);
    }

    fn invalidate_region(&self, addr: VAddr, size: u64) {
        TextureCache::invalidate_region(self, addr, size);
    }
}
