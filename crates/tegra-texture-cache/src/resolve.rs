//! Resolution of a (GPU address, params) request against the cached surfaces.
//!
//! Everything here runs with the cache lock held. The one operation that must not, writing a
//! modified surface back to guest memory, is requested instead: a resolution that needs
//! surfaces flushed first returns [`NeedsFlush`] before touching any state, and the caller
//! retries after flushing them outside the lock.

use std::sync::{Mutex, MutexGuard};

use hashbrown::HashSet;
use tegra_memory::{GpuVAddr, MemoryManager, PageCacheTracker, VAddr};
use tracing::{debug, error, trace, warn};

use crate::backend::Backend;
use crate::copy::CopyParams;
use crate::format::{self, SurfaceTarget};
use crate::params::{self, SurfaceParams};
use crate::staging::StagingCache;
use crate::state::{CacheState, CachedSurface, SurfaceView};
use crate::stats::CacheStats;
use crate::surface::{MatchStructureResult, MatchTopologyResult, SurfaceBase, SurfaceFlags, SurfaceId};

/// Modified surfaces to write back, oldest modification first, before resolution can go on.
#[derive(Debug, PartialEq, Eq)]
pub struct NeedsFlush(pub Vec<SurfaceId>);

pub type Resolution<T> = Result<T, NeedsFlush>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecycleStrategy {
    /// Drop the overlaps and start from guest memory as it is.
    Ignore,
    /// Write modified overlaps back first, then load the new surface from guest memory.
    Flush,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deduction {
    Complete(SurfaceId),
    /// Nothing cached there.
    Incomplete,
    Failed,
}

pub(crate) fn lock_staging(staging: &Mutex<StagingCache>) -> MutexGuard<'_, StagingCache> {
    staging.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Resolver<'a, B: Backend> {
    pub state: &'a mut CacheState<B>,
    pub backend: &'a B,
    pub memory: &'a MemoryManager,
    pub tracker: &'a dyn PageCacheTracker,
    pub staging: &'a Mutex<StagingCache>,
    pub stats: &'a CacheStats,
    /// Surfaces already written back during this request.
    pub flushed: &'a HashSet<SurfaceId>,
}

impl<B: Backend> Resolver<'_, B> {
    fn base(&self, id: SurfaceId) -> &SurfaceBase {
        self.state.base(id)
    }

    fn is_extreme(&self) -> bool {
        self.state.config.is_extreme()
    }

    fn main_view(&mut self, id: SurfaceId) -> SurfaceView {
        self.state.main_view(self.backend, id)
    }

    pub fn register(&mut self, id: SurfaceId) {
        let gpu_addr = self.base(id).gpu_addr();
        let size = self.base(id).size_in_bytes() as u64;
        let Some(cpu_addr) = self.memory.gpu_to_cpu_address(gpu_addr) else {
            error!(
                gpu_addr = format_args!("{gpu_addr:#x}"),
                "failed to register surface with unmapped gpu address"
            );
            return;
        };
        let base = self.state.base_mut(id);
        base.set_cpu_addr(cpu_addr);
        base.set_flag(SurfaceFlags::REGISTERED | SurfaceFlags::MEMORY_MARKED, true);
        let end = base.cpu_addr_end();
        self.state.registry.insert(id, cpu_addr, end);
        self.tracker.update_pages_cached_count(cpu_addr, size, 1);
    }

    pub fn unregister(&mut self, id: SurfaceId) {
        self.state.unregister(self.tracker, id);
    }

    /// An unregistered surface with `params`: from the reserve when one is free, otherwise new.
    fn get_uncached(&mut self, gpu_addr: GpuVAddr, params: &SurfaceParams) -> SurfaceId {
        let state = &*self.state;
        let reserved = state.reserve.find(params, |id| {
            state
                .surfaces
                .get(&id)
                .is_some_and(|surface| !surface.base.is_registered())
        });
        if let Some(id) = reserved {
            trace!(%id, gpu_addr = format_args!("{gpu_addr:#x}"), "reusing reserved surface");
            self.stats.inc_reserve_reuses();
            let base = self.state.base_mut(id);
            base.set_gpu_addr(gpu_addr);
            base.set_flag(SurfaceFlags::MODIFIED | SurfaceFlags::SYNC_PENDING, false);
            return id;
        }
        let host = self.backend.create_surface(gpu_addr, params);
        let id = self
            .state
            .insert(CachedSurface::new(SurfaceBase::new(gpu_addr, *params), host));
        debug!(
            %id,
            gpu_addr = format_args!("{gpu_addr:#x}"),
            format = ?params.pixel_format,
            target = params.target_name(),
            width = params.width,
            height = params.height,
            depth = params.depth,
            levels = params.num_levels,
            "created surface"
        );
        self.stats.inc_surfaces_created();
        id
    }

    /// Returns a surface that was never registered to the reuse pool.
    fn release(&mut self, id: SurfaceId) {
        let params = *self.base(id).params();
        self.state.reserve.reserve(params, id);
    }

    fn load_surface(&mut self, id: SurfaceId) {
        let surface = &self.state.surfaces[&id];
        {
            let mut staging = lock_staging(self.staging);
            let data = staging.load_buffer(self.memory, &surface.base);
            self.backend
                .upload_texture(&surface.host, surface.base.params(), data);
        }
        self.stats.inc_uploads();
        self.state.mark_as_modified(id, false);
    }

    fn initialize(&mut self, gpu_addr: GpuVAddr, params: &SurfaceParams, preserve_contents: bool) -> SurfaceView {
        let id = self.get_uncached(gpu_addr, params);
        self.register(id);
        if preserve_contents {
            self.load_surface(id);
        }
        self.main_view(id)
    }

    fn try_copy_image(&self, src: SurfaceId, dst: SurfaceId, copy: &CopyParams) {
        let (from, to) = (&self.state.surfaces[&src], &self.state.surfaces[&dst]);
        let (src_format, dst_format) = (from.base.format(), to.base.format());
        if !format::is_copy_compatible(src_format, dst_format) {
            error!(src = ?src_format, dst = ?dst_format, "illegal copy between formats");
            self.stats.inc_illegal_copies();
            return;
        }
        self.backend.image_copy(&from.host, &to.host, copy);
    }

    fn is_modified(&self, id: SurfaceId) -> bool {
        self.base(id).is_modified()
    }

    pub fn pick_strategy(
        &self,
        overlaps: &[SurfaceId],
        params: &SurfaceParams,
        topology: MatchTopologyResult,
    ) -> RecycleStrategy {
        let policy = self.state.config.recycle;
        if self.is_extreme() {
            return RecycleStrategy::Flush;
        }
        let any_3d = params.target == SurfaceTarget::Texture3D
            || overlaps
                .iter()
                .any(|&id| self.base(id).params().target == SurfaceTarget::Texture3D);
        if policy.flush_3d && any_3d {
            return RecycleStrategy::Flush;
        }
        match topology {
            MatchTopologyResult::CompressUnmatch if policy.flush_compress_mismatch => {
                RecycleStrategy::Flush
            }
            MatchTopologyResult::FullMatch if !params.is_tiled && policy.flush_untiled_full_match => {
                RecycleStrategy::Flush
            }
            _ => RecycleStrategy::Ignore,
        }
    }

    fn recycle(
        &mut self,
        overlaps: &[SurfaceId],
        gpu_addr: GpuVAddr,
        params: &SurfaceParams,
        preserve_contents: bool,
        topology: MatchTopologyResult,
    ) -> Resolution<SurfaceView> {
        let strategy = self.pick_strategy(overlaps, params, topology);
        if strategy == RecycleStrategy::Flush {
            let mut pending: Vec<SurfaceId> = overlaps
                .iter()
                .copied()
                .filter(|id| self.is_modified(*id) && !self.flushed.contains(id))
                .collect();
            if !pending.is_empty() {
                pending.sort_by_key(|&id| self.base(id).modification_tick());
                return Err(NeedsFlush(pending));
            }
        }
        debug!(
            ?strategy,
            ?topology,
            overlaps = overlaps.len(),
            gpu_addr = format_args!("{gpu_addr:#x}"),
            "recycling overlaps"
        );
        self.stats.inc_recycles();
        for &id in overlaps {
            self.unregister(id);
        }
        let load = match strategy {
            RecycleStrategy::Flush => preserve_contents,
            RecycleStrategy::Ignore => preserve_contents && self.is_extreme(),
        };
        Ok(self.initialize(gpu_addr, params, load))
    }

    /// Replaces `current` with a surface described by `params`, carrying its contents over.
    fn rebuild(&mut self, current: SurfaceId, params: &SurfaceParams, is_render: bool) -> SurfaceView {
        let gpu_addr = self.base(current).gpu_addr();
        let old = *self.base(current).params();
        let mut new_params = *params;
        if old.pixel_format != params.pixel_format
            && !is_render
            && self.state.siblings.get(old.pixel_format) == Some(params.pixel_format)
        {
            new_params.pixel_format = old.pixel_format;
            new_params.surface_type = old.surface_type;
        }
        let new = self.get_uncached(gpu_addr, &new_params);
        if old.surface_type != new_params.surface_type {
            let (from, to) = (&self.state.surfaces[&current], &self.state.surfaces[&new]);
            self.backend.buffer_copy(&from.host, &to.host);
        } else {
            for brick in self.base(current).break_down(&new_params) {
                self.try_copy_image(current, new, &brick);
            }
        }
        debug!(
            from = %current,
            to = %new,
            old_format = ?old.pixel_format,
            new_format = ?new_params.pixel_format,
            "rebuilt surface"
        );
        self.stats.inc_rebuilds();
        let modified = self.is_modified(current);
        self.unregister(current);
        self.register(new);
        self.state.mark_as_modified(new, modified);
        self.main_view(new)
    }

    fn manage_structural_match(
        &mut self,
        current: SurfaceId,
        params: &SurfaceParams,
        is_render: bool,
    ) -> SurfaceView {
        let base = self.base(current);
        let is_mirage = !base.match_format(params.pixel_format);
        let is_sibling =
            !is_render && self.state.siblings.are_siblings(base.format(), params.pixel_format);
        if is_mirage && !is_sibling {
            return self.rebuild(current, params, is_render);
        }
        let view = if base.match_target(params.target) {
            base.main_view_params()
        } else {
            base.overview_params(params)
        };
        self.state.view_handle(self.backend, current, view)
    }

    /// Builds one surface for `params` out of overlaps that sit at its level/layer boundaries.
    fn try_reconstruct(
        &mut self,
        overlaps: &[SurfaceId],
        params: &SurfaceParams,
        gpu_addr: GpuVAddr,
    ) -> Option<SurfaceView> {
        if params.target == SurfaceTarget::Texture3D {
            return None;
        }
        let new = self.get_uncached(gpu_addr, params);
        let modified = overlaps.iter().any(|&id| self.is_modified(id));
        if !modified {
            self.load_surface(new);
            for &id in overlaps {
                self.unregister(id);
            }
            self.register(new);
            self.stats.inc_reconstructions();
            return Some(self.main_view(new));
        }

        let (block_width, block_height) =
            (params.default_block_width(), params.default_block_height());
        let mut passed = 0;
        for &id in overlaps {
            let src = self.base(id);
            let src_params = *src.params();
            let Some((base_layer, base_level)) = self.base(new).get_layer_mipmap(src.gpu_addr()) else {
                continue;
            };
            if self.base(new).mipmap_size(base_level) != src.mipmap_size(0) {
                continue;
            }
            passed += 1;
            let levels = src_params
                .num_levels
                .min(params.num_levels - base_level);
            let depth = if src_params.is_layered { src_params.depth } else { 1 };
            for level in 0..levels {
                let dst_level = base_level + level;
                let width = params::intersect_width(&src_params, params, level, dst_level);
                let height = params::intersect_height(&src_params, params, level, dst_level);
                if width < block_width || height < block_height {
                    break;
                }
                let copy = CopyParams::new(0, base_layer, level, dst_level, width, height, depth);
                self.try_copy_image(id, new, &copy);
            }
        }
        if passed == 0 || (self.is_extreme() && passed != overlaps.len()) {
            warn!(
                passed,
                overlaps = overlaps.len(),
                gpu_addr = format_args!("{gpu_addr:#x}"),
                "surface reconstruction failed"
            );
            self.release(new);
            return None;
        }
        for &id in overlaps {
            self.unregister(id);
        }
        self.state.mark_as_modified(new, true);
        self.register(new);
        debug!(%new, passed, "reconstructed surface from overlaps");
        self.stats.inc_reconstructions();
        Some(self.main_view(new))
    }

    fn manage_3d(
        &mut self,
        overlaps: &[SurfaceId],
        params: &SurfaceParams,
        gpu_addr: GpuVAddr,
        cpu_addr: VAddr,
        preserve_contents: bool,
    ) -> Option<SurfaceView> {
        if params.target != SurfaceTarget::Texture3D {
            for &id in overlaps {
                let base = self.base(id);
                if !base.match_target(params.target) {
                    if overlaps.len() == 1 && base.cpu_addr() == cpu_addr && !self.is_extreme() {
                        self.unregister(id);
                        return Some(self.initialize(gpu_addr, params, preserve_contents));
                    }
                    return None;
                }
                if base.cpu_addr() == cpu_addr
                    && base.matches_structure(params) == MatchStructureResult::FullMatch
                {
                    return Some(self.main_view(id));
                }
            }
            return None;
        }

        if params.num_levels > 1 {
            warn!(levels = params.num_levels, "mipmapped 3D surfaces are not assembled from slices");
            return None;
        }

        if let [id] = *overlaps {
            let base = self.base(id);
            let overlap = base.params();
            if overlap.num_levels == 1 && cpu_addr >= base.cpu_addr() {
                let (_, _, slice) = params.block_offset_xyz((cpu_addr - base.cpu_addr()) as u32);
                if slice < overlap.depth {
                    let view = base.view_3d_params(slice, params.depth, 0, 1);
                    return Some(self.state.view_handle(self.backend, id, view));
                }
            }
        }

        let new = self.get_uncached(gpu_addr, params);
        let mut modified = false;
        for &id in overlaps {
            let base = self.base(id);
            let src = base.params();
            let compatible = src.target == SurfaceTarget::Texture2D
                && src.height == params.height
                && src.block_depth == params.block_depth
                && src.block_height == params.block_height;
            let offset = base.cpu_addr().checked_sub(cpu_addr);
            let Some(offset) = offset.filter(|_| compatible) else {
                warn!(%id, "slice does not fit the 3D surface");
                self.release(new);
                return None;
            };
            modified |= base.is_modified();
            let (_, _, slice) = params.block_offset_xyz(offset as u32);
            let copy = CopyParams::new(0, slice, 0, 0, params.width, params.height, 1);
            self.try_copy_image(id, new, &copy);
        }
        for &id in overlaps {
            self.unregister(id);
        }
        self.register(new);
        if !modified && preserve_contents {
            self.load_surface(new);
        } else {
            self.state.mark_as_modified(new, modified);
        }
        debug!(%new, slices = overlaps.len(), "assembled 3D surface from slices");
        Some(self.main_view(new))
    }

    pub fn get_surface(
        &mut self,
        gpu_addr: GpuVAddr,
        cpu_addr: VAddr,
        params: &SurfaceParams,
        preserve_contents: bool,
        is_render: bool,
    ) -> Resolution<SurfaceView> {
        if let Some(current) = self.state.registry.l1(cpu_addr) {
            let base = self.base(current);
            let topology = base.matches_topology(params);
            if topology != MatchTopologyResult::FullMatch {
                return self.recycle(&[current], gpu_addr, params, preserve_contents, topology);
            }
            let structure = base.matches_structure(params);
            if structure != MatchStructureResult::NoMatch {
                let not_3d = params.target != SurfaceTarget::Texture3D
                    && base.params().target != SurfaceTarget::Texture3D;
                if not_3d || base.match_target(params.target) {
                    trace!(%current, cpu_addr = format_args!("{cpu_addr:#x}"), ?structure, "l1 hit");
                    self.stats.inc_l1_hits();
                    return Ok(match structure {
                        MatchStructureResult::FullMatch => {
                            self.manage_structural_match(current, params, is_render)
                        }
                        _ => self.rebuild(current, params, is_render),
                    });
                }
            }
        }

        let candidate_size = params.guest_size_in_bytes();
        let overlaps = self.state.surfaces_in_region(cpu_addr, candidate_size as u64);
        if overlaps.is_empty() {
            return Ok(self.initialize(gpu_addr, params, preserve_contents));
        }

        for &id in &overlaps {
            let topology = self.base(id).matches_topology(params);
            if topology != MatchTopologyResult::FullMatch {
                return self.recycle(&overlaps, gpu_addr, params, preserve_contents, topology);
            }
        }

        let involves_3d = params.block_depth > 0
            || params.target == SurfaceTarget::Texture3D
            || overlaps
                .iter()
                .any(|&id| self.base(id).params().target == SurfaceTarget::Texture3D);
        if involves_3d {
            if let Some(view) =
                self.manage_3d(&overlaps, params, gpu_addr, cpu_addr, preserve_contents)
            {
                return Ok(view);
            }
        }

        if let [current] = overlaps[..] {
            let base = self.base(current);
            if !base.is_inside(gpu_addr, gpu_addr + candidate_size as u64) {
                if let Some(view) = self.try_reconstruct(&overlaps, params, gpu_addr) {
                    return Ok(view);
                }
                return self.recycle(
                    &overlaps,
                    gpu_addr,
                    params,
                    preserve_contents,
                    MatchTopologyResult::FullMatch,
                );
            }
            if let Some(view) = base.emplace_view_params(params, gpu_addr, candidate_size) {
                if base.match_format(params.pixel_format) {
                    return Ok(self.state.view_handle(self.backend, current, view));
                }
                return self.rebuild_mirage(current, gpu_addr, params, preserve_contents, is_render);
            }
        } else if let Some(view) = self.try_reconstruct(&overlaps, params, gpu_addr) {
            return Ok(view);
        }

        self.recycle(
            &overlaps,
            gpu_addr,
            params,
            preserve_contents,
            MatchTopologyResult::FullMatch,
        )
    }

    /// The candidate is a sub-resource of `current` under a different format: rebuild the
    /// whole surface in that format and look the sub-resource up again.
    fn rebuild_mirage(
        &mut self,
        current: SurfaceId,
        gpu_addr: GpuVAddr,
        params: &SurfaceParams,
        preserve_contents: bool,
        is_render: bool,
    ) -> Resolution<SurfaceView> {
        let mut new_params = *self.base(current).params();
        new_params.width =
            params::convert_width(new_params.width, new_params.pixel_format, params.pixel_format);
        new_params.height =
            params::convert_height(new_params.height, new_params.pixel_format, params.pixel_format);
        new_params.pixel_format = params.pixel_format;
        new_params.surface_type = params.pixel_format.surface_type();
        let rebuilt = self.rebuild(current, &new_params, is_render).surface;
        let candidate_size = params.guest_size_in_bytes();
        if let Some(view) = self
            .base(rebuilt)
            .emplace_view_params(params, gpu_addr, candidate_size)
        {
            return Ok(self.state.view_handle(self.backend, rebuilt, view));
        }
        self.recycle(
            &[rebuilt],
            gpu_addr,
            params,
            preserve_contents,
            MatchTopologyResult::FullMatch,
        )
    }

    pub fn deduce_surface(&self, gpu_addr: GpuVAddr, params: &SurfaceParams) -> Deduction {
        let Some(cpu_addr) = self.memory.gpu_to_cpu_address(gpu_addr) else {
            return Deduction::Failed;
        };
        if let Some(current) = self.state.registry.l1(cpu_addr) {
            let base = self.base(current);
            if base.matches_topology(params) != MatchTopologyResult::FullMatch {
                return Deduction::Failed;
            }
            if base.matches_structure(params) != MatchStructureResult::NoMatch
                && base.match_target(params.target)
            {
                return Deduction::Complete(current);
            }
        }
        match self
            .state
            .surfaces_in_region(cpu_addr, params.guest_size_in_bytes() as u64)[..]
        {
            [] => Deduction::Incomplete,
            [only] => Deduction::Complete(only),
            _ => Deduction::Failed,
        }
    }

    /// Makes a 2D-engine copy involving a depth surface operate on depth formats on both
    /// sides.
    pub fn deduce_best_blit(
        &self,
        src_params: &mut SurfaceParams,
        dst_params: &mut SurfaceParams,
        src_gpu_addr: GpuVAddr,
        dst_gpu_addr: GpuVAddr,
    ) {
        let deduced_src = self.deduce_surface(src_gpu_addr, src_params);
        let deduced_dst = self.deduce_surface(dst_gpu_addr, dst_params);
        let is_depth = |id: SurfaceId| self.base(id).params().is_pixel_format_zeta();
        let (src, dst) = match (deduced_src, deduced_dst) {
            (Deduction::Complete(src), Deduction::Complete(dst)) => {
                if !(is_depth(src) && is_depth(dst)) {
                    return;
                }
                (src, dst)
            }
            (Deduction::Incomplete, Deduction::Complete(dst)) if is_depth(dst) => (dst, dst),
            (Deduction::Complete(src), Deduction::Incomplete) if is_depth(src) => (src, src),
            _ => return,
        };
        let inherit = |to: &mut SurfaceParams, from: SurfaceId| {
            let params = self.base(from).params();
            to.pixel_format = params.pixel_format;
            to.surface_type = params.surface_type;
        };
        inherit(src_params, src);
        inherit(dst_params, dst);
    }
}
