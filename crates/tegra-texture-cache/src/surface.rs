//! Backend-independent state of a cached surface: where it lives in guest memory, how its mip
//! levels are laid out there, and how it relates to other candidate descriptions of the same
//! memory.

use bitflags::bitflags;
use tegra_memory::{GpuVAddr, VAddr};

use crate::copy::{CopyParams, ViewParams};
use crate::format::{PixelFormat, SurfaceTarget};
use crate::params::{self, SurfaceParams};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SurfaceFlags: u8 {
        /// Present in the spatial index.
        const REGISTERED = 1 << 0;
        /// Host copy is newer than guest memory.
        const MODIFIED = 1 << 1;
        /// Counted in the CPU layer's cached-pages tracker.
        const MEMORY_MARKED = 1 << 2;
        /// Bound as a colour or depth attachment.
        const RENDER_TARGET = 1 << 4;
        /// Written by the CPU; waiting for `sync_guest_host`.
        const SYNC_PENDING = 1 << 5;
    }
}

/// Stable identity of a cached surface. Never reused within one cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub(crate) u64);

impl SurfaceId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderTargetSlot {
    Color(usize),
    Depth,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchTopologyResult {
    FullMatch,
    /// Same bytes per block and tiling, but only one side is block-compressed.
    CompressUnmatch,
    NoMatch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchStructureResult {
    FullMatch,
    /// Same memory footprint, different width/height interpretation.
    Incomplete,
    NoMatch,
}

#[derive(Clone, Debug)]
pub struct SurfaceBase {
    gpu_addr: GpuVAddr,
    cpu_addr: VAddr,
    cpu_addr_end: VAddr,
    params: SurfaceParams,
    layer_size: usize,
    guest_memory_size: usize,
    host_memory_size: usize,
    mipmap_sizes: Vec<usize>,
    mipmap_offsets: Vec<usize>,
    flags: SurfaceFlags,
    modification_tick: u64,
    render_target: Option<RenderTargetSlot>,
}

impl SurfaceBase {
    pub fn new(gpu_addr: GpuVAddr, params: SurfaceParams) -> Self {
        let mut mipmap_sizes = Vec::with_capacity(params.num_levels as usize);
        let mut mipmap_offsets = Vec::with_capacity(params.num_levels as usize);
        let mut offset = 0;
        for level in 0..params.num_levels {
            let size = params.guest_mipmap_size(level);
            mipmap_sizes.push(size);
            mipmap_offsets.push(offset);
            offset += size;
        }
        let mut layer_size = offset;
        let guest_memory_size = if params.is_layered {
            if params.is_tiled {
                layer_size =
                    params::align_layered(layer_size, params.block_height, params.block_depth);
            }
            layer_size * params.depth as usize
        } else {
            layer_size
        };
        Self {
            gpu_addr,
            cpu_addr: 0,
            cpu_addr_end: 0,
            host_memory_size: params.host_size_in_bytes(),
            params,
            layer_size,
            guest_memory_size,
            mipmap_sizes,
            mipmap_offsets,
            flags: SurfaceFlags::empty(),
            modification_tick: 0,
            render_target: None,
        }
    }

    pub fn params(&self) -> &SurfaceParams {
        &self.params
    }

    pub fn gpu_addr(&self) -> GpuVAddr {
        self.gpu_addr
    }

    pub fn set_gpu_addr(&mut self, gpu_addr: GpuVAddr) {
        self.gpu_addr = gpu_addr;
    }

    pub fn cpu_addr(&self) -> VAddr {
        self.cpu_addr
    }

    pub fn cpu_addr_end(&self) -> VAddr {
        self.cpu_addr_end
    }

    pub fn set_cpu_addr(&mut self, cpu_addr: VAddr) {
        self.cpu_addr = cpu_addr;
        self.cpu_addr_end = cpu_addr + self.guest_memory_size as u64;
    }

    pub fn size_in_bytes(&self) -> usize {
        self.guest_memory_size
    }

    pub fn host_size_in_bytes(&self) -> usize {
        self.host_memory_size
    }

    pub fn layer_size(&self) -> usize {
        self.layer_size
    }

    pub fn mipmap_size(&self, level: u32) -> usize {
        self.mipmap_sizes[level as usize]
    }

    pub fn mipmap_offset(&self, level: u32) -> usize {
        self.mipmap_offsets[level as usize]
    }

    pub fn format(&self) -> PixelFormat {
        self.params.pixel_format
    }

    pub fn flags(&self) -> SurfaceFlags {
        self.flags
    }

    pub fn set_flag(&mut self, flag: SurfaceFlags, value: bool) {
        self.flags.set(flag, value);
    }

    pub fn is_registered(&self) -> bool {
        self.flags.contains(SurfaceFlags::REGISTERED)
    }

    pub fn is_modified(&self) -> bool {
        self.flags.contains(SurfaceFlags::MODIFIED)
    }

    pub fn is_memory_marked(&self) -> bool {
        self.flags.contains(SurfaceFlags::MEMORY_MARKED)
    }

    pub fn is_sync_pending(&self) -> bool {
        self.flags.contains(SurfaceFlags::SYNC_PENDING)
    }

    pub fn is_render_target(&self) -> bool {
        self.flags.contains(SurfaceFlags::RENDER_TARGET)
    }

    pub fn render_target(&self) -> Option<RenderTargetSlot> {
        self.render_target
    }

    pub fn mark_as_render_target(&mut self, slot: Option<RenderTargetSlot>) {
        self.render_target = slot;
        self.flags.set(SurfaceFlags::RENDER_TARGET, slot.is_some());
    }

    pub fn modification_tick(&self) -> u64 {
        self.modification_tick
    }

    pub fn mark_as_modified(&mut self, modified: bool, tick: u64) {
        self.flags.set(SurfaceFlags::MODIFIED, modified);
        self.modification_tick = tick;
    }

    /// Whether this surface is exempt from unregistration while render targets are guarded.
    pub fn is_protected(&self, only_3d_slices: bool) -> bool {
        self.is_render_target()
            && (!only_3d_slices
                || self.params.block_depth > 0
                || self.params.target == SurfaceTarget::Texture3D)
    }

    /// CPU-range intersection with `[start, end)`.
    pub fn overlaps(&self, start: VAddr, end: VAddr) -> bool {
        self.cpu_addr < end && self.cpu_addr_end > start
    }

    /// GPU-range containment of `[other_start, other_end)`.
    pub fn is_inside(&self, other_start: GpuVAddr, other_end: GpuVAddr) -> bool {
        let end = self.gpu_addr + self.guest_memory_size as u64;
        self.gpu_addr <= other_start && other_end <= end
    }

    pub fn match_format(&self, format: PixelFormat) -> bool {
        self.params.pixel_format == format
    }

    pub fn match_target(&self, target: SurfaceTarget) -> bool {
        self.params.target == target
    }

    pub fn matches_topology(&self, rhs: &SurfaceParams) -> MatchTopologyResult {
        let lhs = &self.params;
        if (lhs.bytes_per_block(), lhs.is_tiled, lhs.is_buffer())
            != (rhs.bytes_per_block(), rhs.is_tiled, rhs.is_buffer())
        {
            return MatchTopologyResult::NoMatch;
        }
        if lhs.is_compressed() == rhs.is_compressed() {
            MatchTopologyResult::FullMatch
        } else {
            MatchTopologyResult::CompressUnmatch
        }
    }

    pub fn matches_structure(&self, rhs: &SurfaceParams) -> MatchStructureResult {
        let lhs = &self.params;
        if lhs.is_buffer() {
            return if lhs.width * lhs.bytes_per_block() == rhs.width * rhs.bytes_per_block() {
                MatchStructureResult::FullMatch
            } else {
                MatchStructureResult::NoMatch
            };
        }

        if !lhs.is_tiled {
            if (lhs.height, lhs.pitch) != (rhs.height, rhs.pitch) {
                return MatchStructureResult::NoMatch;
            }
            return if lhs.width == rhs.width {
                MatchStructureResult::FullMatch
            } else {
                MatchStructureResult::Incomplete
            };
        }

        let layout = |p: &SurfaceParams| {
            (
                p.depth,
                p.block_width,
                p.block_height,
                p.block_depth,
                p.tile_width_spacing,
                p.num_levels,
            )
        };
        if layout(lhs) != layout(rhs) {
            return MatchStructureResult::NoMatch;
        }
        if (lhs.width, lhs.height) == (rhs.width, rhs.height) {
            return MatchStructureResult::FullMatch;
        }
        let ws = params::convert_width(rhs.block_aligned_width(), lhs.pixel_format, rhs.pixel_format);
        let hs = params::convert_height(rhs.height, lhs.pixel_format, rhs.pixel_format);
        if (lhs.block_aligned_width(), lhs.height) == (ws, hs) {
            MatchStructureResult::Incomplete
        } else {
            MatchStructureResult::NoMatch
        }
    }

    /// (layer, level) starting exactly at `candidate_gpu_addr`, if any.
    pub fn get_layer_mipmap(&self, candidate_gpu_addr: GpuVAddr) -> Option<(u32, u32)> {
        if candidate_gpu_addr == self.gpu_addr {
            return Some((0, 0));
        }
        if candidate_gpu_addr < self.gpu_addr || self.layer_size == 0 {
            return None;
        }
        let relative = (candidate_gpu_addr - self.gpu_addr) as usize;
        let layer = relative / self.layer_size;
        if layer >= self.params.depth as usize {
            return None;
        }
        let mipmap_address = relative - self.layer_size * layer;
        let level = self.mipmap_offsets.binary_search(&mipmap_address).ok()?;
        Some((layer as u32, level as u32))
    }

    /// Copies needed to move this surface's contents into a surface described by `in_params`.
    pub fn break_down(&self, in_params: &SurfaceParams) -> Vec<CopyParams> {
        let levels = self.params.num_levels.min(in_params.num_levels);
        if self.params.is_layered {
            let layers = self.params.depth.min(in_params.depth);
            let mut bricks = Vec::with_capacity((layers * levels) as usize);
            for layer in 0..layers {
                for level in 0..levels {
                    let width = params::intersect_width(&self.params, in_params, level, level);
                    let height = params::intersect_height(&self.params, in_params, level, level);
                    bricks.push(CopyParams::new(layer, layer, level, level, width, height, 1));
                }
            }
            bricks
        } else {
            (0..levels)
                .map(|level| {
                    let width = params::intersect_width(&self.params, in_params, level, level);
                    let height = params::intersect_height(&self.params, in_params, level, level);
                    let depth = self.params.mip_depth(level).min(in_params.mip_depth(level));
                    CopyParams::level(width, height, depth, level)
                })
                .collect()
        }
    }

    /// View of this surface that exposes the sub-resource `view_params` describes at
    /// `view_addr`, when the candidate lines up with level/layer boundaries.
    pub fn emplace_view_params(
        &self,
        view_params: &SurfaceParams,
        view_addr: GpuVAddr,
        candidate_size: usize,
    ) -> Option<ViewParams> {
        if self.params.target == SurfaceTarget::Texture3D
            || view_params.target == SurfaceTarget::Texture3D
            || (self.params.num_levels == 1 && !self.params.is_layered)
        {
            return None;
        }
        let (layer, level) = self.get_layer_mipmap(view_addr)?;
        if self.mipmap_size(level) != candidate_size {
            return self.irregular_view_params(view_params, view_addr, candidate_size, layer, level);
        }
        Some(ViewParams::new(view_params.target, layer, 1, level, 1))
    }

    /// Views spanning several levels of one layer, or several whole layers.
    fn irregular_view_params(
        &self,
        view_params: &SurfaceParams,
        view_addr: GpuVAddr,
        candidate_size: usize,
        layer: u32,
        level: u32,
    ) -> Option<ViewParams> {
        let end_addr = view_addr + candidate_size as u64;
        let (end_layer, end_level) = if end_addr == self.gpu_addr + self.guest_memory_size as u64 {
            (self.params.num_layers(), 0)
        } else {
            self.get_layer_mipmap(end_addr)?
        };
        if end_layer == layer {
            if end_level <= level {
                return None;
            }
            return Some(ViewParams::new(view_params.target, layer, 1, level, end_level - level));
        }
        if end_level != 0 {
            return None;
        }
        if level == 0 {
            let num_levels = view_params.num_levels.min(self.params.num_levels);
            return Some(ViewParams::new(
                view_params.target,
                layer,
                end_layer - layer,
                0,
                num_levels,
            ));
        }
        if end_layer == layer + 1 {
            return Some(ViewParams::new(
                view_params.target,
                layer,
                1,
                level,
                self.params.num_levels - level,
            ));
        }
        None
    }

    /// Reinterprets the whole surface under another target.
    pub fn overview_params(&self, overview: &SurfaceParams) -> ViewParams {
        let num_layers = if self.params.is_layered && !overview.is_layered {
            1
        } else {
            self.params.num_layers()
        };
        ViewParams::new(overview.target, 0, num_layers, 0, self.params.num_levels)
    }

    /// Slices `[slice, slice + depth)` of a 3D surface.
    pub fn view_3d_params(&self, slice: u32, depth: u32, base_level: u32, num_levels: u32) -> ViewParams {
        ViewParams::new(self.params.target, slice, depth, base_level, num_levels)
    }

    pub fn main_view_params(&self) -> ViewParams {
        ViewParams::full(&self.params)
    }
}
