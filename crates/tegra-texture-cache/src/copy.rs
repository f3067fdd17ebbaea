//! Parameters of host-side copies, blits and views.

use crate::format::SurfaceTarget;
use crate::params::SurfaceParams;

/// Sub-resource copy between two host images, in texels.
///
/// `z` is the array layer for layered surfaces and the slice for 3D surfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CopyParams {
    pub source_x: u32,
    pub source_y: u32,
    pub source_z: u32,
    pub dest_x: u32,
    pub dest_y: u32,
    pub dest_z: u32,
    pub source_level: u32,
    pub dest_level: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl CopyParams {
    /// Copies a `width` x `height` x `depth` box from level `source_level` at layer/slice
    /// `source_z` to level `dest_level` at layer/slice `dest_z`.
    pub fn new(
        source_z: u32,
        dest_z: u32,
        source_level: u32,
        dest_level: u32,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Self {
        Self {
            source_x: 0,
            source_y: 0,
            source_z,
            dest_x: 0,
            dest_y: 0,
            dest_z,
            source_level,
            dest_level,
            width,
            height,
            depth,
        }
    }

    /// Whole-level copy between identically laid out levels.
    pub fn level(width: u32, height: u32, depth: u32, level: u32) -> Self {
        Self::new(0, 0, level, level, width, height, depth)
    }
}

/// Sub-resource range a view exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewParams {
    pub target: SurfaceTarget,
    pub base_layer: u32,
    pub num_layers: u32,
    pub base_level: u32,
    pub num_levels: u32,
}

impl ViewParams {
    pub fn new(
        target: SurfaceTarget,
        base_layer: u32,
        num_layers: u32,
        base_level: u32,
        num_levels: u32,
    ) -> Self {
        Self {
            target,
            base_layer,
            num_layers,
            base_level,
            num_levels,
        }
    }

    /// The whole resource.
    pub fn full(params: &SurfaceParams) -> Self {
        Self::new(params.target, 0, params.num_layers(), 0, params.num_levels)
    }

    pub fn is_layered(&self) -> bool {
        self.target.is_layered()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlitFilter {
    #[default]
    Point,
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlitOperation {
    #[default]
    SrcCopy,
    SrcCopyAnd,
    Blend,
}

/// 2D engine blit configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlitConfig {
    pub operation: BlitOperation,
    pub filter: BlitFilter,
    pub src_rect: Rect,
    pub dst_rect: Rect,
}
