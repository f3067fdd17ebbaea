//! Texture and surface cache for a Tegra-class (Maxwell) GPU.
//!
//! Guest textures, render targets and 2D-engine surfaces live in guest memory in the GPU's
//! block-linear or pitch layouts. The cache resolves every request for one of them to a host
//! surface (through a [`Backend`]), reusing, reinterpreting or rebuilding cached surfaces when
//! requests overlap, and keeps the two copies coherent: modified surfaces are written back
//! before guest memory is read, and surfaces are dropped when the CPU writes over them.

pub mod backend;
pub mod cache;
pub mod config;
pub mod copy;
pub mod descriptor;
pub mod error;
pub mod flush;
pub mod format;
pub mod params;
pub mod registry;
mod resolve;
pub mod software;
pub mod staging;
pub mod state;
pub mod stats;
pub mod surface;
pub mod tiling;

pub use backend::Backend;
pub use cache::TextureCache;
pub use config::{GpuAccuracy, RecyclePolicy, TextureCacheConfig};
pub use copy::{BlitConfig, BlitFilter, BlitOperation, CopyParams, Rect, ViewParams};
pub use descriptor::{
    BlockLinear, DepthBufferDescriptor, Fermi2dSurface, ImageEntry, ImageType,
    RenderTargetDescriptor, SamplerEntry, ShaderTextureType, TextureDescriptor, TicTextureType,
};
pub use error::TextureCacheError;
pub use format::{PixelFormat, SiblingFormats, SurfaceTarget, SurfaceType};
pub use params::SurfaceParams;
pub use software::{BackendEvent, SoftwareBackend, SoftwareSurface, SoftwareView};
pub use state::{DirtyRenderTargets, SurfaceInfo, SurfaceView, NUM_RENDER_TARGETS};
pub use stats::CacheStatsSnapshot;
pub use surface::{RenderTargetSlot, SurfaceFlags, SurfaceId};

#[cfg(test)]
mod tests;
