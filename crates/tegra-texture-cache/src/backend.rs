//! Host graphics API hooks the cache is generic over.

use std::sync::Arc;

use tegra_memory::GpuVAddr;

use crate::copy::{BlitConfig, CopyParams, ViewParams};
use crate::params::SurfaceParams;

/// Host-side image storage and the transfers the cache needs from it.
///
/// Pixel data crosses this boundary in the host layout: level-major, the layers of a level
/// contiguous, rows tightly packed in format blocks. Calls are infallible from the cache's
/// point of view; a backend that can fail must handle it internally.
pub trait Backend: Send + Sync {
    type Surface: Send + Sync;
    type View: Clone + Send + Sync;

    fn create_surface(&self, gpu_addr: GpuVAddr, params: &SurfaceParams) -> Self::Surface;

    fn create_view(
        &self,
        surface: &Arc<Self::Surface>,
        params: &SurfaceParams,
        view: &ViewParams,
    ) -> Self::View;

    fn upload_texture(&self, surface: &Self::Surface, params: &SurfaceParams, data: &[u8]);

    fn download_texture(&self, surface: &Self::Surface, params: &SurfaceParams, data: &mut [u8]);

    /// Sub-resource copy between surfaces of the same storage type.
    fn image_copy(&self, src: &Self::Surface, dst: &Self::Surface, copy: &CopyParams);

    fn image_blit(&self, src: &Self::View, dst: &Self::View, config: &BlitConfig);

    /// Raw byte copy through a linear buffer, used when storage types differ.
    fn buffer_copy(&self, src: &Self::Surface, dst: &Self::Surface);
}
