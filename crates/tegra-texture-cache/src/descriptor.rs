//! Already-decoded engine state describing texture, render-target and 2D-copy surfaces.
//!
//! Register decoding lives in the command front-end; it hands the cache these plain structs.

use tegra_memory::GpuVAddr;

use crate::format::{PixelFormat, SurfaceTarget};

/// Texture type as written in a texture image control (TIC) entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TicTextureType {
    Texture1D,
    Texture2D,
    Texture3D,
    TextureCubemap,
    Texture1DArray,
    Texture2DArray,
    Texture1DBuffer,
    Texture2DNoMipmap,
    TextureCubeArray,
}

/// Sampler texture type declared by a shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderTextureType {
    Texture1D,
    Texture2D,
    Texture3D,
    TextureCube,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageType {
    Texture1D,
    TextureBuffer,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    Texture3D,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerEntry {
    pub texture_type: ShaderTextureType,
    pub is_array: bool,
    pub is_shadow: bool,
}

impl SamplerEntry {
    pub fn new(texture_type: ShaderTextureType) -> Self {
        Self {
            texture_type,
            is_array: false,
            is_shadow: false,
        }
    }

    pub fn expected_target(&self) -> SurfaceTarget {
        match (self.texture_type, self.is_array) {
            (ShaderTextureType::Texture1D, false) => SurfaceTarget::Texture1D,
            (ShaderTextureType::Texture1D, true) => SurfaceTarget::Texture1DArray,
            (ShaderTextureType::Texture2D, false) => SurfaceTarget::Texture2D,
            (ShaderTextureType::Texture2D, true) => SurfaceTarget::Texture2DArray,
            (ShaderTextureType::Texture3D, _) => SurfaceTarget::Texture3D,
            (ShaderTextureType::TextureCube, false) => SurfaceTarget::TextureCubemap,
            (ShaderTextureType::TextureCube, true) => SurfaceTarget::TextureCubeArray,
        }
    }

    /// Whether a shader sampler of this kind may read a TIC entry of `tic_type`.
    pub fn accepts(&self, tic_type: TicTextureType) -> bool {
        let shader_type = self.texture_type;
        match tic_type {
            TicTextureType::Texture1D | TicTextureType::Texture1DArray => {
                shader_type == ShaderTextureType::Texture1D
            }
            TicTextureType::Texture1DBuffer => true,
            TicTextureType::Texture2D | TicTextureType::Texture2DNoMipmap => {
                shader_type == ShaderTextureType::Texture2D
            }
            TicTextureType::Texture2DArray => matches!(
                shader_type,
                ShaderTextureType::Texture2D | ShaderTextureType::TextureCube
            ),
            TicTextureType::Texture3D => shader_type == ShaderTextureType::Texture3D,
            TicTextureType::TextureCubemap | TicTextureType::TextureCubeArray => {
                shader_type == ShaderTextureType::TextureCube
                    || (shader_type == ShaderTextureType::Texture2D && self.is_array)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageEntry {
    pub image_type: ImageType,
}

impl ImageEntry {
    pub fn expected_target(&self) -> SurfaceTarget {
        match self.image_type {
            ImageType::Texture1D => SurfaceTarget::Texture1D,
            ImageType::TextureBuffer => SurfaceTarget::TextureBuffer,
            ImageType::Texture1DArray => SurfaceTarget::Texture1DArray,
            ImageType::Texture2D => SurfaceTarget::Texture2D,
            ImageType::Texture2DArray => SurfaceTarget::Texture2DArray,
            ImageType::Texture3D => SurfaceTarget::Texture3D,
        }
    }
}

/// Block-linear tiling parameters (log2 GOB counts).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockLinear {
    pub block_width: u32,
    pub block_height: u32,
    pub block_depth: u32,
}

impl BlockLinear {
    pub fn new(block_height: u32, block_depth: u32) -> Self {
        Self {
            block_width: 0,
            block_height,
            block_depth,
        }
    }

    /// Clamps to the largest block the hardware accepts.
    pub(crate) fn clamped(self) -> Self {
        Self {
            block_width: self.block_width.min(5),
            block_height: self.block_height.min(5),
            block_depth: self.block_depth.min(5),
        }
    }
}

/// Decoded texture image control entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub gpu_addr: GpuVAddr,
    pub format: PixelFormat,
    pub texture_type: TicTextureType,
    /// `None` for pitch-linear textures.
    pub tiling: Option<BlockLinear>,
    /// log2 of the tile width spacing.
    pub tile_width_spacing: u32,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, layer count for arrays.
    pub depth: u32,
    pub pitch: u32,
    pub max_mip_level: u32,
    pub srgb_conversion: bool,
}

impl TextureDescriptor {
    pub fn is_buffer(&self) -> bool {
        self.texture_type == TicTextureType::Texture1DBuffer
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthBufferDescriptor {
    pub gpu_addr: GpuVAddr,
    pub format: PixelFormat,
    pub tiling: Option<BlockLinear>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTargetDescriptor {
    pub gpu_addr: GpuVAddr,
    pub format: PixelFormat,
    pub tiling: Option<BlockLinear>,
    /// Width in texels when tiled, pitch in bytes when linear.
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    /// Slices of a 3D texture rather than array layers.
    pub is_3d: bool,
}

/// Surface operand of a 2D engine copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fermi2dSurface {
    pub gpu_addr: GpuVAddr,
    pub format: PixelFormat,
    pub tiling: Option<BlockLinear>,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_tic_accepts_array_2d_samplers() {
        let mut entry = SamplerEntry::new(ShaderTextureType::Texture2D);
        assert!(!entry.accepts(TicTextureType::TextureCubemap));
        entry.is_array = true;
        assert!(entry.accepts(TicTextureType::TextureCubemap));
        assert!(entry.accepts(TicTextureType::Texture2DArray));
        assert!(!entry.accepts(TicTextureType::Texture3D));
        assert_eq!(entry.expected_target(), SurfaceTarget::Texture2DArray);
    }
}
