//! Guest surface descriptions and the size arithmetic of their memory layouts.

use crate::descriptor::{
    BlockLinear, DepthBufferDescriptor, Fermi2dSurface, ImageEntry, RenderTargetDescriptor,
    SamplerEntry, TextureDescriptor,
};
use crate::format::{PixelFormat, SurfaceTarget, SurfaceType};
use crate::tiling::{self, GOB_SIZE_SHIFT};

/// Everything needed to lay out a guest surface in memory.
///
/// Equality and hashing cover every field, so params can key the reuse pool without two
/// different layouts colliding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceParams {
    pub is_tiled: bool,
    pub srgb_conversion: bool,
    pub is_layered: bool,
    pub block_width: u32,
    pub block_height: u32,
    pub block_depth: u32,
    pub tile_width_spacing: u32,
    pub width: u32,
    pub height: u32,
    /// Slices for 3D targets, layers for layered targets.
    pub depth: u32,
    pub pitch: u32,
    pub num_levels: u32,
    pub emulated_levels: u32,
    pub pixel_format: PixelFormat,
    pub surface_type: SurfaceType,
    pub target: SurfaceTarget,
}

fn log2_ceil(value: u32) -> u32 {
    if value <= 1 {
        0
    } else {
        32 - (value - 1).leading_zeros()
    }
}

fn mipmap_blocks(size: u32, block: u32) -> u32 {
    size.div_ceil(block).max(1)
}

impl SurfaceParams {
    /// A single-level 2D surface. Tiling is block-linear when `tiling` is set, pitch-linear
    /// with a tightly packed pitch otherwise.
    pub fn new_2d(
        pixel_format: PixelFormat,
        width: u32,
        height: u32,
        tiling: Option<BlockLinear>,
    ) -> Self {
        let is_tiled = tiling.is_some();
        let blocks = tiling.unwrap_or_default();
        let mut params = Self {
            is_tiled,
            srgb_conversion: pixel_format.is_srgb(),
            is_layered: false,
            block_width: blocks.block_width,
            block_height: blocks.block_height,
            block_depth: blocks.block_depth,
            tile_width_spacing: 1,
            width,
            height,
            depth: 1,
            pitch: 0,
            num_levels: 1,
            emulated_levels: 1,
            pixel_format,
            surface_type: pixel_format.surface_type(),
            target: SurfaceTarget::Texture2D,
        };
        if !is_tiled {
            params.pitch = mipmap_blocks(width, pixel_format.block_width())
                * pixel_format.bytes_per_block();
        }
        params
    }

    /// Replaces the target and depth/layer count, keeping layout fields.
    pub fn with_target(mut self, target: SurfaceTarget, depth: u32) -> Self {
        self.target = target;
        self.depth = depth;
        self.is_layered = target.is_layered();
        self
    }

    pub fn with_levels(mut self, num_levels: u32) -> Self {
        self.num_levels = num_levels;
        self.emulated_levels = num_levels.min(self.max_possible_mipmap());
        self
    }

    pub fn for_texture(tic: &TextureDescriptor, entry: &SamplerEntry) -> Self {
        let mut params = Self::from_tic(tic);
        if entry.is_shadow && params.surface_type == SurfaceType::ColorTexture {
            match params.pixel_format.shadow_equivalent() {
                Some(format) => {
                    params.pixel_format = format;
                    params.surface_type = format.surface_type();
                }
                None => tracing::warn!(
                    format = ?params.pixel_format,
                    "no depth equivalent for shadow sampler"
                ),
            }
        }
        if tic.is_buffer() {
            params.into_buffer(tic.width)
        } else {
            params.with_tic_extent(tic, entry.expected_target())
        }
    }

    pub fn for_image(tic: &TextureDescriptor, entry: &ImageEntry) -> Self {
        let params = Self::from_tic(tic);
        if tic.is_buffer() {
            params.into_buffer(tic.width)
        } else {
            params.with_tic_extent(tic, entry.expected_target())
        }
    }

    pub fn for_depth_buffer(desc: &DepthBufferDescriptor) -> Self {
        let tiling = desc.tiling.map(BlockLinear::clamped);
        let is_layered = desc.layers > 1 && tiling.unwrap_or_default().block_depth == 0;
        let mut params = Self::new_2d(desc.format, desc.width, desc.height, tiling);
        params.srgb_conversion = false;
        if is_layered {
            params = params.with_target(SurfaceTarget::Texture2DArray, desc.layers);
        }
        params
    }

    pub fn for_render_target(desc: &RenderTargetDescriptor) -> Self {
        let mut params = Self::new_2d(desc.format, desc.width, desc.height, desc.tiling);
        if !params.is_tiled {
            params.pitch = desc.width;
            params.width = desc.width / desc.format.bytes_per_block();
        }
        if desc.is_3d {
            params.depth = desc.layers;
            params.target = SurfaceTarget::Texture3D;
        } else if desc.layers > 1 {
            params = params.with_target(SurfaceTarget::Texture2DArray, desc.layers);
        }
        params
    }

    pub fn for_fermi_copy(desc: &Fermi2dSurface) -> Self {
        let tiling = desc.tiling.map(BlockLinear::clamped);
        let mut params = Self::new_2d(desc.format, desc.width, desc.height, tiling);
        params.pitch = desc.pitch;
        params
    }

    fn from_tic(tic: &TextureDescriptor) -> Self {
        let mut params = Self::new_2d(tic.format, tic.width, tic.height, tic.tiling);
        params.srgb_conversion = tic.srgb_conversion;
        if params.is_tiled {
            params.tile_width_spacing = 1 << tic.tile_width_spacing;
        }
        params
    }

    fn into_buffer(mut self, width: u32) -> Self {
        self.target = SurfaceTarget::TextureBuffer;
        self.width = width;
        self.pitch = width * self.bytes_per_block();
        self.height = 1;
        self.depth = 1;
        self.num_levels = 1;
        self.emulated_levels = 1;
        self.is_layered = false;
        self
    }

    fn with_tic_extent(mut self, tic: &TextureDescriptor, target: SurfaceTarget) -> Self {
        self.target = target;
        self.width = tic.width;
        self.height = tic.height;
        self.depth = tic.depth.max(1);
        self.pitch = if self.is_tiled { 0 } else { tic.pitch };
        if matches!(
            target,
            SurfaceTarget::TextureCubemap | SurfaceTarget::TextureCubeArray
        ) {
            self.depth *= 6;
        }
        self.num_levels = tic.max_mip_level + 1;
        self.emulated_levels = self.num_levels.min(self.max_possible_mipmap());
        self.is_layered = target.is_layered();
        self
    }

    pub fn bytes_per_block(&self) -> u32 {
        self.pixel_format.bytes_per_block()
    }

    pub fn default_block_width(&self) -> u32 {
        self.pixel_format.block_width()
    }

    pub fn default_block_height(&self) -> u32 {
        self.pixel_format.block_height()
    }

    pub fn is_compressed(&self) -> bool {
        self.pixel_format.is_compressed()
    }

    pub fn is_pixel_format_zeta(&self) -> bool {
        self.pixel_format.is_zeta()
    }

    pub fn is_buffer(&self) -> bool {
        self.target == SurfaceTarget::TextureBuffer
    }

    pub fn num_layers(&self) -> u32 {
        if self.is_layered {
            self.depth
        } else {
            1
        }
    }

    pub fn mip_width(&self, level: u32) -> u32 {
        (self.width >> level).max(1)
    }

    pub fn mip_height(&self, level: u32) -> u32 {
        (self.height >> level).max(1)
    }

    pub fn mip_depth(&self, level: u32) -> u32 {
        if self.is_layered {
            self.depth
        } else {
            (self.depth >> level).max(1)
        }
    }

    /// Width rounded up to a whole GOB row.
    pub fn block_aligned_width(&self) -> u32 {
        let texels_per_gob = (64 / self.bytes_per_block()).max(1);
        self.width.div_ceil(texels_per_gob) * texels_per_gob
    }

    /// Block height of a mip level: shrinks as the level gets shorter.
    pub fn mip_block_height(&self, level: u32) -> u32 {
        if level == 0 {
            return self.block_height;
        }
        let blocks_in_y = self.mip_height(level).div_ceil(self.default_block_height());
        log2_ceil(blocks_in_y).clamp(3, 7) - 3
    }

    pub fn mip_block_depth(&self, level: u32) -> u32 {
        if level == 0 {
            return self.block_depth;
        }
        if self.is_layered {
            return 0;
        }
        let block_depth = log2_ceil(self.mip_depth(level));
        if block_depth > 4 {
            return 5 - u32::from(self.mip_block_height(level) >= 2);
        }
        block_depth
    }

    /// Bytes of one mip level of one layer (whole volume for 3D).
    fn inner_mipmap_size(&self, level: u32, as_host_size: bool) -> usize {
        let width = mipmap_blocks(self.mip_width(level), self.default_block_width());
        let height = mipmap_blocks(self.mip_height(level), self.default_block_height());
        let depth = if self.is_layered {
            1
        } else {
            self.mip_depth(level)
        };
        if self.is_tiled {
            tiling::calculate_size(
                !as_host_size,
                self.bytes_per_block(),
                width,
                height,
                depth,
                self.mip_block_height(level),
                self.mip_block_depth(level),
            )
        } else if as_host_size || self.is_buffer() {
            (self.bytes_per_block() * width * height * depth) as usize
        } else {
            (self.pitch * height * depth) as usize
        }
    }

    fn layer_size(&self, as_host_size: bool) -> usize {
        let size = (0..self.num_levels)
            .map(|level| self.inner_mipmap_size(level, as_host_size))
            .sum();
        if self.is_tiled && self.is_layered {
            return align_layered(size, self.block_height, self.block_depth);
        }
        size
    }

    pub fn guest_size_in_bytes(&self) -> usize {
        self.layer_size(false) * self.num_layers() as usize
    }

    pub fn host_size_in_bytes(&self) -> usize {
        (0..self.num_levels)
            .map(|level| self.host_mipmap_size(level))
            .sum()
    }

    pub fn guest_layer_size(&self) -> usize {
        self.layer_size(false)
    }

    pub fn guest_mipmap_size(&self, level: u32) -> usize {
        self.inner_mipmap_size(level, false)
    }

    /// All layers of one mip level in the host layout.
    pub fn host_mipmap_size(&self, level: u32) -> usize {
        self.inner_mipmap_size(level, true) * self.num_layers() as usize
    }

    /// One layer of one mip level in the host layout.
    pub fn host_layer_size(&self, level: u32) -> usize {
        self.inner_mipmap_size(level, true)
    }

    pub fn guest_mipmap_level_offset(&self, level: u32) -> usize {
        (0..level).map(|i| self.inner_mipmap_size(i, false)).sum()
    }

    pub fn host_mipmap_level_offset(&self, level: u32) -> usize {
        (0..level).map(|i| self.host_mipmap_size(i)).sum()
    }

    pub fn max_possible_mipmap(&self) -> u32 {
        let max_mipmap = (log2_ceil(self.width) + 1).max(log2_ceil(self.height) + 1);
        if self.target != SurfaceTarget::Texture3D {
            return max_mipmap;
        }
        max_mipmap.max(log2_ceil(self.depth) + 1)
    }

    /// Size of one block-linear block in bytes.
    pub fn block_size(&self) -> u32 {
        (64 << self.block_width) * (8 << self.block_height) * (1 << self.block_depth)
    }

    /// Texel extent covered by one block.
    pub fn block_xy(&self) -> (u32, u32) {
        let x_pixels = 64 / self.bytes_per_block();
        (x_pixels << self.block_width, 8 << self.block_height)
    }

    /// Texel coordinate at which the block containing byte `offset` starts.
    pub fn block_offset_xyz(&self, offset: u32) -> (u32, u32, u32) {
        let block_size = self.block_size();
        let block_index = offset / block_size;
        let gob_index = (offset % block_size) / tiling::GOB_SIZE;
        let x_block_pixels = (64 / self.bytes_per_block()) << self.block_width;
        let y_block_pixels = 8 << self.block_height;
        let z_block_pixels = 1 << self.block_depth;
        let x_blocks = self.width.div_ceil(x_block_pixels);
        let y_blocks = self.height.div_ceil(y_block_pixels);
        let z_blocks = self.depth.div_ceil(z_block_pixels);
        let base_x = block_index % x_blocks;
        let base_y = (block_index / x_blocks) % y_blocks;
        let base_z = (block_index / (x_blocks * y_blocks)) % z_blocks;
        let x = base_x * x_block_pixels;
        let y = base_y * y_block_pixels + (gob_index * 8) % y_block_pixels;
        let z = base_z * z_block_pixels + (gob_index >> self.block_height);
        (x, y, z)
    }

    pub fn target_name(&self) -> &'static str {
        self.target.name()
    }
}

pub fn align_layered(size: usize, block_height: u32, block_depth: u32) -> usize {
    tiling::align_bits(size, GOB_SIZE_SHIFT + block_height + block_depth)
}

/// Equivalent width in `to`'s blocks of `width` texels of `from`.
pub fn convert_width(width: u32, from: PixelFormat, to: PixelFormat) -> u32 {
    (width * to.block_width()).div_ceil(from.block_width())
}

pub fn convert_height(height: u32, from: PixelFormat, to: PixelFormat) -> u32 {
    (height * to.block_height()).div_ceil(from.block_height())
}

/// Largest width, in `src` texels, that level `src_level` of `src` and level `dst_level` of
/// `dst` can exchange block for block.
pub fn intersect_width(src: &SurfaceParams, dst: &SurfaceParams, src_level: u32, dst_level: u32) -> u32 {
    let bw = src.default_block_width();
    let src_width = src.mip_width(src_level);
    let blocks = src_width
        .div_ceil(bw)
        .min(dst.mip_width(dst_level).div_ceil(dst.default_block_width()));
    (blocks * bw).min(src_width)
}

pub fn intersect_height(
    src: &SurfaceParams,
    dst: &SurfaceParams,
    src_level: u32,
    dst_level: u32,
) -> u32 {
    let bh = src.default_block_height();
    let src_height = src.mip_height(src_level);
    let blocks = src_height
        .div_ceil(bh)
        .min(dst.mip_height(dst_level).div_ceil(dst.default_block_height()));
    (blocks * bh).min(src_height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ShaderTextureType, TicTextureType};
    use pretty_assertions::assert_eq;

    fn tiled_rgba(width: u32, height: u32, block_height: u32) -> SurfaceParams {
        SurfaceParams::new_2d(
            PixelFormat::A8B8G8R8Unorm,
            width,
            height,
            Some(BlockLinear::new(block_height, 0)),
        )
    }

    #[test]
    fn mip_block_height_shrinks_with_the_level() {
        let params = tiled_rgba(256, 256, 4).with_levels(4);
        assert_eq!(params.mip_block_height(0), 4);
        // 128 rows -> 2^7 -> 4, 64 rows -> 3, 32 rows -> 2.
        assert_eq!(params.mip_block_height(1), 4);
        assert_eq!(params.mip_block_height(2), 3);
        assert_eq!(params.mip_block_height(3), 2);
    }

    #[test]
    fn guest_mip_offsets_accumulate_level_sizes() {
        let params = tiled_rgba(256, 256, 4).with_levels(4);
        assert_eq!(params.guest_mipmap_size(0), 1024 * 256);
        assert_eq!(params.guest_mipmap_size(1), 512 * 128);
        assert_eq!(params.guest_mipmap_size(2), 256 * 64);
        assert_eq!(params.guest_mipmap_level_offset(2), 1024 * 256 + 512 * 128);
        assert_eq!(
            params.guest_size_in_bytes(),
            (0..4).map(|l| params.guest_mipmap_size(l)).sum::<usize>()
        );
    }

    #[test]
    fn layered_tiled_layers_align_to_blocks() {
        let params = tiled_rgba(16, 8, 1).with_target(SurfaceTarget::Texture2DArray, 3);
        // One GOB of data, padded to a 2-GOB block per layer.
        assert_eq!(params.guest_layer_size(), 1024);
        assert_eq!(params.guest_size_in_bytes(), 3 * 1024);
        assert_eq!(params.host_size_in_bytes(), 3 * 16 * 8 * 4);
    }

    #[test]
    fn linear_guest_size_uses_pitch() {
        let mut params = SurfaceParams::new_2d(PixelFormat::R8Unorm, 100, 10, None);
        assert_eq!(params.pitch, 100);
        params.pitch = 128;
        assert_eq!(params.guest_size_in_bytes(), 1280);
        assert_eq!(params.host_size_in_bytes(), 1000);
    }

    #[test]
    fn compressed_sizes_count_blocks() {
        let params = SurfaceParams::new_2d(PixelFormat::Bc1RgbaUnorm, 10, 10, None);
        assert_eq!(params.host_size_in_bytes(), 3 * 3 * 8);
        assert_eq!(convert_width(16, PixelFormat::Bc1RgbaUnorm, PixelFormat::R32G32Float), 4);
        assert_eq!(convert_width(4, PixelFormat::R32G32Float, PixelFormat::Bc1RgbaUnorm), 16);
        let bc1 = SurfaceParams::new_2d(PixelFormat::Bc1RgbaUnorm, 64, 64, None);
        let rg = SurfaceParams::new_2d(PixelFormat::R32G32Float, 16, 16, None);
        assert_eq!(intersect_width(&bc1, &rg, 0, 0), 64);
        assert_eq!(intersect_width(&rg, &bc1, 0, 0), 16);
    }

    #[test]
    fn shadow_texture_becomes_depth() {
        let tic = TextureDescriptor {
            gpu_addr: 0x1000,
            format: PixelFormat::R32Float,
            texture_type: TicTextureType::Texture2D,
            tiling: Some(BlockLinear::new(4, 0)),
            tile_width_spacing: 0,
            width: 64,
            height: 64,
            depth: 1,
            pitch: 0,
            max_mip_level: 2,
            srgb_conversion: false,
        };
        let entry = SamplerEntry {
            texture_type: ShaderTextureType::Texture2D,
            is_array: false,
            is_shadow: true,
        };
        let params = SurfaceParams::for_texture(&tic, &entry);
        assert_eq!(params.pixel_format, PixelFormat::D32Float);
        assert_eq!(params.surface_type, SurfaceType::Depth);
        assert_eq!(params.num_levels, 3);
        assert_eq!(params.emulated_levels, 3);
    }

    #[test]
    fn cube_textures_have_six_layers_per_cube() {
        let tic = TextureDescriptor {
            gpu_addr: 0x1000,
            format: PixelFormat::A8B8G8R8Unorm,
            texture_type: TicTextureType::TextureCubemap,
            tiling: Some(BlockLinear::new(2, 0)),
            tile_width_spacing: 0,
            width: 32,
            height: 32,
            depth: 1,
            pitch: 0,
            max_mip_level: 0,
            srgb_conversion: false,
        };
        let params = SurfaceParams::for_texture(&tic, &SamplerEntry::new(ShaderTextureType::TextureCube));
        assert_eq!(params.target, SurfaceTarget::TextureCubemap);
        assert_eq!(params.depth, 6);
        assert!(params.is_layered);
    }

    #[test]
    fn linear_render_target_width_is_pitch_in_bytes() {
        let desc = RenderTargetDescriptor {
            gpu_addr: 0x1000,
            format: PixelFormat::A8B8G8R8Unorm,
            tiling: None,
            width: 1280 * 4,
            height: 720,
            layers: 1,
            is_3d: false,
        };
        let params = SurfaceParams::for_render_target(&desc);
        assert_eq!(params.width, 1280);
        assert_eq!(params.pitch, 1280 * 4);
        assert_eq!(params.target, SurfaceTarget::Texture2D);
    }

    #[test]
    fn block_offset_finds_3d_slice() {
        let params = SurfaceParams::new_2d(
            PixelFormat::A8B8G8R8Unorm,
            16,
            8,
            Some(BlockLinear::new(0, 2)),
        )
        .with_target(SurfaceTarget::Texture3D, 4);
        assert_eq!(params.block_offset_xyz(0), (0, 0, 0));
        assert_eq!(params.block_offset_xyz(512 * 3), (0, 0, 3));
    }
}
