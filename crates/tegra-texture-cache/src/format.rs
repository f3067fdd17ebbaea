//! Guest pixel formats and the properties the cache needs from them.

use hashbrown::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PixelFormat {
    A8B8G8R8Unorm,
    A8B8G8R8Srgb,
    B8G8R8A8Unorm,
    B8G8R8A8Srgb,
    A2B10G10R10Unorm,
    R8Unorm,
    R8G8Unorm,
    R16Unorm,
    R16Float,
    R16G16Float,
    R32Float,
    R32Uint,
    R32G32Float,
    R16G16B16A16Float,
    R32G32B32A32Float,
    B5G6R5Unorm,
    Bc1RgbaUnorm,
    Bc2Unorm,
    Bc3Unorm,
    Bc4Unorm,
    Bc5Unorm,
    Bc7Unorm,
    D16Unorm,
    D32Float,
    S8UintD24Unorm,
    D24UnormS8Uint,
    D32FloatS8Uint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceType {
    ColorTexture,
    Depth,
    DepthStencil,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceTarget {
    Texture1D,
    TextureBuffer,
    Texture2D,
    Texture3D,
    Texture1DArray,
    Texture2DArray,
    TextureCubemap,
    TextureCubeArray,
}

impl SurfaceTarget {
    pub fn is_layered(self) -> bool {
        matches!(
            self,
            SurfaceTarget::Texture1DArray
                | SurfaceTarget::Texture2DArray
                | SurfaceTarget::TextureCubemap
                | SurfaceTarget::TextureCubeArray
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            SurfaceTarget::Texture1D => "1D",
            SurfaceTarget::TextureBuffer => "TexBuffer",
            SurfaceTarget::Texture2D => "2D",
            SurfaceTarget::Texture3D => "3D",
            SurfaceTarget::Texture1DArray => "1DArray",
            SurfaceTarget::Texture2DArray => "2DArray",
            SurfaceTarget::TextureCubemap => "Cube",
            SurfaceTarget::TextureCubeArray => "CubeArray",
        }
    }
}

/// (bytes per block, block width, block height) for a format.
const fn layout(format: PixelFormat) -> (u32, u32, u32) {
    use PixelFormat::*;
    match format {
        R8Unorm => (1, 1, 1),
        R8G8Unorm | R16Unorm | R16Float | B5G6R5Unorm | D16Unorm => (2, 1, 1),
        A8B8G8R8Unorm | A8B8G8R8Srgb | B8G8R8A8Unorm | B8G8R8A8Srgb | A2B10G10R10Unorm
        | R16G16Float | R32Float | R32Uint | D32Float | S8UintD24Unorm | D24UnormS8Uint => {
            (4, 1, 1)
        }
        R32G32Float | R16G16B16A16Float | D32FloatS8Uint => (8, 1, 1),
        R32G32B32A32Float => (16, 1, 1),
        Bc1RgbaUnorm | Bc4Unorm => (8, 4, 4),
        Bc2Unorm | Bc3Unorm | Bc5Unorm | Bc7Unorm => (16, 4, 4),
    }
}

impl PixelFormat {
    pub const fn bytes_per_block(self) -> u32 {
        layout(self).0
    }

    pub const fn block_width(self) -> u32 {
        layout(self).1
    }

    pub const fn block_height(self) -> u32 {
        layout(self).2
    }

    pub const fn is_compressed(self) -> bool {
        self.block_width() > 1 || self.block_height() > 1
    }

    pub fn surface_type(self) -> SurfaceType {
        match self {
            PixelFormat::D16Unorm | PixelFormat::D32Float => SurfaceType::Depth,
            PixelFormat::S8UintD24Unorm
            | PixelFormat::D24UnormS8Uint
            | PixelFormat::D32FloatS8Uint => SurfaceType::DepthStencil,
            _ => SurfaceType::ColorTexture,
        }
    }

    pub fn is_zeta(self) -> bool {
        self.surface_type() != SurfaceType::ColorTexture
    }

    pub fn is_srgb(self) -> bool {
        matches!(self, PixelFormat::A8B8G8R8Srgb | PixelFormat::B8G8R8A8Srgb)
    }

    /// Depth format a shadow sampler reads a colour format as.
    pub fn shadow_equivalent(self) -> Option<PixelFormat> {
        match self {
            PixelFormat::R16Unorm | PixelFormat::R16Float => Some(PixelFormat::D16Unorm),
            PixelFormat::R32Float => Some(PixelFormat::D32Float),
            _ => None,
        }
    }
}

/// Whether a raw image copy may move texels between the two formats: both must share a
/// size class. Compressed blocks may land on uncompressed texels of the same byte size.
pub fn is_copy_compatible(src: PixelFormat, dst: PixelFormat) -> bool {
    src.bytes_per_block() == dst.bytes_per_block()
}

/// Pairs of formats that alias the same bits under a different interpretation
/// (depth vs. colour), so a view can reinterpret one as the other without a rebuild.
#[derive(Clone, Debug)]
pub struct SiblingFormats {
    table: HashMap<PixelFormat, PixelFormat>,
}

impl Default for SiblingFormats {
    fn default() -> Self {
        let mut siblings = Self {
            table: HashMap::new(),
        };
        siblings.insert(PixelFormat::D16Unorm, PixelFormat::R16Unorm);
        siblings.insert(PixelFormat::D32Float, PixelFormat::R32Float);
        siblings.insert(PixelFormat::D32FloatS8Uint, PixelFormat::R32G32Float);
        siblings
    }
}

impl SiblingFormats {
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Registers `a` and `b` as siblings of each other.
    pub fn insert(&mut self, a: PixelFormat, b: PixelFormat) {
        self.table.insert(a, b);
        self.table.insert(b, a);
    }

    pub fn get(&self, format: PixelFormat) -> Option<PixelFormat> {
        self.table.get(&format).copied()
    }

    pub fn are_siblings(&self, a: PixelFormat, b: PixelFormat) -> bool {
        self.get(a) == Some(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn siblings_are_symmetric() {
        let siblings = SiblingFormats::default();
        assert_eq!(siblings.get(PixelFormat::R16Unorm), Some(PixelFormat::D16Unorm));
        assert_eq!(siblings.get(PixelFormat::D16Unorm), Some(PixelFormat::R16Unorm));
        assert!(siblings.are_siblings(PixelFormat::R32G32Float, PixelFormat::D32FloatS8Uint));
        assert_eq!(siblings.get(PixelFormat::A8B8G8R8Unorm), None);
    }

    #[test]
    fn copy_compatibility_follows_size_class() {
        assert!(is_copy_compatible(PixelFormat::R32Float, PixelFormat::A8B8G8R8Unorm));
        assert!(is_copy_compatible(PixelFormat::Bc1RgbaUnorm, PixelFormat::Bc4Unorm));
        assert!(is_copy_compatible(PixelFormat::Bc1RgbaUnorm, PixelFormat::R32G32Float));
        assert!(is_copy_compatible(PixelFormat::Bc7Unorm, PixelFormat::R32G32B32A32Float));
        assert!(!is_copy_compatible(PixelFormat::Bc1RgbaUnorm, PixelFormat::R32Float));
        assert!(!is_copy_compatible(PixelFormat::R16Unorm, PixelFormat::R32Float));
    }

    #[test]
    fn depth_formats_are_zeta() {
        assert_eq!(PixelFormat::D32Float.surface_type(), SurfaceType::Depth);
        assert_eq!(
            PixelFormat::S8UintD24Unorm.surface_type(),
            SurfaceType::DepthStencil
        );
        assert!(!PixelFormat::Bc7Unorm.is_zeta());
        assert!(PixelFormat::Bc7Unorm.is_compressed());
    }
}
