//! Block-linear (GOB) swizzling.
//!
//! Guest textures are stored as GOBs of 64 bytes x 8 rows. GOBs are grouped into blocks that
//! are `1 << block_height` GOBs tall and `1 << block_depth` slices deep; blocks are laid out
//! row-major across the surface. Coordinates here are in format blocks (texels for
//! uncompressed formats), so compressed formats pass their block counts as width/height.

pub const GOB_SIZE_X: u32 = 64;
pub const GOB_SIZE_X_SHIFT: u32 = 6;
pub const GOB_SIZE_Y: u32 = 8;
pub const GOB_SIZE_Y_SHIFT: u32 = 3;
pub const GOB_SIZE: u32 = 512;
pub const GOB_SIZE_SHIFT: u32 = 9;

/// Byte offset of (`x` bytes, `y` rows) inside one GOB.
pub fn gob_offset(x: u32, y: u32) -> u32 {
    ((x % 64) / 32) * 256 + ((y % 8) / 2) * 64 + ((x % 32) / 16) * 32 + (y % 2) * 16 + (x % 16)
}

pub(crate) fn align_bits(value: usize, bits: u32) -> usize {
    let mask = (1usize << bits) - 1;
    (value + mask) & !mask
}

/// Bytes one mip level occupies. Tiled sizes are padded out to whole blocks; linear sizes
/// are tightly packed.
pub fn calculate_size(
    tiled: bool,
    bytes_per_block: u32,
    width: u32,
    height: u32,
    depth: u32,
    block_height: u32,
    block_depth: u32,
) -> usize {
    if tiled {
        let aligned_width = align_bits((width * bytes_per_block) as usize, GOB_SIZE_X_SHIFT);
        let aligned_height = align_bits(height as usize, GOB_SIZE_Y_SHIFT + block_height);
        let aligned_depth = align_bits(depth as usize, block_depth);
        aligned_width * aligned_height * aligned_depth
    } else {
        (width * height * depth * bytes_per_block) as usize
    }
}

/// Geometry of one block-linear image (a single mip level of a single layer or 3D volume).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockLinearLayout {
    pub bytes_per_block: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub block_height: u32,
    pub block_depth: u32,
}

impl BlockLinearLayout {
    pub fn tiled_size(&self) -> usize {
        calculate_size(
            true,
            self.bytes_per_block,
            self.width,
            self.height,
            self.depth,
            self.block_height,
            self.block_depth,
        )
    }

    pub fn linear_size(&self) -> usize {
        (self.width * self.height * self.depth * self.bytes_per_block) as usize
    }

    /// Calls `f(tiled_offset, linear_offset)` for every block of the image.
    fn for_each_block(&self, mut f: impl FnMut(usize, usize)) {
        let bpb = self.bytes_per_block;
        let stride = self.width * bpb;
        let gobs_in_x = stride.div_ceil(GOB_SIZE_X);
        let block_size = gobs_in_x << (GOB_SIZE_SHIFT + self.block_height + self.block_depth);
        let slice_size = self
            .height
            .div_ceil(GOB_SIZE_Y << self.block_height)
            * block_size;
        let block_height_mask = (1u32 << self.block_height) - 1;
        let block_depth_mask = (1u32 << self.block_depth) - 1;
        let x_shift = GOB_SIZE_SHIFT + self.block_height + self.block_depth;

        for z in 0..self.depth {
            let offset_z = (z >> self.block_depth) * slice_size
                + ((z & block_depth_mask) << (GOB_SIZE_SHIFT + self.block_height));
            for y in 0..self.height {
                let block_y = y >> GOB_SIZE_Y_SHIFT;
                let offset_y = (block_y >> self.block_height) * block_size
                    + ((block_y & block_height_mask) << GOB_SIZE_SHIFT);
                let row = (z * self.height + y) * stride;
                for column in 0..self.width {
                    let x = column * bpb;
                    let offset_x = (x >> GOB_SIZE_X_SHIFT) << x_shift;
                    let tiled = offset_z + offset_y + offset_x + gob_offset(x, y);
                    f(tiled as usize, (row + x) as usize);
                }
            }
        }
    }
}

/// Block-linear to tightly packed linear.
pub fn unswizzle(layout: &BlockLinearLayout, tiled: &[u8], linear: &mut [u8]) {
    let bpb = layout.bytes_per_block as usize;
    layout.for_each_block(|src, dst| {
        if let (Some(from), Some(to)) = (tiled.get(src..src + bpb), linear.get_mut(dst..dst + bpb)) {
            to.copy_from_slice(from);
        }
    });
}

/// Tightly packed linear to block-linear. Padding bytes in `tiled` are left untouched.
pub fn swizzle(layout: &BlockLinearLayout, linear: &[u8], tiled: &mut [u8]) {
    let bpb = layout.bytes_per_block as usize;
    layout.for_each_block(|dst, src| {
        if let (Some(from), Some(to)) = (linear.get(src..src + bpb), tiled.get_mut(dst..dst + bpb)) {
            to.copy_from_slice(from);
        }
    });
}
