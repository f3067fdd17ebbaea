//! Staging buffers and conversion between the guest memory layout and the host layout.
//!
//! The host layout is level-major with the layers of a level stored back to back, rows tightly
//! packed in format blocks. The guest layout is layer-major, each layer holding its mip chain,
//! and block-linear or pitch-linear per surface.

use tegra_memory::MemoryManager;

use crate::format::PixelFormat;
use crate::surface::SurfaceBase;
use crate::tiling::{self, BlockLinearLayout};

/// Reusable scratch buffers for surface loads and flushes. They only grow.
#[derive(Debug)]
pub struct StagingCache {
    buffers: Vec<Vec<u8>>,
}

const GUEST: usize = 0;
const HOST: usize = 1;

impl StagingCache {
    /// At least two buffers are kept: one for the guest image, one for the host image.
    pub fn new(count: usize) -> Self {
        Self {
            buffers: vec![Vec::new(); count.max(2)],
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Bytes currently reserved across all buffers.
    pub fn capacity_bytes(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }

    pub fn buffer(&mut self, index: usize, size: usize) -> &mut [u8] {
        let buffer = &mut self.buffers[index];
        if buffer.len() < size {
            buffer.resize(size, 0);
        }
        &mut buffer[..size]
    }

    fn guest_and_host(&mut self, guest_size: usize, host_size: usize) -> (&mut [u8], &mut [u8]) {
        self.buffer(GUEST, guest_size);
        self.buffer(HOST, host_size);
        let (guest, rest) = self.buffers.split_at_mut(HOST);
        (&mut guest[GUEST][..guest_size], &mut rest[0][..host_size])
    }

    /// Reads the surface's guest memory and returns it converted to the host layout.
    pub fn load_buffer(&mut self, memory: &MemoryManager, surface: &SurfaceBase) -> &[u8] {
        let (guest, host) =
            self.guest_and_host(surface.size_in_bytes(), surface.host_size_in_bytes());
        memory.read_block_unsafe(surface.gpu_addr(), guest);
        guest_to_host(surface, guest, host);
        host
    }

    /// Lets `download` fill a host-layout image, then writes it back into guest memory.
    ///
    /// Guest bytes the host image does not cover (block padding, pitch gaps) are preserved.
    pub fn flush_buffer(
        &mut self,
        memory: &MemoryManager,
        surface: &SurfaceBase,
        download: impl FnOnce(&mut [u8]),
    ) {
        let (guest, host) =
            self.guest_and_host(surface.size_in_bytes(), surface.host_size_in_bytes());
        download(host);
        memory.read_block_unsafe(surface.gpu_addr(), guest);
        host_to_guest(surface, host, guest);
        memory.write_block_unsafe(surface.gpu_addr(), guest);
    }
}

impl Default for StagingCache {
    fn default() -> Self {
        Self::new(2)
    }
}

#[derive(Clone, Copy)]
enum Direction {
    GuestToHost,
    HostToGuest,
}

pub fn guest_to_host(surface: &SurfaceBase, guest: &[u8], host: &mut [u8]) {
    for_each_sub_image(surface, |sub| match sub.tiling {
        Some(layout) => tiling::unswizzle(&layout, &guest[sub.guest.clone()], &mut host[sub.host.clone()]),
        None => copy_rows(&sub, guest, host, Direction::GuestToHost),
    });
    if surface.format() == PixelFormat::S8UintD24Unorm {
        convert_s8d24(host, Direction::GuestToHost);
    }
}

pub fn host_to_guest(surface: &SurfaceBase, host: &mut [u8], guest: &mut [u8]) {
    if surface.format() == PixelFormat::S8UintD24Unorm {
        convert_s8d24(host, Direction::HostToGuest);
    }
    for_each_sub_image(surface, |sub| match sub.tiling {
        Some(layout) => tiling::swizzle(&layout, &host[sub.host.clone()], &mut guest[sub.guest.clone()]),
        None => copy_rows(&sub, host, guest, Direction::HostToGuest),
    });
}

/// One level of one layer (or of the whole volume) in both layouts.
struct SubImage {
    guest: std::ops::Range<usize>,
    host: std::ops::Range<usize>,
    tiling: Option<BlockLinearLayout>,
    row_bytes: usize,
    guest_pitch: usize,
    rows: usize,
}

fn for_each_sub_image(surface: &SurfaceBase, mut f: impl FnMut(SubImage)) {
    let params = surface.params();
    let bpb = params.bytes_per_block();
    for level in 0..params.num_levels {
        let width = params.mip_width(level).div_ceil(params.default_block_width());
        let height = params.mip_height(level).div_ceil(params.default_block_height());
        let depth = if params.is_layered {
            1
        } else {
            params.mip_depth(level)
        };
        let host_layer = params.host_layer_size(level);
        let host_level = params.host_mipmap_level_offset(level);
        let guest_level = surface.mipmap_size(level);
        for layer in 0..params.num_layers() as usize {
            let guest_start = layer * surface.layer_size() + surface.mipmap_offset(level);
            let host_start = host_level + layer * host_layer;
            let tiling = params.is_tiled.then(|| BlockLinearLayout {
                bytes_per_block: bpb,
                width,
                height,
                depth,
                block_height: params.mip_block_height(level),
                block_depth: params.mip_block_depth(level),
            });
            let row_bytes = (width * bpb) as usize;
            let guest_pitch = if params.is_buffer() || params.pitch == 0 {
                row_bytes
            } else {
                params.pitch as usize
            };
            f(SubImage {
                guest: guest_start..guest_start + guest_level,
                host: host_start..host_start + host_layer,
                tiling,
                row_bytes,
                guest_pitch,
                rows: (height * depth) as usize,
            });
        }
    }
}

fn copy_rows(sub: &SubImage, src: &[u8], dst: &mut [u8], direction: Direction) {
    for row in 0..sub.rows {
        let guest = sub.guest.start + row * sub.guest_pitch;
        let host = sub.host.start + row * sub.row_bytes;
        let (from, to) = match direction {
            Direction::GuestToHost => (guest, host),
            Direction::HostToGuest => (host, guest),
        };
        if let (Some(from), Some(to)) = (
            src.get(from..from + sub.row_bytes),
            dst.get_mut(to..to + sub.row_bytes),
        ) {
            to.copy_from_slice(from);
        }
    }
}

/// The guest packs stencil in the top byte; hosts expect it in the low byte.
fn convert_s8d24(host: &mut [u8], direction: Direction) {
    for word in host.chunks_exact_mut(4) {
        let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        let converted = match direction {
            Direction::GuestToHost => (value >> 24) | ((value & 0x00FF_FFFF) << 8),
            Direction::HostToGuest => (value >> 8) | ((value & 0xFF) << 24),
        };
        word.copy_from_slice(&converted.to_le_bytes());
    }
}
