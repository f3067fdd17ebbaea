//! CPU reference backend: host images are byte vectors in the host layout, and every call is
//! recorded so callers can observe what the cache asked for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tegra_memory::GpuVAddr;
use tracing::warn;

use crate::backend::Backend;
use crate::copy::{BlitConfig, CopyParams, ViewParams};
use crate::params::SurfaceParams;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendEvent {
    Create {
        surface: u64,
        gpu_addr: GpuVAddr,
        params: SurfaceParams,
    },
    CreateView {
        surface: u64,
        view: ViewParams,
    },
    Upload {
        surface: u64,
        bytes: usize,
    },
    Download {
        surface: u64,
        bytes: usize,
    },
    ImageCopy {
        src: u64,
        dst: u64,
        copy: CopyParams,
    },
    Blit {
        src: u64,
        dst: u64,
    },
    BufferCopy {
        src: u64,
        dst: u64,
        bytes: usize,
    },
}

#[derive(Debug)]
pub struct SoftwareSurface {
    id: u64,
    params: SurfaceParams,
    data: Mutex<Vec<u8>>,
}

impl SoftwareSurface {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn params(&self) -> &SurfaceParams {
        &self.params
    }

    /// Copy of the host image.
    pub fn data(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Overwrites the start of the host image, as a draw into it would.
    pub fn write_data(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.lock();
        let end = (offset + bytes.len()).min(data.len());
        if offset < end {
            data[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Host-layout geometry of one level: (level offset, slice stride, row pitch, bytes/block).
    fn level_layout(&self, level: u32) -> Option<(usize, usize, usize, usize)> {
        if level >= self.params.num_levels {
            return None;
        }
        let p = &self.params;
        let bpb = p.bytes_per_block() as usize;
        let row = p.mip_width(level).div_ceil(p.default_block_width()) as usize * bpb;
        let rows = p.mip_height(level).div_ceil(p.default_block_height()) as usize;
        Some((p.host_mipmap_level_offset(level), row * rows, row, bpb))
    }
}

#[derive(Clone, Debug)]
pub struct SoftwareView {
    pub surface: Arc<SoftwareSurface>,
    pub view: ViewParams,
}

#[derive(Debug, Default)]
pub struct SoftwareBackend {
    next_id: AtomicU64,
    events: Mutex<Vec<BackendEvent>>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BackendEvent> {
        self.lock_events().clone()
    }

    pub fn take_events(&self) -> Vec<BackendEvent> {
        std::mem::take(&mut *self.lock_events())
    }

    fn lock_events(&self) -> MutexGuard<'_, Vec<BackendEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, event: BackendEvent) {
        self.lock_events().push(event);
    }
}

impl Backend for SoftwareBackend {
    type Surface = SoftwareSurface;
    type View = SoftwareView;

    fn create_surface(&self, gpu_addr: GpuVAddr, params: &SurfaceParams) -> SoftwareSurface {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.record(BackendEvent::Create {
            surface: id,
            gpu_addr,
            params: *params,
        });
        SoftwareSurface {
            id,
            params: *params,
            data: Mutex::new(vec![0; params.host_size_in_bytes()]),
        }
    }

    fn create_view(
        &self,
        surface: &Arc<SoftwareSurface>,
        _params: &SurfaceParams,
        view: &ViewParams,
    ) -> SoftwareView {
        self.record(BackendEvent::CreateView {
            surface: surface.id,
            view: *view,
        });
        SoftwareView {
            surface: Arc::clone(surface),
            view: *view,
        }
    }

    fn upload_texture(&self, surface: &SoftwareSurface, _params: &SurfaceParams, data: &[u8]) {
        self.record(BackendEvent::Upload {
            surface: surface.id,
            bytes: data.len(),
        });
        surface.write_data(0, data);
    }

    fn download_texture(&self, surface: &SoftwareSurface, _params: &SurfaceParams, data: &mut [u8]) {
        self.record(BackendEvent::Download {
            surface: surface.id,
            bytes: data.len(),
        });
        let image = surface.lock();
        let len = image.len().min(data.len());
        data[..len].copy_from_slice(&image[..len]);
    }

    fn image_copy(&self, src: &SoftwareSurface, dst: &SoftwareSurface, copy: &CopyParams) {
        self.record(BackendEvent::ImageCopy {
            src: src.id,
            dst: dst.id,
            copy: *copy,
        });
        let (Some(from), Some(to)) = (
            src.level_layout(copy.source_level),
            dst.level_layout(copy.dest_level),
        ) else {
            warn!(?copy, "image copy outside the mip chain");
            return;
        };
        let sp = &src.params;
        let blocks_x = copy.width.div_ceil(sp.default_block_width()) as usize;
        let blocks_y = copy.height.div_ceil(sp.default_block_height()) as usize;
        let src_x = (copy.source_x / sp.default_block_width()) as usize;
        let src_y = (copy.source_y / sp.default_block_height()) as usize;
        let dst_x = (copy.dest_x / dst.params.default_block_width()) as usize;
        let dst_y = (copy.dest_y / dst.params.default_block_height()) as usize;
        let row_bytes = blocks_x * from.3;

        let source = src.data();
        let mut target = dst.lock();
        for z in 0..copy.depth as usize {
            for y in 0..blocks_y {
                let s = from.0
                    + (copy.source_z as usize + z) * from.1
                    + (src_y + y) * from.2
                    + src_x * from.3;
                let d = to.0
                    + (copy.dest_z as usize + z) * to.1
                    + (dst_y + y) * to.2
                    + dst_x * to.3;
                if let (Some(a), Some(b)) =
                    (source.get(s..s + row_bytes), target.get_mut(d..d + row_bytes))
                {
                    b.copy_from_slice(a);
                }
            }
        }
    }

    fn image_blit(&self, src: &SoftwareView, dst: &SoftwareView, config: &BlitConfig) {
        self.record(BackendEvent::Blit {
            src: src.surface.id,
            dst: dst.surface.id,
        });
        let (sp, dp) = (&src.surface.params, &dst.surface.params);
        if sp.is_compressed() || dp.is_compressed() || sp.bytes_per_block() != dp.bytes_per_block() {
            warn!(src = ?sp.pixel_format, dst = ?dp.pixel_format, "blit between incompatible formats skipped");
            return;
        }
        let (Some(from), Some(to)) = (
            src.surface.level_layout(src.view.base_level),
            dst.surface.level_layout(dst.view.base_level),
        ) else {
            return;
        };
        let (src_rect, dst_rect) = (config.src_rect, config.dst_rect);
        if dst_rect.width() <= 0 || dst_rect.height() <= 0 {
            return;
        }
        let bpb = from.3;
        let source = src.surface.data();
        let mut target = dst.surface.lock();
        for y in 0..dst_rect.height() {
            let sy = src_rect.top + y * src_rect.height() / dst_rect.height();
            for x in 0..dst_rect.width() {
                let sx = src_rect.left + x * src_rect.width() / dst_rect.width();
                let (dx, dy) = (dst_rect.left + x, dst_rect.top + y);
                if sx < 0 || sy < 0 || dx < 0 || dy < 0 {
                    continue;
                }
                let s = from.0
                    + src.view.base_layer as usize * from.1
                    + sy as usize * from.2
                    + sx as usize * bpb;
                let d = to.0
                    + dst.view.base_layer as usize * to.1
                    + dy as usize * to.2
                    + dx as usize * bpb;
                if sx as usize * bpb >= from.2 || dx as usize * bpb >= to.2 {
                    continue;
                }
                if let (Some(a), Some(b)) = (source.get(s..s + bpb), target.get_mut(d..d + bpb)) {
                    b.copy_from_slice(a);
                }
            }
        }
    }

    fn buffer_copy(&self, src: &SoftwareSurface, dst: &SoftwareSurface) {
        let source = src.data();
        let mut target = dst.lock();
        let len = source.len().min(target.len());
        target[..len].copy_from_slice(&source[..len]);
        self.record(BackendEvent::BufferCopy {
            src: src.id,
            dst: dst.id,
            bytes: len,
        });
    }
}
