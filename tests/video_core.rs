use std::sync::{Arc, Once};

use pretty_assertions::assert_eq;
use tegra_video::memory::{CachedPageCounter, GuestMemory, VecGuestMemory};
use tegra_video::texture_cache::{
    BackendEvent, PixelFormat, RenderTargetDescriptor, SoftwareBackend, SurfaceFlags,
    SurfaceParams, SurfaceView,
};
use tegra_video::{VideoCore, VideoCoreConfig, VideoCoreError};

const RAM_SIZE: usize = 0x10_0000;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

struct Fixture {
    ram: Arc<VecGuestMemory>,
    pages: Arc<CachedPageCounter>,
    core: VideoCore<SoftwareBackend>,
}

fn fixture() -> Fixture {
    init_tracing();
    let ram = Arc::new(VecGuestMemory::new(RAM_SIZE));
    let pages = Arc::new(CachedPageCounter::default());
    let core = VideoCore::new(
        ram.clone(),
        SoftwareBackend::new(),
        pages.clone(),
        VideoCoreConfig::default(),
    );
    Fixture { ram, pages, core }
}

fn linear_rgba(width: u32, height: u32) -> SurfaceParams {
    SurfaceParams::new_2d(PixelFormat::A8B8G8R8Unorm, width, height, None)
}

fn uploads(core: &VideoCore<SoftwareBackend>) -> usize {
    core.cache()
        .backend()
        .events()
        .iter()
        .filter(|event| matches!(event, BackendEvent::Upload { .. }))
        .count()
}

#[test]
fn mapped_range_translates_page_by_page() -> anyhow::Result<()> {
    let mut f = fixture();
    let gpu_addr = f.core.map_allocate(0x2000, 0x3000, 0x1_0000)?;
    assert_eq!(gpu_addr % 0x1_0000, 0);
    assert_eq!(f.core.gpu_to_cpu_address(gpu_addr), Some(0x2000));
    assert_eq!(f.core.gpu_to_cpu_address(gpu_addr + 0x2fff), Some(0x4fff));
    assert_eq!(f.core.gpu_to_cpu_address(gpu_addr + 0x3000), None);
    Ok(())
}

#[test]
fn misaligned_map_is_reported() {
    let mut f = fixture();
    let err = f.core.map(0x2001, 1 << 32, 0x1000).unwrap_err();
    assert!(matches!(err, VideoCoreError::Memory(_)));
}

#[test]
fn preserved_request_uploads_once_and_reuses() -> anyhow::Result<()> {
    let mut f = fixture();
    let gpu_addr = f.core.map_allocate(0x8000, 0x4000, 0)?;
    let bytes: Vec<u8> = (0..32 * 32 * 4).map(|i| i as u8).collect();
    f.ram.write(0x8000, &bytes)?;

    let params = linear_rgba(32, 32);
    let first = f.core.get_surface(gpu_addr, &params, true, false)?;
    let second = f.core.get_surface(gpu_addr, &params, true, false)?;

    assert_eq!(first, second);
    assert_eq!(uploads(&f.core), 1);
    let host = f.core.cache().host_surface(first.surface).unwrap();
    assert_eq!(host.data(), bytes);
    assert!(f.pages.is_cached(0x8000));
    Ok(())
}

/// Binds a linear RGBA8 colour target, fills it with `value` and marks it drawn.
fn draw(
    core: &VideoCore<SoftwareBackend>,
    slot: usize,
    gpu_addr: u64,
    width: u32,
    height: u32,
    value: u8,
) -> anyhow::Result<SurfaceView> {
    let desc = RenderTargetDescriptor {
        gpu_addr,
        format: PixelFormat::A8B8G8R8Unorm,
        tiling: None,
        width: width * 4,
        height,
        layers: 1,
        is_3d: false,
    };
    let view = core
        .cache()
        .bind_color_buffer(core.memory(), slot, Some(&desc), false)?
        .ok_or_else(|| anyhow::anyhow!("colour target {slot} did not bind"))?;
    let host = core
        .cache()
        .host_surface(view.surface)
        .ok_or_else(|| anyhow::anyhow!("{} has no host surface", view.surface))?;
    host.write_data(0, &vec![value; (width * height * 4) as usize]);
    core.cache().mark_color_buffer_in_use(slot)?;
    Ok(view)
}

#[test]
fn gpu_write_invalidates_and_read_flushes() -> anyhow::Result<()> {
    let mut f = fixture();
    let gpu_addr = f.core.map_allocate(0x8000, 0x4000, 0)?;
    let view = draw(&f.core, 0, gpu_addr, 32, 32, 0xab)?;

    // A coherent read sees what the GPU drew.
    let mut readback = vec![0; 16];
    f.core.read_block(gpu_addr, &mut readback);
    assert_eq!(readback, vec![0xab; 16]);
    let info = f.core.cache().surface_info(view.surface).unwrap();
    assert!(!info.flags.contains(SurfaceFlags::MODIFIED));

    // A block write over the surface drops it.
    f.core.write_block(gpu_addr + 0x100, &[1, 2, 3, 4]);
    assert!(f.core.cache().registered_surfaces().is_empty());
    assert_eq!(f.ram.snapshot(0x8100, 4), vec![1, 2, 3, 4]);
    Ok(())
}

#[test]
fn copy_block_moves_flushed_contents() -> anyhow::Result<()> {
    let mut f = fixture();
    let src = f.core.map_allocate(0x8000, 0x1000, 0)?;
    let dst = f.core.map_allocate(0x20000, 0x1000, 0)?;
    draw(&f.core, 1, src, 16, 16, 7)?;

    f.core.copy_block(dst, src, 16 * 16 * 4);

    assert_eq!(f.ram.snapshot(0x20000, 16 * 16 * 4), vec![7; 16 * 16 * 4]);
    Ok(())
}

#[test]
fn unmap_writes_back_and_unregisters() -> anyhow::Result<()> {
    let mut f = fixture();
    let gpu_addr = f.core.map_allocate(0x8000, 0x4000, 0)?;
    draw(&f.core, 0, gpu_addr, 32, 32, 9)?;

    f.core.unmap(gpu_addr, 0x4000)?;

    assert_eq!(f.core.gpu_to_cpu_address(gpu_addr), None);
    assert_eq!(f.ram.snapshot(0x8000, 64), vec![9; 64]);
    assert!(f.core.cache().registered_surfaces().is_empty());
    assert!(!f.pages.is_cached(0x8000));
    Ok(())
}

#[test]
fn flushes_follow_modification_order() -> anyhow::Result<()> {
    let mut f = fixture();
    let first = f.core.map_allocate(0x8000, 0x1000, 0)?;
    let second = f.core.map_allocate(0x9000, 0x1000, 0)?;
    let a = draw(&f.core, 0, second, 16, 16, 1)?;
    let b = draw(&f.core, 1, first, 16, 16, 2)?;
    f.core.cache().backend().take_events();

    f.core.flush_region(0x8000, 0x2000);

    let order: Vec<u64> = f
        .core
        .cache()
        .backend()
        .events()
        .into_iter()
        .filter_map(|event| match event {
            BackendEvent::Download { surface, .. } => Some(surface),
            _ => None,
        })
        .collect();
    let host_id = |view: &SurfaceView| f.core.cache().host_surface(view.surface).map(|s| s.id());
    assert_eq!(order, [host_id(&a), host_id(&b)].into_iter().flatten().collect::<Vec<_>>());
    Ok(())
}

#[test]
fn cpu_write_is_idempotent_until_sync() -> anyhow::Result<()> {
    let mut f = fixture();
    let gpu_addr = f.core.map_allocate(0x8000, 0x4000, 0)?;
    f.core.get_surface(gpu_addr, &linear_rgba(32, 32), true, false)?;

    f.core.on_cpu_write(0x8000, 4);
    f.core.on_cpu_write(0x8000, 4);
    f.core.sync_guest_host();
    f.core.sync_guest_host();

    assert!(f.core.cache().registered_surfaces().is_empty());
    Ok(())
}
