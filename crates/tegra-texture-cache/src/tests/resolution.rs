use pretty_assertions::assert_eq;

use super::helpers::{linear_rgba, pattern, Harness, GPU_BASE};
use crate::descriptor::BlockLinear;
use crate::surface::SurfaceBase;
use crate::{BackendEvent, PixelFormat, SurfaceParams, SurfaceTarget, ViewParams};

#[test]
fn fresh_request_uploads_guest_contents_once() {
    let h = Harness::new();
    let bytes = pattern(64 * 16 * 4, 3);
    h.write_guest(0x10000, &bytes);

    let view = h.get(0x10000, &linear_rgba(64, 16));

    assert_eq!(h.host(&view).data(), bytes);
    assert!(h.pages.is_cached(0x10000));
    assert_eq!(h.cache.registered_surfaces(), vec![view.surface]);
    let stats = h.cache.stats();
    assert_eq!(stats.surfaces_created, 1);
    assert_eq!(stats.uploads, 1);
    assert_eq!(h.count_events(|e| matches!(e, BackendEvent::Upload { .. })), 1);
}

#[test]
fn repeated_request_hits_l1() {
    let h = Harness::new();
    let params = linear_rgba(64, 16);
    let first = h.get(0x10000, &params);
    let second = h.get(0x10000, &params);

    assert_eq!(first, second);
    let stats = h.cache.stats();
    assert_eq!(stats.l1_hits, 1);
    assert_eq!(stats.surfaces_created, 1);
    assert_eq!(stats.uploads, 1);
}

#[test]
fn mip_level_request_becomes_a_view() {
    let h = Harness::new();
    let parent = SurfaceParams::new_2d(
        PixelFormat::A8B8G8R8Unorm,
        64,
        64,
        Some(BlockLinear::new(4, 0)),
    )
    .with_levels(2);
    let layout = SurfaceBase::new(GPU_BASE, parent);
    let whole = h.get(0x20000, &parent);

    let level1 = SurfaceParams::new_2d(
        PixelFormat::A8B8G8R8Unorm,
        32,
        32,
        Some(BlockLinear::new(parent.mip_block_height(1), 0)),
    );
    assert_eq!(level1.guest_size_in_bytes(), layout.mipmap_size(1));
    let view = h.get(0x20000 + layout.mipmap_offset(1) as u64, &level1);

    assert_eq!(view.surface, whole.surface);
    assert_eq!(view.view, ViewParams::new(SurfaceTarget::Texture2D, 0, 1, 1, 1));
    assert_eq!(h.cache.stats().surfaces_created, 1);
}

#[test]
fn sibling_format_reinterprets_without_rebuild() {
    let h = Harness::new();
    let color = SurfaceParams::new_2d(PixelFormat::R32Float, 32, 8, None);
    let depth = SurfaceParams::new_2d(PixelFormat::D32Float, 32, 8, None);
    let first = h.get(0x10000, &color);
    let second = h.get(0x10000, &depth);

    assert_eq!(first.surface, second.surface);
    assert_eq!(h.cache.stats().rebuilds, 0);
}

#[test]
fn render_request_in_other_format_rebuilds() {
    let h = Harness::new();
    let color = SurfaceParams::new_2d(PixelFormat::R32Float, 32, 8, None);
    let depth = SurfaceParams::new_2d(PixelFormat::D32Float, 32, 8, None);
    let first = h.get(0x10000, &color);
    let rebuilt = h
        .cache
        .get_surface(&h.memory, GPU_BASE + 0x10000, &depth, true, true)
        .unwrap();

    assert_ne!(first.surface, rebuilt.surface);
    assert_eq!(h.cache.stats().rebuilds, 1);
    assert_eq!(h.cache.registered_surfaces(), vec![rebuilt.surface]);
    assert_eq!(
        h.cache.surface_info(rebuilt.surface).unwrap().params.pixel_format,
        PixelFormat::D32Float
    );
    assert_eq!(h.count_events(|e| matches!(e, BackendEvent::BufferCopy { .. })), 1);
}

#[test]
fn larger_request_over_clean_surface_reconstructs_from_guest() {
    let h = Harness::new();
    let small = h.get(0x10000, &linear_rgba(64, 16));
    let bytes = pattern(64 * 32 * 4, 9);
    h.write_guest(0x10000, &bytes);

    let large = h.get(0x10000, &linear_rgba(64, 32));

    assert_ne!(small.surface, large.surface);
    assert_eq!(h.host(&large).data(), bytes);
    assert_eq!(h.cache.registered_surfaces(), vec![large.surface]);
    assert_eq!(h.cache.stats().reconstructions, 1);
}

#[test]
fn larger_request_over_modified_surface_flushes_first() {
    let h = Harness::new();
    let drawn = pattern(64 * 16 * 4, 21);
    let small = h.draw(0, 0x10000, 64, 16, &drawn);
    assert!(h.is_modified(&small));

    let large = h.get(0x10000, &linear_rgba(64, 32));

    assert_eq!(h.downloads(), vec![h.host(&small).id()]);
    assert_eq!(h.ram.snapshot(0x10000, drawn.len()), drawn);
    assert_eq!(&h.host(&large).data()[..drawn.len()], &drawn[..]);
    assert!(!h.is_modified(&large));
    assert_eq!(h.cache.registered_surfaces(), vec![large.surface]);
}

#[test]
fn recycled_overlaps_flush_in_modification_order() {
    let h = Harness::new();
    let first = pattern(64 * 16 * 4, 5);
    let second = pattern(64 * 16 * 4, 9);
    let a = h.draw(0, 0x10000, 64, 16, &first);
    let b = h.draw(1, 0x11000, 64, 16, &second);
    // Drawing into `a` again makes it the most recently modified.
    let redrawn = h.draw(0, 0x10000, 64, 16, &first);
    assert_eq!(redrawn.surface, a.surface);

    h.get(0x10000, &linear_rgba(64, 32));

    assert_eq!(h.downloads(), vec![h.host(&b).id(), h.host(&a).id()]);
    assert_eq!(h.ram.snapshot(0x10000, first.len()), first);
    assert_eq!(h.ram.snapshot(0x11000, second.len()), second);
}

#[test]
fn unregistered_surface_is_reused_from_reserve() {
    let h = Harness::new();
    let params = linear_rgba(64, 16);
    let first = h.get(0x10000, &params);
    h.cache.invalidate_region(0x10000, 1);
    assert!(h.cache.registered_surfaces().is_empty());
    assert!(!h.pages.is_cached(0x10000));

    let second = h.get(0x30000, &params);

    assert_eq!(second.surface, first.surface);
    let info = h.cache.surface_info(second.surface).unwrap();
    assert_eq!(info.gpu_addr, GPU_BASE + 0x30000);
    assert_eq!(info.cpu_addr, 0x30000);
    assert_eq!(h.cache.stats().reserve_reuses, 1);
    assert_eq!(h.cache.stats().surfaces_created, 1);

    assert_eq!(h.cache.clear_reserve(), 0);
}

#[test]
fn clear_reserve_destroys_free_surfaces() {
    let h = Harness::new();
    let view = h.get(0x10000, &linear_rgba(64, 16));
    h.cache.invalidate_region(0x10000, 1);

    assert_eq!(h.cache.clear_reserve(), 1);
    assert_eq!(h.cache.surface_info(view.surface), None);
}

#[test]
fn unmapped_address_is_an_error() {
    let h = Harness::new();
    let err = h
        .cache
        .get_surface(&h.memory, 0x1000, &linear_rgba(4, 4), true, false)
        .unwrap_err();
    assert_eq!(err, crate::TextureCacheError::UnmappedAddress(0x1000));
}
