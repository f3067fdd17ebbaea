use pretty_assertions::assert_eq;

use super::helpers::{linear_rgba, pattern, Harness};
use crate::TextureCacheConfig;

#[test]
fn cpu_write_unregisters_on_next_sync() {
    let h = Harness::new();
    let view = h.get(0x10000, &linear_rgba(64, 16));

    h.cache.on_cpu_write(0x10004, 4);
    h.cache.on_cpu_write(0x10008, 4);
    assert!(!h.pages.is_cached(0x10000));
    assert_eq!(h.cache.registered_surfaces(), vec![view.surface]);

    h.cache.sync_guest_host();
    assert!(h.cache.registered_surfaces().is_empty());
    assert!(!h.cache.surface_info(view.surface).unwrap().flags.contains(crate::SurfaceFlags::SYNC_PENDING));

    // Pending unregistrations do not survive the sync.
    h.cache.sync_guest_host();
    let again = h.get(0x10000, &linear_rgba(64, 16));
    assert_eq!(again.surface, view.surface);
    assert_eq!(h.cache.stats().uploads, 2);
}

#[test]
fn cpu_write_outside_surfaces_is_ignored() {
    let h = Harness::new();
    let view = h.get(0x10000, &linear_rgba(64, 16));
    h.cache.on_cpu_write(0x20000, 0x100);
    h.cache.sync_guest_host();
    assert_eq!(h.cache.registered_surfaces(), vec![view.surface]);
}

#[test]
fn flush_region_writes_back_oldest_modification_first() {
    let h = Harness::new();
    let a_bytes = pattern(64 * 16 * 4, 1);
    let b_bytes = pattern(64 * 16 * 4, 2);
    let a = h.draw(0, 0x10000, 64, 16, &a_bytes);
    let b = h.draw(1, 0x20000, 64, 16, &b_bytes);
    // Touch `a` again so it is now the newer of the two.
    h.cache.mark_color_buffer_in_use(0).unwrap();

    assert!(h.cache.must_flush_region(0x10000, 0x20000));
    h.cache.flush_region(&h.memory, 0x10000, 0x20000);

    assert_eq!(h.downloads(), vec![h.host(&b).id(), h.host(&a).id()]);
    assert_eq!(h.ram.snapshot(0x10000, a_bytes.len()), a_bytes);
    assert_eq!(h.ram.snapshot(0x20000, b_bytes.len()), b_bytes);
    assert!(!h.cache.must_flush_region(0x10000, 0x20000));
    assert_eq!(h.cache.stats().flushes, 2);
}

#[test]
fn flush_of_clean_surface_downloads_nothing() {
    let h = Harness::new();
    h.get(0x10000, &linear_rgba(64, 16));
    h.cache.flush_region(&h.memory, 0x10000, 0x1000);
    assert!(h.downloads().is_empty());
}

#[test]
fn invalidate_drops_modified_surface_without_write_back() {
    let h = Harness::new();
    let drawn = pattern(64 * 16 * 4, 5);
    h.draw(0, 0x10000, 64, 16, &drawn);

    h.cache.invalidate_region(0x10000, 0x1000);

    assert!(h.downloads().is_empty());
    assert!(h.cache.registered_surfaces().is_empty());
    assert_eq!(h.ram.snapshot(0x10000, 16), vec![0; 16]);
    assert_eq!(h.cache.stats().invalidations, 1);
}

#[test]
fn unmap_writes_back_then_drops() {
    let mut h = Harness::new();
    let drawn = pattern(64 * 16 * 4, 8);
    h.draw(0, 0x10000, 64, 16, &drawn);

    let Harness { memory, cache, ram, .. } = &mut h;
    memory
        .unmap(super::helpers::GPU_BASE + 0x10000, 0x1000, &*cache)
        .unwrap();

    assert_eq!(ram.snapshot(0x10000, drawn.len()), drawn);
    assert!(cache.registered_surfaces().is_empty());
}

#[test]
fn async_flush_of_unbound_linear_target() {
    let h = Harness::with_config(TextureCacheConfig::default().with_async_gpu(true));
    let drawn = pattern(64 * 16 * 4, 13);
    let first = h.draw(0, 0x10000, 64, 16, &drawn);
    h.draw(0, 0x20000, 64, 16, &pattern(64 * 16 * 4, 14));

    assert!(h.cache.has_uncommitted_flushes());
    h.cache.commit_async_flushes();
    assert!(!h.cache.has_uncommitted_flushes());
    assert!(h.cache.should_wait_async_flushes());

    h.cache.pop_async_flushes(&h.memory);
    assert_eq!(h.downloads(), vec![h.host(&first).id()]);
    assert_eq!(h.ram.snapshot(0x10000, drawn.len()), drawn);
    assert!(!h.cache.should_wait_async_flushes());
}
