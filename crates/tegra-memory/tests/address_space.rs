use std::sync::Arc;

use pretty_assertions::assert_eq;
use tegra_memory::{
    GuestMemory, MemoryManager, MemoryManagerConfig, MemoryManagerError, NullRasterizer,
    PageEntry, VecGuestMemory,
};

fn setup() -> (Arc<VecGuestMemory>, MemoryManager) {
    let ram = Arc::new(VecGuestMemory::new(0x40000));
    let mm = MemoryManager::new(ram.clone());
    (ram, mm)
}

#[test]
fn map_translates_with_intra_page_offset() {
    let (_ram, mut mm) = setup();
    assert_eq!(mm.map(0x8000, 0x1000, 0x1000), Ok(0x1000));
    assert_eq!(mm.gpu_to_cpu_address(0x1500), Some(0x8500));
    assert_eq!(mm.gpu_to_cpu_address(0x2000), None);
}

#[test]
fn allocate_fixed_refuses_used_pages() {
    let (_ram, mut mm) = setup();
    mm.map(0x8000, 0x3000, 0x1000).unwrap();
    assert_eq!(mm.allocate_fixed(0x2000, 0x2000), None);
    assert_eq!(mm.allocate_fixed(0x4000, 0x2000), Some(0x4000));
    assert_eq!(mm.page_entry(0x5000), PageEntry::Allocated);
    assert_eq!(mm.gpu_to_cpu_address(0x4000), None);
    assert_eq!(mm.allocate_fixed(0x5000, 0x1000), None);
}

#[test]
fn map_allocate_skips_used_ranges_and_honors_alignment() {
    let (_ram, mut mm) = setup();
    let start = mm.config().address_space_start;
    mm.allocate_fixed(start, 0x3000).unwrap();

    let gpu_addr = mm.map_allocate(0x10000, 0x2000, 0x10000).unwrap();
    assert_eq!(gpu_addr, start + 0x10000);
    assert_eq!(mm.gpu_to_cpu_address(gpu_addr + 0x1234), Some(0x11234));

    let next = mm.allocate(0x1000, 0).unwrap();
    assert_eq!(next, start + 0x3000);
}

#[test]
fn exhausted_address_space_reports_no_free_range() {
    let ram = Arc::new(VecGuestMemory::new(0x1000));
    let config = MemoryManagerConfig::default()
        .with_address_space_bits(20)
        .with_address_space_start(0x80000);
    let mut mm = MemoryManager::with_config(ram, config);
    assert_eq!(
        mm.map_allocate(0, 0x100000, 0),
        Err(MemoryManagerError::NoFreeRange {
            size: 0x100000,
            align: 0
        })
    );
    assert!(mm.allocate(0x80000, 0).is_ok());
    assert!(mm.allocate(0x1000, 0).is_err());
}

#[test]
fn typed_access_round_trips_through_guest_memory() {
    let (ram, mut mm) = setup();
    mm.map(0x8000, 0x1000, 0x1000).unwrap();
    mm.write::<u32>(0x1010, 0xDEAD_BEEF);
    assert_eq!(ram.snapshot(0x8010, 4), 0xDEAD_BEEFu32.to_le_bytes().to_vec());
    assert_eq!(mm.read::<u32>(0x1010), 0xDEAD_BEEF);
    assert_eq!(mm.try_read::<u64>(0x9000), None);
    assert!(!mm.try_write::<u8>(0x9000, 1));
}

#[test]
#[should_panic(expected = "unresolvable gpu address")]
fn typed_read_from_unmapped_address_is_fatal() {
    let (_ram, mm) = setup();
    let _ = mm.read::<u32>(0x7000);
}

#[test]
fn unsafe_block_reads_zero_fill_holes() {
    let (ram, mut mm) = setup();
    ram.write(0x8000, &[0xAA; 0x1000]).unwrap();
    mm.map(0x8000, 0x1000, 0x1000).unwrap();
    mm.allocate_fixed(0x2000, 0x1000).unwrap();

    let mut buf = vec![0xFFu8; 0x1800];
    mm.read_block_unsafe(0x1800, &mut buf);
    assert!(buf[..0x800].iter().all(|&b| b == 0xAA));
    assert!(buf[0x800..].iter().all(|&b| b == 0));

    mm.write_block_unsafe(0x1FFC, &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(ram.snapshot(0x8FFC, 4), vec![1, 2, 3, 4]);
}

#[test]
fn copy_block_moves_bytes_between_mappings() {
    let (ram, mut mm) = setup();
    mm.map(0x8000, 0x1000, 0x1000).unwrap();
    mm.map(0x20000, 0x5000, 0x1000).unwrap();
    ram.write(0x8100, b"texture").unwrap();

    mm.copy_block(0x5200, 0x1100, 7, &NullRasterizer);
    assert_eq!(ram.snapshot(0x20200, 7), b"texture".to_vec());

    mm.copy_block_unsafe(0x5300, 0x1100, 3);
    assert_eq!(ram.snapshot(0x20300, 3), b"tex".to_vec());
}

#[test]
fn granular_range_stays_in_one_page() {
    let (_ram, mut mm) = setup();
    mm.map(0x8000, 0x1000, 0x2000).unwrap();
    assert!(mm.is_granular_range(0x1F00, 0x100));
    assert!(!mm.is_granular_range(0x1F00, 0x101));
    assert!(!mm.is_granular_range(0x4000, 4));
}
