//! Sparse two-level page table for the GPU address space.
//!
//! A flat array of one entry per 4 KiB page would cost gigabytes for a 40-bit space, so leaves
//! of [`LEAF_ENTRIES`] pages are allocated the first time one of their pages leaves the
//! `Unmapped` state. Lookups on never-touched leaves return `Unmapped`.

use crate::VAddr;

const LEAF_BITS: u32 = 10;
pub const LEAF_ENTRIES: usize = 1 << LEAF_BITS;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PageEntry {
    #[default]
    Unmapped,
    /// Reserved GPU range with no CPU backing yet.
    Allocated,
    /// Backed by guest CPU memory starting at this page-aligned address.
    Mapped(VAddr),
}

impl PageEntry {
    pub fn is_unmapped(self) -> bool {
        matches!(self, PageEntry::Unmapped)
    }

    pub fn cpu_addr(self) -> Option<VAddr> {
        match self {
            PageEntry::Mapped(addr) => Some(addr),
            _ => None,
        }
    }
}

type Leaf = Box<[PageEntry; LEAF_ENTRIES]>;

#[derive(Debug)]
pub struct PageTable {
    leaves: Vec<Option<Leaf>>,
    num_pages: u64,
}

impl PageTable {
    pub fn new(num_pages: u64) -> Self {
        let num_leaves = num_pages.div_ceil(LEAF_ENTRIES as u64) as usize;
        let mut leaves = Vec::with_capacity(num_leaves);
        leaves.resize_with(num_leaves, || None);
        Self { leaves, num_pages }
    }

    pub fn num_pages(&self) -> u64 {
        self.num_pages
    }

    pub fn get(&self, page: u64) -> PageEntry {
        if page >= self.num_pages {
            return PageEntry::Unmapped;
        }
        let (leaf, slot) = split(page);
        match &self.leaves[leaf] {
            Some(entries) => entries[slot],
            None => PageEntry::Unmapped,
        }
    }

    pub fn set(&mut self, page: u64, entry: PageEntry) {
        assert!(
            page < self.num_pages,
            "page index {page:#x} outside the address space"
        );
        let (leaf, slot) = split(page);
        let leaf = &mut self.leaves[leaf];
        if leaf.is_none() {
            if entry.is_unmapped() {
                return;
            }
            *leaf = Some(Box::new([PageEntry::Unmapped; LEAF_ENTRIES]));
        }
        if let Some(entries) = leaf {
            entries[slot] = entry;
        }
    }

    /// Number of leaves currently backed by storage.
    pub fn resident_leaves(&self) -> usize {
        self.leaves.iter().filter(|leaf| leaf.is_some()).count()
    }
}

fn split(page: u64) -> (usize, usize) {
    (
        (page >> LEAF_BITS) as usize,
        (page & (LEAF_ENTRIES as u64 - 1)) as usize,
    )
}
