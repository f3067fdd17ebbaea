//! Spatial index over registered surfaces and the pool of unregistered ones kept for reuse.

use hashbrown::{HashMap, HashSet};
use tegra_memory::VAddr;

use crate::params::SurfaceParams;
use crate::surface::SurfaceId;

/// 1 MiB buckets.
pub const REGISTRY_PAGE_BITS: u32 = 20;

#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    buckets: HashMap<u64, Vec<SurfaceId>>,
    l1: HashMap<VAddr, SurfaceId>,
    len: usize,
}

fn buckets_of(start: VAddr, end: VAddr) -> std::ops::RangeInclusive<u64> {
    let last = end.max(start + 1) - 1;
    (start >> REGISTRY_PAGE_BITS)..=(last >> REGISTRY_PAGE_BITS)
}

impl SurfaceRegistry {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds `id` to every bucket `[start, end)` touches and to the L1 table at `start`.
    pub fn insert(&mut self, id: SurfaceId, start: VAddr, end: VAddr) {
        self.l1.insert(start, id);
        for bucket in buckets_of(start, end) {
            self.buckets.entry(bucket).or_default().push(id);
        }
        self.len += 1;
    }

    pub fn remove(&mut self, id: SurfaceId, start: VAddr, end: VAddr) {
        if self.l1.get(&start) == Some(&id) {
            self.l1.remove(&start);
        }
        let mut found = false;
        for bucket in buckets_of(start, end) {
            let Some(ids) = self.buckets.get_mut(&bucket) else {
                continue;
            };
            if let Some(pos) = ids.iter().position(|&other| other == id) {
                ids.swap_remove(pos);
                found = true;
            }
            if ids.is_empty() {
                self.buckets.remove(&bucket);
            }
        }
        if found {
            self.len -= 1;
        }
    }

    /// Surface registered exactly at `cpu_addr`, if any.
    pub fn l1(&self, cpu_addr: VAddr) -> Option<SurfaceId> {
        self.l1.get(&cpu_addr).copied()
    }

    /// Registered surfaces whose range passes `overlaps`, deduplicated, in discovery order.
    pub fn candidates(
        &self,
        start: VAddr,
        end: VAddr,
        mut overlaps: impl FnMut(SurfaceId) -> bool,
    ) -> Vec<SurfaceId> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for bucket in buckets_of(start, end) {
            let Some(ids) = self.buckets.get(&bucket) else {
                continue;
            };
            for &id in ids {
                if seen.insert(id) && overlaps(id) {
                    found.push(id);
                }
            }
        }
        found
    }

    pub fn contains_in_bucket(&self, id: SurfaceId, cpu_addr: VAddr) -> bool {
        self.buckets
            .get(&(cpu_addr >> REGISTRY_PAGE_BITS))
            .is_some_and(|ids| ids.contains(&id))
    }

    pub fn all(&self) -> Vec<SurfaceId> {
        let mut ids: Vec<SurfaceId> = self
            .buckets
            .values()
            .flatten()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Unregistered surfaces keyed by their exact params.
#[derive(Debug, Default)]
pub struct SurfaceReserve {
    pool: HashMap<SurfaceParams, Vec<SurfaceId>>,
}

impl SurfaceReserve {
    pub fn reserve(&mut self, params: SurfaceParams, id: SurfaceId) {
        let ids = self.pool.entry(params).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// First pooled surface with identical params for which `is_free` holds.
    pub fn find(&self, params: &SurfaceParams, mut is_free: impl FnMut(SurfaceId) -> bool) -> Option<SurfaceId> {
        self.pool.get(params)?.iter().copied().find(|&id| is_free(id))
    }

    pub fn len(&self) -> usize {
        self.pool.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Removes and returns every pooled surface for which `is_free` holds.
    pub fn drain_free(&mut self, mut is_free: impl FnMut(SurfaceId) -> bool) -> Vec<SurfaceId> {
        let mut drained = Vec::new();
        self.pool.retain(|_, ids| {
            ids.retain(|&id| {
                let free = is_free(id);
                if free {
                    drained.push(id);
                }
                !free
            });
            !ids.is_empty()
        });
        drained
    }
}
