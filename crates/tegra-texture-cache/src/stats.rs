use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for cache decisions. Cheap to bump under the cache lock and readable from
/// any thread.
#[derive(Debug, Default)]
pub struct CacheStats {
    l1_hits: AtomicU64,
    surfaces_created: AtomicU64,
    reserve_reuses: AtomicU64,
    rebuilds: AtomicU64,
    reconstructions: AtomicU64,
    recycles: AtomicU64,
    uploads: AtomicU64,
    flushes: AtomicU64,
    invalidations: AtomicU64,
    illegal_copies: AtomicU64,
}

macro_rules! counters {
    ($($field:ident => $inc:ident),* $(,)?) => {
        impl CacheStats {
            $(
                pub fn $inc(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> CacheStatsSnapshot {
                CacheStatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    l1_hits => inc_l1_hits,
    surfaces_created => inc_surfaces_created,
    reserve_reuses => inc_reserve_reuses,
    rebuilds => inc_rebuilds,
    reconstructions => inc_reconstructions,
    recycles => inc_recycles,
    uploads => inc_uploads,
    flushes => inc_flushes,
    invalidations => inc_invalidations,
    illegal_copies => inc_illegal_copies,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub l1_hits: u64,
    pub surfaces_created: u64,
    pub reserve_reuses: u64,
    pub rebuilds: u64,
    pub reconstructions: u64,
    pub recycles: u64,
    pub uploads: u64,
    pub flushes: u64,
    pub invalidations: u64,
    /// Copies between formats with different block sizes that were skipped.
    pub illegal_copies: u64,
}
