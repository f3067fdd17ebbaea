//! GPU virtual address space for a Tegra-class (Maxwell) GPU.
//!
//! The GPU sees its own 40-bit virtual address space. Each page either points at guest CPU
//! memory, is reserved without backing (`Allocated`), or is unmapped. Caches that shadow guest
//! memory (the texture cache) hook in through [`RasterizerInterface`] so that block transfers
//! and unmaps keep host copies coherent.

pub mod guest;
pub mod manager;
pub mod page_table;
pub mod rasterizer;

pub use guest::{GuestMemory, GuestMemoryError, VecGuestMemory};
pub use manager::{MemoryManager, MemoryManagerConfig, MemoryManagerError};
pub use page_table::{PageEntry, PageTable};
pub use rasterizer::{CachedPageCounter, NullRasterizer, PageCacheTracker, RasterizerInterface};

/// Address in the GPU virtual address space.
pub type GpuVAddr = u64;

/// Address in guest CPU memory (the backing store the GPU pages point into).
pub type VAddr = u64;

/// Default page granularity: 4 KiB.
pub const DEFAULT_PAGE_BITS: u32 = 12;

#[cfg(test)]
mod tests;
