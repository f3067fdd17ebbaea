//! Guest CPU memory as seen from the GPU side.
//!
//! The emulator's CPU memory subsystem implements [`GuestMemory`]. Methods take `&self` so a
//! single backing store can be shared between the address space, the texture cache and the
//! CPU without exclusive borrows; implementations provide their own synchronisation.

use std::sync::{Mutex, MutexGuard};

use crate::VAddr;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("guest memory access out of bounds: addr=0x{addr:x}, len=0x{len:x}")]
pub struct GuestMemoryError {
    pub addr: VAddr,
    pub len: usize,
}

pub trait GuestMemory: Send + Sync {
    fn read(&self, addr: VAddr, dst: &mut [u8]) -> Result<(), GuestMemoryError>;
    fn write(&self, addr: VAddr, src: &[u8]) -> Result<(), GuestMemoryError>;

    /// Whether `[addr, addr + len)` is backed. This stands in for a host pointer lookup.
    fn is_valid_range(&self, addr: VAddr, len: usize) -> bool;
}

/// Contiguous guest RAM starting at address 0. Used by tests and tools.
#[derive(Debug)]
pub struct VecGuestMemory {
    mem: Mutex<Vec<u8>>,
}

impl VecGuestMemory {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            mem: Mutex::new(vec![0u8; size_bytes]),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `len` bytes starting at `addr`; panics when out of range.
    pub fn snapshot(&self, addr: VAddr, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        if let Err(err) = GuestMemory::read(self, addr, &mut out) {
            panic!("{err}");
        }
        out
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.mem.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn span(&self, addr: VAddr, len: usize) -> Result<std::ops::Range<usize>, GuestMemoryError> {
        let err = GuestMemoryError { addr, len };
        let start = usize::try_from(addr).map_err(|_| err.clone())?;
        let end = start.checked_add(len).ok_or_else(|| err.clone())?;
        if end > self.lock().len() {
            return Err(err);
        }
        Ok(start..end)
    }
}

impl GuestMemory for VecGuestMemory {
    fn read(&self, addr: VAddr, dst: &mut [u8]) -> Result<(), GuestMemoryError> {
        let span = self.span(addr, dst.len())?;
        dst.copy_from_slice(&self.lock()[span]);
        Ok(())
    }

    fn write(&self, addr: VAddr, src: &[u8]) -> Result<(), GuestMemoryError> {
        let span = self.span(addr, src.len())?;
        self.lock()[span].copy_from_slice(src);
        Ok(())
    }

    fn is_valid_range(&self, addr: VAddr, len: usize) -> bool {
        self.span(addr, len).is_ok()
    }
}
