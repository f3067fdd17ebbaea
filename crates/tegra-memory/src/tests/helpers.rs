use std::sync::{Arc, Mutex};

use crate::{MemoryManager, RasterizerInterface, VAddr, VecGuestMemory};

pub(crate) fn new_manager(ram_size: usize) -> (Arc<VecGuestMemory>, MemoryManager) {
    let ram = Arc::new(VecGuestMemory::new(ram_size));
    let manager = MemoryManager::new(ram.clone());
    (ram, manager)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hook {
    Flush(VAddr, u64),
    Invalidate(VAddr, u64),
}

#[derive(Default)]
pub(crate) struct RecordingRasterizer {
    pub(crate) calls: Mutex<Vec<Hook>>,
}

impl RecordingRasterizer {
    pub(crate) fn take(&self) -> Vec<Hook> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

impl RasterizerInterface for RecordingRasterizer {
    fn flush_region(&self, _gpu_memory: &MemoryManager, addr: VAddr, size: u64) {
        self.calls.lock().unwrap().push(Hook::Flush(addr, size));
    }

    fn invalidate_region(&self, addr: VAddr, size: u64) {
        self.calls.lock().unwrap().push(Hook::Invalidate(addr, size));
    }
}
