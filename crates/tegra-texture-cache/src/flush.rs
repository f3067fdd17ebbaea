//! Batches of surfaces queued for asynchronous write-back.

use std::collections::VecDeque;

use crate::surface::SurfaceId;

/// Surfaces are queued into an open batch; committing closes it. Batches pop in FIFO order.
#[derive(Debug, Default)]
pub struct AsyncFlushQueue {
    uncommitted: Option<Vec<SurfaceId>>,
    committed: VecDeque<Option<Vec<SurfaceId>>>,
}

impl AsyncFlushQueue {
    pub fn push(&mut self, id: SurfaceId) {
        self.uncommitted.get_or_insert_with(Vec::new).push(id);
    }

    pub fn has_uncommitted(&self) -> bool {
        self.uncommitted.is_some()
    }

    /// Closes the open batch. An empty commit still occupies a slot so batch popping stays
    /// aligned with the caller's fences.
    pub fn commit(&mut self) {
        self.committed.push_back(self.uncommitted.take());
    }

    /// Whether the oldest committed batch has surfaces to flush.
    pub fn should_wait(&self) -> bool {
        matches!(self.committed.front(), Some(Some(_)))
    }

    pub fn pop(&mut self) -> Option<Vec<SurfaceId>> {
        self.committed.pop_front().flatten()
    }

    pub fn forget(&mut self, id: SurfaceId) {
        if let Some(batch) = &mut self.uncommitted {
            batch.retain(|&other| other != id);
        }
        for batch in self.committed.iter_mut().flatten() {
            batch.retain(|&other| other != id);
        }
    }
}
