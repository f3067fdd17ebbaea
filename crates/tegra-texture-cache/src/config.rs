/// How hard the cache tries to keep overlapping resources coherent with guest memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum GpuAccuracy {
    #[default]
    Normal,
    High,
    /// Validation mode: every ambiguous overlap is flushed and reloaded from guest memory.
    Extreme,
}

/// Which recycle situations flush modified overlaps before discarding them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecyclePolicy {
    /// A 3D surface takes part in the overlap.
    pub flush_3d: bool,
    /// Topology matched except for block compression.
    pub flush_compress_mismatch: bool,
    /// Topology fully matched and the request is pitch-linear.
    pub flush_untiled_full_match: bool,
}

impl Default for RecyclePolicy {
    fn default() -> Self {
        Self {
            flush_3d: true,
            flush_compress_mismatch: true,
            flush_untiled_full_match: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureCacheConfig {
    pub accuracy: GpuAccuracy,
    /// Queue linear render targets for asynchronous flush when they are unbound.
    pub async_gpu: bool,
    pub recycle: RecyclePolicy,
    /// Only render-target slices of 3D textures survive unregistration while targets are
    /// guarded. With `false` every bound render target is protected.
    pub protect_only_3d_render_targets: bool,
    pub staging_buffers: usize,
}

impl Default for TextureCacheConfig {
    fn default() -> Self {
        Self {
            accuracy: GpuAccuracy::Normal,
            async_gpu: false,
            recycle: RecyclePolicy::default(),
            protect_only_3d_render_targets: true,
            staging_buffers: 2,
        }
    }
}

impl TextureCacheConfig {
    pub fn with_accuracy(mut self, accuracy: GpuAccuracy) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_async_gpu(mut self, async_gpu: bool) -> Self {
        self.async_gpu = async_gpu;
        self
    }

    pub fn with_recycle_policy(mut self, recycle: RecyclePolicy) -> Self {
        self.recycle = recycle;
        self
    }

    pub fn with_protect_only_3d_render_targets(mut self, only_3d: bool) -> Self {
        self.protect_only_3d_render_targets = only_3d;
        self
    }

    pub fn with_staging_buffers(mut self, count: usize) -> Self {
        self.staging_buffers = count;
        self
    }

    pub fn is_extreme(&self) -> bool {
        self.accuracy == GpuAccuracy::Extreme
    }
}
