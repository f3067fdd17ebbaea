use tegra_memory::GpuVAddr;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TextureCacheError {
    #[error("gpu address {0:#x} does not translate to guest memory")]
    UnmappedAddress(GpuVAddr),
    #[error("render target slot {0} out of range")]
    InvalidRenderTarget(usize),
}
