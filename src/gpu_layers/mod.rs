pub mod activation;
pub mod bias;
pub mod context;
pub mod dense;
pub mod entry;
pub mod memory;
pub mod network;
pub mod optimization;
pub mod projection;
pub mod weighting;

use crate::error::Result;
use crate::layers::Optimizable;

pub use activation::GpuActivationLayer;
pub use bias::GpuBiasLayer;
pub use context::GpuContext;
pub use dense::GpuDenseLayer;
pub use entry::GpuInputLayer;
pub use memory::{CachedBatch, InputMemory};
pub use network::{GpuNetwork, GpuPropagator, GpuTester, GpuTrainer};
pub use optimization::GpuUpdateRule;
pub use projection::GpuProjectionLayer;
pub use weighting::GpuWeightingLayer;

pub(crate) const WORKGROUP_SIZE: u32 = 8;
pub(crate) const ENTRYWISE_WORKGROUP_SIZE: u32 = 64;

pub(crate) fn workgroup_count(work_items: u32, workgroup_size: u32) -> u32 {
    (work_items + workgroup_size - 1) / workgroup_size
}

/// The accelerator-side capability interface. Kernels operate on the whole
/// padded batch width; exactness over padding comes from the entry point's
/// zero-filled packing and the trainer's zero-padded loss gradients, so
/// every reduction picks up exact zeros there.
///
/// Forward and backward only enqueue work on the context's queue; nothing
/// blocks until a read-back.
pub trait GpuForwardLayer {
    fn number_input_rows(&self) -> usize;
    fn maximum_input_columns(&self) -> usize;
    fn number_output_rows(&self) -> usize;
    fn maximum_output_columns(&self) -> usize;

    fn acquire(&mut self, maximum_batch_size: usize) -> Result<()>;
    fn release(&mut self);

    fn forward(&mut self, batch_size: usize, input: &wgpu::Buffer, is_training: bool)
        -> Result<()>;
    fn backward(&mut self, batch_size: usize, chain: &wgpu::Buffer) -> Result<()>;

    fn forward_result(&self) -> Result<&wgpu::Buffer>;
    fn backward_result(&self) -> Result<&wgpu::Buffer>;

    fn as_optimizable(&mut self) -> Option<&mut dyn Optimizable> {
        None
    }
}
