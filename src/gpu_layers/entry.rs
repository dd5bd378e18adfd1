use crate::error::{EngineError, Result};
use crate::matrix::{concatenate_batch, FloatMatrix};

use super::context::GpuContext;
use super::memory::{CachedBatch, InputMemory};

/// The accelerator-path entry point. Packs a batch on the host exactly like
/// the host entry point, then transfers the result to device memory at most
/// once per batch identifier: a batch already resident in the input memory
/// is reused as-is.
#[derive(Debug)]
pub struct GpuInputLayer {
    context: GpuContext,
    number_rows: usize,
    maximum_columns: usize,
    concatenation: Vec<f32>,
    forward: Option<wgpu::Buffer>,
    column_counts: Vec<usize>,
    acquired: bool,
}

impl GpuInputLayer {
    pub fn new(context: GpuContext, number_rows: usize, maximum_columns: usize) -> Self {
        GpuInputLayer {
            context,
            number_rows,
            maximum_columns,
            concatenation: Vec::new(),
            forward: None,
            column_counts: Vec::new(),
            acquired: false,
        }
    }

    pub fn number_rows(&self) -> usize {
        self.number_rows
    }

    pub fn maximum_columns(&self) -> usize {
        self.maximum_columns
    }

    pub fn acquire(&mut self, maximum_batch_size: usize) -> Result<()> {
        self.concatenation = vec![0.0; maximum_batch_size * self.number_rows * self.maximum_columns];
        self.acquired = true;

        Ok(())
    }

    pub fn release(&mut self) {
        self.concatenation = Vec::new();
        self.forward = None;
        self.column_counts = Vec::new();
        self.acquired = false;
    }

    /// Returns the device buffer holding the packed batch, uploading it
    /// only if `memory` does not hold `batch_id` yet.
    pub fn forward(
        &mut self,
        batch_id: usize,
        batch: &[usize],
        inputs: &[FloatMatrix],
        memory: &mut InputMemory,
    ) -> Result<wgpu::Buffer> {
        if !self.acquired {
            return Err(EngineError::ResourceState("GpuInputLayer::forward"));
        }

        if memory.get(batch_id).is_none() {
            let column_counts = concatenate_batch(
                batch,
                inputs,
                self.number_rows,
                self.maximum_columns,
                &mut self.concatenation,
            )?;

            let buffer = self
                .context
                .upload_storage_buffer("Batch Input Buffer", &self.concatenation);

            memory.insert(batch_id, CachedBatch::new(buffer, column_counts));
        }

        let cached = memory
            .get(batch_id)
            .expect("the batch was just made resident");

        self.column_counts = cached.column_counts().to_vec();
        self.forward = Some(cached.data().clone());

        Ok(cached.data().clone())
    }

    /// The entry point has no trainable parameters; backward is the
    /// identity and terminates backward propagation.
    pub fn backward(&self, chain: &wgpu::Buffer) -> wgpu::Buffer {
        chain.clone()
    }

    pub fn forward_result(&self) -> Result<&wgpu::Buffer> {
        self.forward
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuInputLayer::forward_result"))
    }

    pub fn column_counts(&self) -> &[usize] {
        &self.column_counts
    }
}
