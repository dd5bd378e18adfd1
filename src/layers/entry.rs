use crate::error::{EngineError, Result};
use crate::matrix::{concatenate_batch, FloatMatrix};

use super::BatchBuffer;

/// The graph's source node. Consumes the raw per-sample inputs for one batch
/// and repacks them into a single buffer: each sample's real columns are
/// copied contiguously into a fixed-capacity slot, with per-sample column
/// counts tracked separately.
#[derive(Debug)]
pub struct InputLayer {
    number_rows: usize,
    maximum_columns: usize,
    forward: BatchBuffer,
    column_counts: Vec<usize>,
    acquired: bool,
}

impl InputLayer {
    pub fn new(number_rows: usize, maximum_columns: usize) -> Self {
        InputLayer {
            number_rows,
            maximum_columns,
            forward: BatchBuffer::new(number_rows, maximum_columns),
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
        self.forward.allocate(maximum_batch_size);
        self.acquired = true;

        Ok(())
    }

    pub fn release(&mut self) {
        self.forward.release();
        self.column_counts = Vec::new();
        self.acquired = false;
    }

    pub fn forward(&mut self, batch: &[usize], inputs: &[FloatMatrix]) -> Result<()> {
        if !self.acquired {
            return Err(EngineError::ResourceState("InputLayer::forward"));
        }

        self.column_counts = concatenate_batch(
            batch,
            inputs,
            self.number_rows,
            self.maximum_columns,
            self.forward.entries_mut(),
        )?;

        Ok(())
    }

    /// The entry point has no trainable parameters; its backward is the
    /// identity and terminates backward propagation.
    pub fn backward<'a>(&self, chain: &'a [f32]) -> &'a [f32] {
        chain
    }

    pub fn forward_result(&self) -> &[f32] {
        self.forward.entries()
    }

    pub fn column_counts(&self) -> &[usize] {
        &self.column_counts
    }
}
