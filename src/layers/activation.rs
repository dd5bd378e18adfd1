use crate::activation::{softmax_backward_column, softmax_column, ActivationType};
use crate::error::{EngineError, Result};

use super::{BatchBuffer, ForwardLayer};

/// Applies a pluggable activation function column by column. Elementwise
/// functions differentiate against the cached preactivation; softmax
/// differentiates against its own output.
#[derive(Debug)]
pub struct ActivationLayer {
    function: ActivationType,
    number_rows: usize,
    maximum_columns: usize,
    inputs: BatchBuffer,
    forward: BatchBuffer,
    backward: BatchBuffer,
    column_counts: Vec<usize>,
    acquired: bool,
}

impl ActivationLayer {
    pub fn new(function: ActivationType, number_rows: usize, maximum_columns: usize) -> Self {
        ActivationLayer {
            function,
            number_rows,
            maximum_columns,
            inputs: BatchBuffer::new(number_rows, maximum_columns),
            forward: BatchBuffer::new(number_rows, maximum_columns),
            backward: BatchBuffer::new(number_rows, maximum_columns),
            column_counts: Vec::new(),
            acquired: false,
        }
    }

    pub fn function(&self) -> ActivationType {
        self.function
    }
}

impl ForwardLayer for ActivationLayer {
    fn number_input_rows(&self) -> usize {
        self.number_rows
    }

    fn maximum_input_columns(&self) -> usize {
        self.maximum_columns
    }

    fn number_output_rows(&self) -> usize {
        self.number_rows
    }

    fn maximum_output_columns(&self) -> usize {
        self.maximum_columns
    }

    fn acquire(&mut self, maximum_batch_size: usize) -> Result<()> {
        self.inputs.allocate(maximum_batch_size);
        self.forward.allocate(maximum_batch_size);
        self.backward.allocate(maximum_batch_size);
        self.acquired = true;

        Ok(())
    }

    fn release(&mut self) {
        self.inputs.release();
        self.forward.release();
        self.backward.release();
        self.acquired = false;
    }

    fn forward(
        &mut self,
        batch_size: usize,
        column_counts: &[usize],
        input: &[f32],
        _is_training: bool,
    ) -> Result<()> {
        if !self.acquired {
            return Err(EngineError::ResourceState("ActivationLayer::forward"));
        }

        let rows = self.number_rows;
        let stride = rows * self.maximum_columns;

        for (within_batch, &columns) in column_counts.iter().take(batch_size).enumerate() {
            let offset = within_batch * stride;
            let sample = &input[offset..offset + rows * columns];

            self.inputs.slot_mut(within_batch, columns).copy_from_slice(sample);

            let output = self.forward.slot_mut(within_batch, columns);

            if self.function.is_elementwise() {
                for (out, &value) in output.iter_mut().zip(sample) {
                    *out = self.function.apply(value);
                }
            } else {
                for column in 0..columns {
                    let range = column * rows..(column + 1) * rows;
                    softmax_column(&sample[range.clone()], &mut output[range]);
                }
            }
        }

        self.column_counts = column_counts[..batch_size].to_vec();

        Ok(())
    }

    fn backward(&mut self, within_batch: usize, chain: &[f32]) -> Result<()> {
        if !self.acquired {
            return Err(EngineError::ResourceState("ActivationLayer::backward"));
        }

        let rows = self.number_rows;
        let columns = self.column_counts[within_batch];

        if self.function.is_elementwise() {
            let preactivation = self.inputs.slot(within_batch, columns);
            let backward = self.backward.slot_mut(within_batch, columns);

            for ((out, &value), &c) in backward.iter_mut().zip(preactivation).zip(chain) {
                *out = c * self.function.derivative(value);
            }
        } else {
            let output = self.forward.slot(within_batch, columns);
            let backward = self.backward.slot_mut(within_batch, columns);

            for column in 0..columns {
                let range = column * rows..(column + 1) * rows;
                softmax_backward_column(&output[range.clone()], &chain[range.clone()], &mut backward[range]);
            }
        }

        Ok(())
    }

    fn forward_result(&self) -> &[f32] {
        self.forward.entries()
    }

    fn backward_result(&self, within_batch: usize) -> &[f32] {
        self.backward.slot(within_batch, self.column_counts[within_batch])
    }

    fn output_column_counts(&self) -> &[usize] {
        &self.column_counts
    }
}
