use crate::error::{EngineError, Result};
use crate::initialization::InitializationStrategy;
use crate::optimization::{DenseAccumulator, OptimizationStrategy, UpdateRule};

use super::{BatchBuffer, ForwardLayer, Optimizable};

/// Adds a column vector to every column of the input. The backward pass
/// hands the incoming gradient through unchanged and accumulates its
/// column-wise sum into the layer's accumulator.
#[derive(Debug)]
pub struct BiasLayer {
    number_rows: usize,
    maximum_columns: usize,
    bias: Vec<f32>,
    accumulator: DenseAccumulator,
    update_rule: Option<UpdateRule>,
    gradient_scratch: Vec<f32>,
    forward: BatchBuffer,
    backward: BatchBuffer,
    column_counts: Vec<usize>,
    acquired: bool,
}

impl BiasLayer {
    pub fn new(
        number_rows: usize,
        maximum_columns: usize,
        initialization: &InitializationStrategy,
        optimization: Option<OptimizationStrategy>,
    ) -> Self {
        Self::from_bias(
            initialization.generate(number_rows, 1),
            maximum_columns,
            optimization,
        )
    }

    pub fn from_bias(
        bias: Vec<f32>,
        maximum_columns: usize,
        optimization: Option<OptimizationStrategy>,
    ) -> Self {
        let number_rows = bias.len();

        BiasLayer {
            number_rows,
            maximum_columns,
            bias,
            accumulator: DenseAccumulator::new(number_rows),
            update_rule: optimization.map(|strategy| strategy.build(number_rows)),
            gradient_scratch: vec![0.0; number_rows],
            forward: BatchBuffer::new(number_rows, maximum_columns),
            backward: BatchBuffer::new(number_rows, maximum_columns),
            column_counts: Vec::new(),
            acquired: false,
        }
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    pub fn accumulator(&self) -> &DenseAccumulator {
        &self.accumulator
    }
}

impl ForwardLayer for BiasLayer {
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
        self.forward.allocate(maximum_batch_size);
        self.backward.allocate(maximum_batch_size);

        if let Some(rule) = self.update_rule.as_mut() {
            rule.acquire(maximum_batch_size);
        }

        self.acquired = true;

        Ok(())
    }

    fn release(&mut self) {
        self.forward.release();
        self.backward.release();

        if let Some(rule) = self.update_rule.as_mut() {
            rule.release();
        }

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
            return Err(EngineError::ResourceState("BiasLayer::forward"));
        }

        let stride = self.number_rows * self.maximum_columns;

        for (within_batch, &columns) in column_counts.iter().take(batch_size).enumerate() {
            let offset = within_batch * stride;
            let sample = &input[offset..offset + self.number_rows * columns];
            let output = self.forward.slot_mut(within_batch, columns);

            for column in 0..columns {
                for row in 0..self.number_rows {
                    let index = column * self.number_rows + row;
                    output[index] = sample[index] + self.bias[row];
                }
            }
        }

        self.column_counts = column_counts[..batch_size].to_vec();

        Ok(())
    }

    fn backward(&mut self, within_batch: usize, chain: &[f32]) -> Result<()> {
        if !self.acquired {
            return Err(EngineError::ResourceState("BiasLayer::backward"));
        }

        let columns = self.column_counts[within_batch];

        self.backward
            .slot_mut(within_batch, columns)
            .copy_from_slice(chain);

        self.gradient_scratch.fill(0.0);
        for column in 0..columns {
            for row in 0..self.number_rows {
                self.gradient_scratch[row] += chain[column * self.number_rows + row];
            }
        }

        self.accumulator.accumulate(&self.gradient_scratch);

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

    fn as_optimizable(&mut self) -> Option<&mut dyn Optimizable> {
        self.update_rule.is_some().then_some(self as &mut dyn Optimizable)
    }
}

impl Optimizable for BiasLayer {
    fn optimize(&mut self, scaling_factor: f32) -> Result<()> {
        if !self.acquired {
            return Err(EngineError::ResourceState("BiasLayer::optimize"));
        }

        if self.accumulator.count() == 0 {
            return Ok(());
        }

        if let Some(rule) = self.update_rule.as_mut() {
            rule.update(&mut self.bias, scaling_factor, self.accumulator.entries())?;
        }

        self.accumulator.reset();

        Ok(())
    }
}
