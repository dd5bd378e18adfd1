use ndarray::linalg::general_mat_mul;

use crate::error::{EngineError, Result};
use crate::initialization::InitializationStrategy;
use crate::optimization::{DenseAccumulator, OptimizationStrategy, UpdateRule};

use super::{
    column_view, column_view_mut, matrix_view, matrix_view_mut, BatchBuffer, ForwardLayer,
    Optimizable,
};

/// Applies `W · input` per sample, respecting each sample's actual column
/// count. The backward pass emits the gradient with respect to the input
/// (`Wᵗ · chain`) and accumulates the gradient with respect to the weights
/// (`chain · inputᵗ`) into the layer's accumulator.
#[derive(Debug)]
pub struct WeightingLayer {
    number_input_rows: usize,
    maximum_input_columns: usize,
    number_output_rows: usize,
    /// `number_output_rows × number_input_rows`, row by row.
    weights: Vec<f32>,
    accumulator: DenseAccumulator,
    update_rule: Option<UpdateRule>,
    gradient_scratch: Vec<f32>,
    inputs: BatchBuffer,
    forward: BatchBuffer,
    backward: BatchBuffer,
    column_counts: Vec<usize>,
    acquired: bool,
}

impl WeightingLayer {
    pub fn new(
        number_input_rows: usize,
        maximum_input_columns: usize,
        number_output_rows: usize,
        initialization: &InitializationStrategy,
        optimization: Option<OptimizationStrategy>,
    ) -> Self {
        let weights = initialization.generate(number_output_rows, number_input_rows);

        Self::from_weights(
            weights,
            number_input_rows,
            maximum_input_columns,
            number_output_rows,
            optimization,
        )
    }

    /// Construction from explicit weights, `number_output_rows` rows of
    /// `number_input_rows` values each.
    pub fn from_weights(
        weights: Vec<f32>,
        number_input_rows: usize,
        maximum_input_columns: usize,
        number_output_rows: usize,
        optimization: Option<OptimizationStrategy>,
    ) -> Self {
        let parameter_count = number_output_rows * number_input_rows;
        debug_assert_eq!(weights.len(), parameter_count);

        WeightingLayer {
            number_input_rows,
            maximum_input_columns,
            number_output_rows,
            weights,
            accumulator: DenseAccumulator::new(parameter_count),
            update_rule: optimization.map(|strategy| strategy.build(parameter_count)),
            gradient_scratch: vec![0.0; parameter_count],
            inputs: BatchBuffer::new(number_input_rows, maximum_input_columns),
            forward: BatchBuffer::new(number_output_rows, maximum_input_columns),
            backward: BatchBuffer::new(number_input_rows, maximum_input_columns),
            column_counts: Vec::new(),
            acquired: false,
        }
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn accumulator(&self) -> &DenseAccumulator {
        &self.accumulator
    }
}

impl ForwardLayer for WeightingLayer {
    fn number_input_rows(&self) -> usize {
        self.number_input_rows
    }

    fn maximum_input_columns(&self) -> usize {
        self.maximum_input_columns
    }

    fn number_output_rows(&self) -> usize {
        self.number_output_rows
    }

    fn maximum_output_columns(&self) -> usize {
        self.maximum_input_columns
    }

    fn acquire(&mut self, maximum_batch_size: usize) -> Result<()> {
        self.inputs.allocate(maximum_batch_size);
        self.forward.allocate(maximum_batch_size);
        self.backward.allocate(maximum_batch_size);

        if let Some(rule) = self.update_rule.as_mut() {
            rule.acquire(maximum_batch_size);
        }

        self.acquired = true;

        Ok(())
    }

    fn release(&mut self) {
        self.inputs.release();
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
            return Err(EngineError::ResourceState("WeightingLayer::forward"));
        }

        let input_stride = self.number_input_rows * self.maximum_input_columns;

        for (within_batch, &columns) in column_counts.iter().take(batch_size).enumerate() {
            if columns > self.maximum_input_columns {
                return Err(EngineError::Configuration(format!(
                    "sample with {columns} columns exceeds the layer capacity of {}",
                    self.maximum_input_columns
                )));
            }

            let offset = within_batch * input_stride;
            let sample = &input[offset..offset + self.number_input_rows * columns];
            self.inputs.slot_mut(within_batch, columns).copy_from_slice(sample);

            let weights = matrix_view(self.number_output_rows, self.number_input_rows, &self.weights);
            let input_view = column_view(self.number_input_rows, columns, sample);
            let mut output = column_view_mut(
                self.number_output_rows,
                columns,
                self.forward.slot_mut(within_batch, columns),
            );

            general_mat_mul(1.0, &weights, &input_view, 0.0, &mut output);
        }

        self.column_counts = column_counts[..batch_size].to_vec();

        Ok(())
    }

    fn backward(&mut self, within_batch: usize, chain: &[f32]) -> Result<()> {
        if !self.acquired {
            return Err(EngineError::ResourceState("WeightingLayer::backward"));
        }

        let columns = self.column_counts[within_batch];
        let weights = matrix_view(self.number_output_rows, self.number_input_rows, &self.weights);
        let chain_view = column_view(self.number_output_rows, columns, chain);

        let mut backward = column_view_mut(
            self.number_input_rows,
            columns,
            self.backward.slot_mut(within_batch, columns),
        );
        general_mat_mul(1.0, &weights.t(), &chain_view, 0.0, &mut backward);

        let input_view = column_view(
            self.number_input_rows,
            columns,
            self.inputs.slot(within_batch, columns),
        );
        let mut gradient = matrix_view_mut(
            self.number_output_rows,
            self.number_input_rows,
            &mut self.gradient_scratch,
        );
        general_mat_mul(1.0, &chain_view, &input_view.t(), 0.0, &mut gradient);

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

impl Optimizable for WeightingLayer {
    fn optimize(&mut self, scaling_factor: f32) -> Result<()> {
        if !self.acquired {
            return Err(EngineError::ResourceState("WeightingLayer::optimize"));
        }

        if self.accumulator.count() == 0 {
            return Ok(());
        }

        if let Some(rule) = self.update_rule.as_mut() {
            rule.update(&mut self.weights, scaling_factor, self.accumulator.entries())?;
        }

        self.accumulator.reset();

        Ok(())
    }
}
