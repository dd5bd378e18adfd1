use crate::activation::ActivationType;
use crate::error::Result;
use crate::initialization::InitializationStrategy;
use crate::optimization::OptimizationStrategy;

use super::{ActivationLayer, ForwardLayer, Optimizable, ProjectionLayer};

/// A projection followed by an activation, the standard fully-connected
/// building block. `optimize` delegates to the projection, the only part
/// holding parameters.
#[derive(Debug)]
pub struct DenseLayer {
    projection: ProjectionLayer,
    activation: ActivationLayer,
}

impl DenseLayer {
    pub fn new(
        number_input_rows: usize,
        maximum_input_columns: usize,
        number_output_rows: usize,
        weight_initialization: &InitializationStrategy,
        bias_initialization: &InitializationStrategy,
        function: ActivationType,
        optimization: Option<OptimizationStrategy>,
    ) -> Self {
        let projection = ProjectionLayer::new(
            number_input_rows,
            maximum_input_columns,
            number_output_rows,
            weight_initialization,
            Some(bias_initialization),
            optimization,
        );
        let activation = ActivationLayer::new(function, number_output_rows, maximum_input_columns);

        DenseLayer {
            projection,
            activation,
        }
    }

    pub fn from_parts(projection: ProjectionLayer, activation: ActivationLayer) -> Self {
        DenseLayer {
            projection,
            activation,
        }
    }
}

impl ForwardLayer for DenseLayer {
    fn number_input_rows(&self) -> usize {
        self.projection.number_input_rows()
    }

    fn maximum_input_columns(&self) -> usize {
        self.projection.maximum_input_columns()
    }

    fn number_output_rows(&self) -> usize {
        self.activation.number_output_rows()
    }

    fn maximum_output_columns(&self) -> usize {
        self.activation.maximum_output_columns()
    }

    fn acquire(&mut self, maximum_batch_size: usize) -> Result<()> {
        self.projection.acquire(maximum_batch_size)?;
        self.activation.acquire(maximum_batch_size)
    }

    fn release(&mut self) {
        self.activation.release();
        self.projection.release();
    }

    fn forward(
        &mut self,
        batch_size: usize,
        column_counts: &[usize],
        input: &[f32],
        is_training: bool,
    ) -> Result<()> {
        self.projection.forward(batch_size, column_counts, input, is_training)?;
        self.activation.forward(
            batch_size,
            self.projection.output_column_counts(),
            self.projection.forward_result(),
            is_training,
        )
    }

    fn backward(&mut self, within_batch: usize, chain: &[f32]) -> Result<()> {
        self.activation.backward(within_batch, chain)?;
        self.projection
            .backward(within_batch, self.activation.backward_result(within_batch))
    }

    fn forward_result(&self) -> &[f32] {
        self.activation.forward_result()
    }

    fn backward_result(&self, within_batch: usize) -> &[f32] {
        self.projection.backward_result(within_batch)
    }

    fn output_column_counts(&self) -> &[usize] {
        self.activation.output_column_counts()
    }

    fn as_optimizable(&mut self) -> Option<&mut dyn Optimizable> {
        Some(self)
    }
}

impl Optimizable for DenseLayer {
    fn optimize(&mut self, scaling_factor: f32) -> Result<()> {
        self.projection.optimize(scaling_factor)
    }
}
