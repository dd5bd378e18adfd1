use crate::error::Result;
use crate::initialization::InitializationStrategy;
use crate::optimization::OptimizationStrategy;

use super::{BiasLayer, ForwardLayer, Optimizable, WeightingLayer};

/// An affine transform: a weighting, optionally followed by a bias. The
/// variant is fixed at construction so the hot path dispatches once instead
/// of null-checking a nested layer.
#[derive(Debug)]
pub enum ProjectionLayer {
    Weighting(WeightingLayer),
    WeightingWithBias(WeightingLayer, BiasLayer),
}

impl ProjectionLayer {
    pub fn new(
        number_input_rows: usize,
        maximum_input_columns: usize,
        number_output_rows: usize,
        weight_initialization: &InitializationStrategy,
        bias_initialization: Option<&InitializationStrategy>,
        optimization: Option<OptimizationStrategy>,
    ) -> Self {
        let weighting = WeightingLayer::new(
            number_input_rows,
            maximum_input_columns,
            number_output_rows,
            weight_initialization,
            optimization,
        );

        match bias_initialization {
            None => ProjectionLayer::Weighting(weighting),
            Some(initialization) => {
                let bias = BiasLayer::new(
                    number_output_rows,
                    maximum_input_columns,
                    initialization,
                    optimization,
                );

                ProjectionLayer::WeightingWithBias(weighting, bias)
            }
        }
    }

    pub fn from_parts(weighting: WeightingLayer, bias: Option<BiasLayer>) -> Self {
        match bias {
            None => ProjectionLayer::Weighting(weighting),
            Some(bias) => ProjectionLayer::WeightingWithBias(weighting, bias),
        }
    }

    fn weighting(&self) -> &WeightingLayer {
        match self {
            ProjectionLayer::Weighting(weighting)
            | ProjectionLayer::WeightingWithBias(weighting, _) => weighting,
        }
    }
}

impl ForwardLayer for ProjectionLayer {
    fn number_input_rows(&self) -> usize {
        self.weighting().number_input_rows()
    }

    fn maximum_input_columns(&self) -> usize {
        self.weighting().maximum_input_columns()
    }

    fn number_output_rows(&self) -> usize {
        self.weighting().number_output_rows()
    }

    fn maximum_output_columns(&self) -> usize {
        self.weighting().maximum_output_columns()
    }

    fn acquire(&mut self, maximum_batch_size: usize) -> Result<()> {
        match self {
            ProjectionLayer::Weighting(weighting) => weighting.acquire(maximum_batch_size),
            ProjectionLayer::WeightingWithBias(weighting, bias) => {
                weighting.acquire(maximum_batch_size)?;
                bias.acquire(maximum_batch_size)
            }
        }
    }

    fn release(&mut self) {
        match self {
            ProjectionLayer::Weighting(weighting) => weighting.release(),
            ProjectionLayer::WeightingWithBias(weighting, bias) => {
                bias.release();
                weighting.release();
            }
        }
    }

    fn forward(
        &mut self,
        batch_size: usize,
        column_counts: &[usize],
        input: &[f32],
        is_training: bool,
    ) -> Result<()> {
        match self {
            ProjectionLayer::Weighting(weighting) => {
                weighting.forward(batch_size, column_counts, input, is_training)
            }
            ProjectionLayer::WeightingWithBias(weighting, bias) => {
                weighting.forward(batch_size, column_counts, input, is_training)?;
                bias.forward(
                    batch_size,
                    weighting.output_column_counts(),
                    weighting.forward_result(),
                    is_training,
                )
            }
        }
    }

    fn backward(&mut self, within_batch: usize, chain: &[f32]) -> Result<()> {
        // The bias hands the chain through unchanged, so the weighting
        // consumes the same gradient the bias accumulates from.
        match self {
            ProjectionLayer::Weighting(weighting) => weighting.backward(within_batch, chain),
            ProjectionLayer::WeightingWithBias(weighting, bias) => {
                bias.backward(within_batch, chain)?;
                weighting.backward(within_batch, chain)
            }
        }
    }

    fn forward_result(&self) -> &[f32] {
        match self {
            ProjectionLayer::Weighting(weighting) => weighting.forward_result(),
            ProjectionLayer::WeightingWithBias(_, bias) => bias.forward_result(),
        }
    }

    fn backward_result(&self, within_batch: usize) -> &[f32] {
        self.weighting().backward_result(within_batch)
    }

    fn output_column_counts(&self) -> &[usize] {
        self.weighting().output_column_counts()
    }

    fn as_optimizable(&mut self) -> Option<&mut dyn Optimizable> {
        Some(self)
    }
}

impl Optimizable for ProjectionLayer {
    fn optimize(&mut self, scaling_factor: f32) -> Result<()> {
        match self {
            ProjectionLayer::Weighting(weighting) => weighting.optimize(scaling_factor),
            ProjectionLayer::WeightingWithBias(weighting, bias) => {
                weighting.optimize(scaling_factor)?;
                bias.optimize(scaling_factor)
            }
        }
    }
}
