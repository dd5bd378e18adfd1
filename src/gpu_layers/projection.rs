use crate::error::Result;
use crate::initialization::InitializationStrategy;
use crate::layers::Optimizable;
use crate::optimization::OptimizationStrategy;

use super::bias::GpuBiasLayer;
use super::context::GpuContext;
use super::weighting::GpuWeightingLayer;
use super::GpuForwardLayer;

/// Device-side affine transform, the same tagged variant as the host
/// projection: a weighting, optionally followed by a bias.
#[derive(Debug)]
pub enum GpuProjectionLayer {
    Weighting(GpuWeightingLayer),
    WeightingWithBias(GpuWeightingLayer, GpuBiasLayer),
}

impl GpuProjectionLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: GpuContext,
        number_input_rows: usize,
        maximum_input_columns: usize,
        number_output_rows: usize,
        weight_initialization: &InitializationStrategy,
        bias_initialization: Option<&InitializationStrategy>,
        optimization: Option<OptimizationStrategy>,
    ) -> Self {
        let weighting = GpuWeightingLayer::new(
            context.clone(),
            number_input_rows,
            maximum_input_columns,
            number_output_rows,
            weight_initialization,
            optimization,
        );

        match bias_initialization {
            None => GpuProjectionLayer::Weighting(weighting),
            Some(initialization) => {
                let bias = GpuBiasLayer::new(
                    context,
                    number_output_rows,
                    maximum_input_columns,
                    initialization,
                    optimization,
                );

                GpuProjectionLayer::WeightingWithBias(weighting, bias)
            }
        }
    }

    pub fn from_parts(weighting: GpuWeightingLayer, bias: Option<GpuBiasLayer>) -> Self {
        match bias {
            None => GpuProjectionLayer::Weighting(weighting),
            Some(bias) => GpuProjectionLayer::WeightingWithBias(weighting, bias),
        }
    }

    fn weighting(&self) -> &GpuWeightingLayer {
        match self {
            GpuProjectionLayer::Weighting(weighting)
            | GpuProjectionLayer::WeightingWithBias(weighting, _) => weighting,
        }
    }
}

impl GpuForwardLayer for GpuProjectionLayer {
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
            GpuProjectionLayer::Weighting(weighting) => weighting.acquire(maximum_batch_size),
            GpuProjectionLayer::WeightingWithBias(weighting, bias) => {
                weighting.acquire(maximum_batch_size)?;
                bias.acquire(maximum_batch_size)
            }
        }
    }

    fn release(&mut self) {
        match self {
            GpuProjectionLayer::Weighting(weighting) => weighting.release(),
            GpuProjectionLayer::WeightingWithBias(weighting, bias) => {
                bias.release();
                weighting.release();
            }
        }
    }

    fn forward(
        &mut self,
        batch_size: usize,
        input: &wgpu::Buffer,
        is_training: bool,
    ) -> Result<()> {
        match self {
            GpuProjectionLayer::Weighting(weighting) => {
                weighting.forward(batch_size, input, is_training)
            }
            GpuProjectionLayer::WeightingWithBias(weighting, bias) => {
                weighting.forward(batch_size, input, is_training)?;
                let weighted = weighting.forward_result()?.clone();
                bias.forward(batch_size, &weighted, is_training)
            }
        }
    }

    fn backward(&mut self, batch_size: usize, chain: &wgpu::Buffer) -> Result<()> {
        // The bias hands the chain through unchanged, so the weighting
        // consumes the same gradient the bias accumulates from.
        match self {
            GpuProjectionLayer::Weighting(weighting) => weighting.backward(batch_size, chain),
            GpuProjectionLayer::WeightingWithBias(weighting, bias) => {
                bias.backward(batch_size, chain)?;
                weighting.backward(batch_size, chain)
            }
        }
    }

    fn forward_result(&self) -> Result<&wgpu::Buffer> {
        match self {
            GpuProjectionLayer::Weighting(weighting) => weighting.forward_result(),
            GpuProjectionLayer::WeightingWithBias(_, bias) => bias.forward_result(),
        }
    }

    fn backward_result(&self) -> Result<&wgpu::Buffer> {
        self.weighting().backward_result()
    }

    fn as_optimizable(&mut self) -> Option<&mut dyn Optimizable> {
        Some(self)
    }
}

impl Optimizable for GpuProjectionLayer {
    fn optimize(&mut self, scaling_factor: f32) -> Result<()> {
        match self {
            GpuProjectionLayer::Weighting(weighting) => weighting.optimize(scaling_factor),
            GpuProjectionLayer::WeightingWithBias(weighting, bias) => {
                weighting.optimize(scaling_factor)?;
                bias.optimize(scaling_factor)
            }
        }
    }
}
