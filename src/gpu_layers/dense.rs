use crate::activation::ActivationType;
use crate::error::Result;
use crate::initialization::InitializationStrategy;
use crate::layers::Optimizable;
use crate::optimization::OptimizationStrategy;

use super::activation::GpuActivationLayer;
use super::context::GpuContext;
use super::projection::GpuProjectionLayer;
use super::GpuForwardLayer;

/// Device-side fully-connected block: projection followed by an activation.
/// Construction fails for activations without an accelerator-path
/// implementation.
#[derive(Debug)]
pub struct GpuDenseLayer {
    projection: GpuProjectionLayer,
    activation: GpuActivationLayer,
}

impl GpuDenseLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: GpuContext,
        number_input_rows: usize,
        maximum_input_columns: usize,
        number_output_rows: usize,
        weight_initialization: &InitializationStrategy,
        bias_initialization: &InitializationStrategy,
        function: ActivationType,
        optimization: Option<OptimizationStrategy>,
    ) -> Result<Self> {
        let activation = GpuActivationLayer::new(
            context.clone(),
            function,
            number_output_rows,
            maximum_input_columns,
        )?;

        let projection = GpuProjectionLayer::new(
            context,
            number_input_rows,
            maximum_input_columns,
            number_output_rows,
            weight_initialization,
            Some(bias_initialization),
            optimization,
        );

        Ok(GpuDenseLayer {
            projection,
            activation,
        })
    }

    pub fn from_parts(projection: GpuProjectionLayer, activation: GpuActivationLayer) -> Self {
        GpuDenseLayer {
            projection,
            activation,
        }
    }
}

impl GpuForwardLayer for GpuDenseLayer {
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
        input: &wgpu::Buffer,
        is_training: bool,
    ) -> Result<()> {
        self.projection.forward(batch_size, input, is_training)?;

        let projected = self.projection.forward_result()?.clone();
        self.activation.forward(batch_size, &projected, is_training)
    }

    fn backward(&mut self, batch_size: usize, chain: &wgpu::Buffer) -> Result<()> {
        self.activation.backward(batch_size, chain)?;

        let chain = self.activation.backward_result()?.clone();
        self.projection.backward(batch_size, &chain)
    }

    fn forward_result(&self) -> Result<&wgpu::Buffer> {
        self.activation.forward_result()
    }

    fn backward_result(&self) -> Result<&wgpu::Buffer> {
        self.projection.backward_result()
    }

    fn as_optimizable(&mut self) -> Option<&mut dyn Optimizable> {
        Some(self)
    }
}

impl Optimizable for GpuDenseLayer {
    fn optimize(&mut self, scaling_factor: f32) -> Result<()> {
        self.projection.optimize(scaling_factor)
    }
}
