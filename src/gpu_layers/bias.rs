use wgpu::PipelineCompilationOptions;

use crate::error::{EngineError, Result};
use crate::initialization::InitializationStrategy;
use crate::layers::Optimizable;
use crate::optimization::OptimizationStrategy;

use super::context::GpuContext;
use super::optimization::GpuUpdateRule;
use super::{workgroup_count, GpuForwardLayer, ENTRYWISE_WORKGROUP_SIZE, WORKGROUP_SIZE};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BiasDimensions {
    number_rows: u32,
    total_columns: u32,
    padding_a: u32,
    padding_b: u32,
}

/// Device-resident bias layer: broadcast add forward, pass-through backward
/// with a column-sum kernel feeding the device accumulator.
#[derive(Debug)]
pub struct GpuBiasLayer {
    context: GpuContext,
    number_rows: usize,
    maximum_columns: usize,
    initial_bias: Vec<f32>,
    forward_pipeline: wgpu::ComputePipeline,
    accumulate_pipeline: wgpu::ComputePipeline,
    dimensions: Option<wgpu::Buffer>,
    bias: Option<wgpu::Buffer>,
    accumulator: Option<wgpu::Buffer>,
    forward: Option<wgpu::Buffer>,
    backward: Option<wgpu::Buffer>,
    update_rule: Option<GpuUpdateRule>,
    accumulation_count: usize,
    total_columns: usize,
}

impl GpuBiasLayer {
    pub fn new(
        context: GpuContext,
        number_rows: usize,
        maximum_columns: usize,
        initialization: &InitializationStrategy,
        optimization: Option<OptimizationStrategy>,
    ) -> Self {
        Self::from_bias(
            context,
            initialization.generate(number_rows, 1),
            maximum_columns,
            optimization,
        )
    }

    pub fn from_bias(
        context: GpuContext,
        initial_bias: Vec<f32>,
        maximum_columns: usize,
        optimization: Option<OptimizationStrategy>,
    ) -> Self {
        let number_rows = initial_bias.len();

        let shader = context
            .device()
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Bias Shader"),
                source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!(
                    "bias.wgsl"
                ))),
            });

        let pipeline = |entry_point: &str| {
            context
                .device()
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("Bias Pipeline"),
                    layout: None,
                    module: &shader,
                    entry_point: Some(entry_point),
                    compilation_options: PipelineCompilationOptions::default(),
                    cache: None,
                })
        };

        let forward_pipeline = pipeline("forward_main");
        let accumulate_pipeline = pipeline("accumulate_main");

        let update_rule =
            optimization.map(|strategy| GpuUpdateRule::new(context.clone(), strategy, number_rows));

        GpuBiasLayer {
            forward_pipeline,
            accumulate_pipeline,
            context,
            number_rows,
            maximum_columns,
            initial_bias,
            dimensions: None,
            bias: None,
            accumulator: None,
            forward: None,
            backward: None,
            update_rule,
            accumulation_count: 0,
            total_columns: 0,
        }
    }

    /// Synchronization point: transfers the current bias back to the host.
    pub fn read_bias(&self) -> Result<Vec<f32>> {
        let bias = self
            .bias
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuBiasLayer::read_bias"))?;

        self.context.read_buffer(bias, self.number_rows)
    }

    pub fn read_accumulator(&self) -> Result<Vec<f32>> {
        let accumulator = self
            .accumulator
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuBiasLayer::read_accumulator"))?;

        self.context.read_buffer(accumulator, self.number_rows)
    }
}

impl GpuForwardLayer for GpuBiasLayer {
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
        self.total_columns = maximum_batch_size * self.maximum_columns;

        let dimensions = BiasDimensions {
            number_rows: self.number_rows as u32,
            total_columns: self.total_columns as u32,
            padding_a: 0,
            padding_b: 0,
        };

        let dimensions_buffer = self
            .context
            .device()
            .create_buffer(&wgpu::BufferDescriptor {
                label: Some("Bias Dimensions Buffer"),
                size: std::mem::size_of::<BiasDimensions>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
        self.context
            .queue()
            .write_buffer(&dimensions_buffer, 0, bytemuck::bytes_of(&dimensions));

        self.dimensions = Some(dimensions_buffer);
        self.bias = Some(
            self.context
                .upload_storage_buffer("Bias Values Buffer", &self.initial_bias),
        );
        self.accumulator = Some(
            self.context
                .create_storage_buffer("Bias Accumulator Buffer", self.number_rows),
        );
        self.forward = Some(
            self.context
                .create_storage_buffer("Bias Forward Buffer", self.number_rows * self.total_columns),
        );

        if let Some(rule) = self.update_rule.as_mut() {
            rule.acquire(maximum_batch_size)?;
        }

        self.accumulation_count = 0;

        Ok(())
    }

    fn release(&mut self) {
        self.dimensions = None;
        self.bias = None;
        self.accumulator = None;
        self.forward = None;
        self.backward = None;

        if let Some(rule) = self.update_rule.as_mut() {
            rule.release();
        }

        self.accumulation_count = 0;
    }

    fn forward(
        &mut self,
        _batch_size: usize,
        input: &wgpu::Buffer,
        _is_training: bool,
    ) -> Result<()> {
        let (Some(dimensions), Some(bias), Some(forward)) =
            (&self.dimensions, &self.bias, &self.forward)
        else {
            return Err(EngineError::ResourceState("GpuBiasLayer::forward"));
        };

        let bind_group = self
            .context
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Bias Forward Bind Group"),
                layout: &self.forward_pipeline.get_bind_group_layout(0),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: dimensions.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: bias.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: input.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: forward.as_entire_binding(),
                    },
                ],
            });

        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Bias Forward Encoder"),
                });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Bias Forward Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.forward_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                workgroup_count(self.total_columns as u32, WORKGROUP_SIZE),
                workgroup_count(self.number_rows as u32, WORKGROUP_SIZE),
                1,
            );
        }

        self.context.queue().submit(Some(encoder.finish()));

        Ok(())
    }

    fn backward(&mut self, _batch_size: usize, chain: &wgpu::Buffer) -> Result<()> {
        let (Some(dimensions), Some(accumulator)) = (&self.dimensions, &self.accumulator) else {
            return Err(EngineError::ResourceState("GpuBiasLayer::backward"));
        };

        let bind_group = self
            .context
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Bias Accumulate Bind Group"),
                layout: &self.accumulate_pipeline.get_bind_group_layout(0),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: dimensions.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: chain.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: accumulator.as_entire_binding(),
                    },
                ],
            });

        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Bias Accumulate Encoder"),
                });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Bias Accumulate Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.accumulate_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                workgroup_count(self.number_rows as u32, ENTRYWISE_WORKGROUP_SIZE),
                1,
                1,
            );
        }

        self.context.queue().submit(Some(encoder.finish()));

        // The gradient passes through unchanged.
        self.backward = Some(chain.clone());
        self.accumulation_count += 1;

        Ok(())
    }

    fn forward_result(&self) -> Result<&wgpu::Buffer> {
        self.forward
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuBiasLayer::forward_result"))
    }

    fn backward_result(&self) -> Result<&wgpu::Buffer> {
        self.backward
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuBiasLayer::backward_result"))
    }

    fn as_optimizable(&mut self) -> Option<&mut dyn Optimizable> {
        self.update_rule.is_some().then_some(self as &mut dyn Optimizable)
    }
}

impl Optimizable for GpuBiasLayer {
    fn optimize(&mut self, scaling_factor: f32) -> Result<()> {
        if self.accumulation_count == 0 {
            return Ok(());
        }

        let (Some(bias), Some(accumulator)) = (&self.bias, &self.accumulator) else {
            return Err(EngineError::ResourceState("GpuBiasLayer::optimize"));
        };

        if let Some(rule) = self.update_rule.as_mut() {
            rule.update(bias, accumulator, scaling_factor)?;
        }

        self.accumulation_count = 0;

        Ok(())
    }
}
