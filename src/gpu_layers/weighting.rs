use wgpu::PipelineCompilationOptions;

use crate::error::{EngineError, Result};
use crate::initialization::InitializationStrategy;
use crate::layers::Optimizable;
use crate::optimization::OptimizationStrategy;

use super::context::GpuContext;
use super::optimization::GpuUpdateRule;
use super::{workgroup_count, GpuForwardLayer, WORKGROUP_SIZE};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct WeightingDimensions {
    input_rows: u32,
    output_rows: u32,
    total_columns: u32,
    padding: u32,
}

/// Device-resident weighting layer. The weight buffer lives on the device
/// for the whole acquisition span; forward and backward enqueue matrix
/// kernels over the packed batch, and the weight-gradient kernel adds into
/// a device accumulator consumed by `optimize`.
#[derive(Debug)]
pub struct GpuWeightingLayer {
    context: GpuContext,
    number_input_rows: usize,
    maximum_input_columns: usize,
    number_output_rows: usize,
    initial_weights: Vec<f32>,
    forward_pipeline: wgpu::ComputePipeline,
    backward_input_pipeline: wgpu::ComputePipeline,
    accumulate_pipeline: wgpu::ComputePipeline,
    dimensions: Option<wgpu::Buffer>,
    weights: Option<wgpu::Buffer>,
    accumulator: Option<wgpu::Buffer>,
    forward: Option<wgpu::Buffer>,
    backward: Option<wgpu::Buffer>,
    batch_input: Option<wgpu::Buffer>,
    update_rule: Option<GpuUpdateRule>,
    accumulation_count: usize,
    total_columns: usize,
}

impl GpuWeightingLayer {
    pub fn new(
        context: GpuContext,
        number_input_rows: usize,
        maximum_input_columns: usize,
        number_output_rows: usize,
        initialization: &InitializationStrategy,
        optimization: Option<OptimizationStrategy>,
    ) -> Self {
        let initial_weights = initialization.generate(number_output_rows, number_input_rows);

        Self::from_weights(
            context,
            initial_weights,
            number_input_rows,
            maximum_input_columns,
            number_output_rows,
            optimization,
        )
    }

    pub fn from_weights(
        context: GpuContext,
        initial_weights: Vec<f32>,
        number_input_rows: usize,
        maximum_input_columns: usize,
        number_output_rows: usize,
        optimization: Option<OptimizationStrategy>,
    ) -> Self {
        let shader = context
            .device()
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Weighting Shader"),
                source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!(
                    "weighting.wgsl"
                ))),
            });

        let pipeline = |entry_point: &str| {
            context
                .device()
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("Weighting Pipeline"),
                    layout: None,
                    module: &shader,
                    entry_point: Some(entry_point),
                    compilation_options: PipelineCompilationOptions::default(),
                    cache: None,
                })
        };

        let forward_pipeline = pipeline("forward_main");
        let backward_input_pipeline = pipeline("backward_input_main");
        let accumulate_pipeline = pipeline("accumulate_main");

        let parameter_count = number_output_rows * number_input_rows;
        let update_rule =
            optimization.map(|strategy| GpuUpdateRule::new(context.clone(), strategy, parameter_count));

        GpuWeightingLayer {
            forward_pipeline,
            backward_input_pipeline,
            accumulate_pipeline,
            context,
            number_input_rows,
            maximum_input_columns,
            number_output_rows,
            initial_weights,
            dimensions: None,
            weights: None,
            accumulator: None,
            forward: None,
            backward: None,
            batch_input: None,
            update_rule,
            accumulation_count: 0,
            total_columns: 0,
        }
    }

    /// Synchronization point: transfers the current weights back to the host.
    pub fn read_weights(&self) -> Result<Vec<f32>> {
        let weights = self
            .weights
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuWeightingLayer::read_weights"))?;

        self.context
            .read_buffer(weights, self.number_output_rows * self.number_input_rows)
    }

    pub fn read_accumulator(&self) -> Result<Vec<f32>> {
        let accumulator = self.accumulator.as_ref().ok_or(EngineError::ResourceState(
            "GpuWeightingLayer::read_accumulator",
        ))?;

        self.context
            .read_buffer(accumulator, self.number_output_rows * self.number_input_rows)
    }

    fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        entries: &[wgpu::BindGroupEntry],
        work_columns: u32,
        work_rows: u32,
    ) {
        let bind_group = self
            .context
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Weighting Bind Group"),
                layout: &pipeline.get_bind_group_layout(0),
                entries,
            });

        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Weighting Encoder"),
                });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Weighting Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                workgroup_count(work_columns, WORKGROUP_SIZE),
                workgroup_count(work_rows, WORKGROUP_SIZE),
                1,
            );
        }

        self.context.queue().submit(Some(encoder.finish()));
    }
}

impl GpuForwardLayer for GpuWeightingLayer {
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
        self.total_columns = maximum_batch_size * self.maximum_input_columns;

        let dimensions = WeightingDimensions {
            input_rows: self.number_input_rows as u32,
            output_rows: self.number_output_rows as u32,
            total_columns: self.total_columns as u32,
            padding: 0,
        };

        let dimensions_buffer =
            self.context
                .device()
                .create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Weighting Dimensions Buffer"),
                    size: std::mem::size_of::<WeightingDimensions>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
        self.context
            .queue()
            .write_buffer(&dimensions_buffer, 0, bytemuck::bytes_of(&dimensions));

        let parameter_count = self.number_output_rows * self.number_input_rows;

        self.dimensions = Some(dimensions_buffer);
        self.weights = Some(
            self.context
                .upload_storage_buffer("Weighting Weights Buffer", &self.initial_weights),
        );
        self.accumulator = Some(
            self.context
                .create_storage_buffer("Weighting Accumulator Buffer", parameter_count),
        );
        self.forward = Some(self.context.create_storage_buffer(
            "Weighting Forward Buffer",
            self.number_output_rows * self.total_columns,
        ));
        self.backward = Some(self.context.create_storage_buffer(
            "Weighting Backward Buffer",
            self.number_input_rows * self.total_columns,
        ));

        if let Some(rule) = self.update_rule.as_mut() {
            rule.acquire(maximum_batch_size)?;
        }

        self.accumulation_count = 0;

        Ok(())
    }

    fn release(&mut self) {
        self.dimensions = None;
        self.weights = None;
        self.accumulator = None;
        self.forward = None;
        self.backward = None;
        self.batch_input = None;

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
        let (Some(dimensions), Some(weights), Some(forward)) =
            (&self.dimensions, &self.weights, &self.forward)
        else {
            return Err(EngineError::ResourceState("GpuWeightingLayer::forward"));
        };

        self.dispatch(
            &self.forward_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: dimensions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: weights.as_entire_binding(),
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
            self.total_columns as u32,
            self.number_output_rows as u32,
        );

        self.batch_input = Some(input.clone());

        Ok(())
    }

    fn backward(&mut self, _batch_size: usize, chain: &wgpu::Buffer) -> Result<()> {
        let (Some(dimensions), Some(weights), Some(backward), Some(accumulator), Some(batch_input)) = (
            &self.dimensions,
            &self.weights,
            &self.backward,
            &self.accumulator,
            &self.batch_input,
        ) else {
            return Err(EngineError::ResourceState("GpuWeightingLayer::backward"));
        };

        self.dispatch(
            &self.backward_input_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: dimensions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: weights.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: chain.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: backward.as_entire_binding(),
                },
            ],
            self.total_columns as u32,
            self.number_input_rows as u32,
        );

        self.dispatch(
            &self.accumulate_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: dimensions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: batch_input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: chain.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: accumulator.as_entire_binding(),
                },
            ],
            self.number_input_rows as u32,
            self.number_output_rows as u32,
        );

        self.accumulation_count += 1;

        Ok(())
    }

    fn forward_result(&self) -> Result<&wgpu::Buffer> {
        self.forward
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuWeightingLayer::forward_result"))
    }

    fn backward_result(&self) -> Result<&wgpu::Buffer> {
        self.backward
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuWeightingLayer::backward_result"))
    }

    fn as_optimizable(&mut self) -> Option<&mut dyn Optimizable> {
        self.update_rule.is_some().then_some(self as &mut dyn Optimizable)
    }
}

impl Optimizable for GpuWeightingLayer {
    fn optimize(&mut self, scaling_factor: f32) -> Result<()> {
        if self.accumulation_count == 0 {
            return Ok(());
        }

        let (Some(weights), Some(accumulator)) = (&self.weights, &self.accumulator) else {
            return Err(EngineError::ResourceState("GpuWeightingLayer::optimize"));
        };

        if let Some(rule) = self.update_rule.as_mut() {
            rule.update(weights, accumulator, scaling_factor)?;
        }

        self.accumulation_count = 0;

        Ok(())
    }
}
