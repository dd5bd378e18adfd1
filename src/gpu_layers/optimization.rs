use wgpu::PipelineCompilationOptions;

use crate::error::{EngineError, Result};
use crate::optimization::OptimizationStrategy;

use super::context::GpuContext;
use super::{workgroup_count, ENTRYWISE_WORKGROUP_SIZE};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct UpdateParameters {
    parameter_count: u32,
    learning_rate: f32,
    momentum: f32,
    scaling_factor: f32,
}

/// Device-side update rule. Consumes a device accumulator and mutates a
/// device parameter buffer in place; the kernel zeroes the accumulator in
/// the same launch. Momentum keeps its per-parameter history on the device,
/// allocated at acquisition time.
#[derive(Debug)]
pub struct GpuUpdateRule {
    context: GpuContext,
    strategy: OptimizationStrategy,
    parameter_count: usize,
    pipeline: wgpu::ComputePipeline,
    parameters: Option<wgpu::Buffer>,
    history: Option<wgpu::Buffer>,
}

impl GpuUpdateRule {
    pub fn new(
        context: GpuContext,
        strategy: OptimizationStrategy,
        parameter_count: usize,
    ) -> Self {
        let shader = context
            .device()
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Update Shader"),
                source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!(
                    "update.wgsl"
                ))),
            });

        let entry_point = match strategy {
            OptimizationStrategy::GradientDescent { .. } => "gradient_descent_main",
            OptimizationStrategy::Momentum { .. } => "momentum_main",
        };

        let pipeline = context
            .device()
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Update Pipeline"),
                layout: None,
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: PipelineCompilationOptions::default(),
                cache: None,
            });

        GpuUpdateRule {
            context,
            strategy,
            parameter_count,
            pipeline,
            parameters: None,
            history: None,
        }
    }

    pub fn acquire(&mut self, _maximum_batch_size: usize) -> Result<()> {
        let parameters = self
            .context
            .device()
            .create_buffer(&wgpu::BufferDescriptor {
                label: Some("Update Parameters Buffer"),
                size: std::mem::size_of::<UpdateParameters>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

        self.parameters = Some(parameters);

        if let OptimizationStrategy::Momentum { .. } = self.strategy {
            self.history = Some(
                self.context
                    .create_storage_buffer("Update History Buffer", self.parameter_count),
            );
        }

        Ok(())
    }

    pub fn release(&mut self) {
        self.parameters = None;
        self.history = None;
    }

    pub fn update(
        &mut self,
        values: &wgpu::Buffer,
        gradient: &wgpu::Buffer,
        scaling_factor: f32,
    ) -> Result<()> {
        let parameters = self
            .parameters
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuUpdateRule::update"))?;

        let (learning_rate, momentum) = match self.strategy {
            OptimizationStrategy::GradientDescent { learning_rate } => (learning_rate, 0.0),
            OptimizationStrategy::Momentum {
                learning_rate,
                momentum,
            } => (learning_rate, momentum),
        };

        self.context.queue().write_buffer(
            parameters,
            0,
            bytemuck::bytes_of(&UpdateParameters {
                parameter_count: self.parameter_count as u32,
                learning_rate,
                momentum,
                scaling_factor,
            }),
        );

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: parameters.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: values.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: gradient.as_entire_binding(),
            },
        ];

        if let Some(history) = self.history.as_ref() {
            entries.push(wgpu::BindGroupEntry {
                binding: 3,
                resource: history.as_entire_binding(),
            });
        }

        let bind_group = self
            .context
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Update Bind Group"),
                layout: &self.pipeline.get_bind_group_layout(0),
                entries: &entries,
            });

        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Update Encoder"),
                });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Update Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                workgroup_count(self.parameter_count as u32, ENTRYWISE_WORKGROUP_SIZE),
                1,
                1,
            );
        }

        self.context.queue().submit(Some(encoder.finish()));

        Ok(())
    }
}
