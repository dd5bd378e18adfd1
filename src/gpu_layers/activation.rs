use wgpu::PipelineCompilationOptions;

use crate::activation::ActivationType;
use crate::error::{EngineError, Result};

use super::context::GpuContext;
use super::{workgroup_count, GpuForwardLayer, ENTRYWISE_WORKGROUP_SIZE};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ActivationDimensions {
    number_entries: u32,
    padding_a: u32,
    padding_b: u32,
    padding_c: u32,
}

#[derive(Debug)]
struct ActivationPipelines {
    forward: wgpu::ComputePipeline,
    backward: wgpu::ComputePipeline,
}

/// Device-resident activation layer for the elementwise functions. Identity
/// is a pure pass-through without kernels. Softmax has no accelerator-path
/// implementation and is rejected at graph-build time.
#[derive(Debug)]
pub struct GpuActivationLayer {
    context: GpuContext,
    function: ActivationType,
    number_rows: usize,
    maximum_columns: usize,
    pipelines: Option<ActivationPipelines>,
    dimensions: Option<wgpu::Buffer>,
    forward: Option<wgpu::Buffer>,
    backward: Option<wgpu::Buffer>,
    number_entries: usize,
    acquired: bool,
}

impl GpuActivationLayer {
    pub fn new(
        context: GpuContext,
        function: ActivationType,
        number_rows: usize,
        maximum_columns: usize,
    ) -> Result<Self> {
        let entry_points = match function {
            ActivationType::Identity => None,
            ActivationType::Sigmoid => Some(("sigmoid_forward_main", "sigmoid_backward_main")),
            ActivationType::Relu => Some(("relu_forward_main", "relu_backward_main")),
            ActivationType::Tanh => Some(("tanh_forward_main", "tanh_backward_main")),
            ActivationType::Softmax => {
                return Err(EngineError::UnsupportedOperation(
                    "softmax has no accelerator-path implementation".into(),
                ))
            }
        };

        let pipelines = entry_points.map(|(forward_entry, backward_entry)| {
            let shader = context
                .device()
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("Activation Shader"),
                    source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!(
                        "activation.wgsl"
                    ))),
                });

            let pipeline = |entry_point: &str| {
                context
                    .device()
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some("Activation Pipeline"),
                        layout: None,
                        module: &shader,
                        entry_point: Some(entry_point),
                        compilation_options: PipelineCompilationOptions::default(),
                        cache: None,
                    })
            };

            ActivationPipelines {
                forward: pipeline(forward_entry),
                backward: pipeline(backward_entry),
            }
        });

        Ok(GpuActivationLayer {
            context,
            function,
            number_rows,
            maximum_columns,
            pipelines,
            dimensions: None,
            forward: None,
            backward: None,
            number_entries: 0,
            acquired: false,
        })
    }

    pub fn function(&self) -> ActivationType {
        self.function
    }

    fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        entries: &[wgpu::BindGroupEntry],
    ) {
        let bind_group = self
            .context
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Activation Bind Group"),
                layout: &pipeline.get_bind_group_layout(0),
                entries,
            });

        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Activation Encoder"),
                });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Activation Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                workgroup_count(self.number_entries as u32, ENTRYWISE_WORKGROUP_SIZE),
                1,
                1,
            );
        }

        self.context.queue().submit(Some(encoder.finish()));
    }
}

impl GpuForwardLayer for GpuActivationLayer {
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
        self.number_entries = maximum_batch_size * self.number_rows * self.maximum_columns;

        if self.pipelines.is_some() {
            let dimensions = ActivationDimensions {
                number_entries: self.number_entries as u32,
                padding_a: 0,
                padding_b: 0,
                padding_c: 0,
            };

            let dimensions_buffer =
                self.context
                    .device()
                    .create_buffer(&wgpu::BufferDescriptor {
                        label: Some("Activation Dimensions Buffer"),
                        size: std::mem::size_of::<ActivationDimensions>() as u64,
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    });
            self.context
                .queue()
                .write_buffer(&dimensions_buffer, 0, bytemuck::bytes_of(&dimensions));

            self.dimensions = Some(dimensions_buffer);
            self.forward = Some(
                self.context
                    .create_storage_buffer("Activation Forward Buffer", self.number_entries),
            );
            self.backward = Some(
                self.context
                    .create_storage_buffer("Activation Backward Buffer", self.number_entries),
            );
        }

        self.acquired = true;

        Ok(())
    }

    fn release(&mut self) {
        self.dimensions = None;
        self.forward = None;
        self.backward = None;
        self.number_entries = 0;
        self.acquired = false;
    }

    fn forward(
        &mut self,
        _batch_size: usize,
        input: &wgpu::Buffer,
        _is_training: bool,
    ) -> Result<()> {
        if !self.acquired {
            return Err(EngineError::ResourceState("GpuActivationLayer::forward"));
        }

        let Some(pipelines) = &self.pipelines else {
            // Identity: the input buffer is the output buffer.
            self.forward = Some(input.clone());
            return Ok(());
        };

        let (Some(dimensions), Some(forward)) = (&self.dimensions, &self.forward) else {
            return Err(EngineError::ResourceState("GpuActivationLayer::forward"));
        };

        self.dispatch(
            &pipelines.forward,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: dimensions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: forward.as_entire_binding(),
                },
            ],
        );

        Ok(())
    }

    fn backward(&mut self, _batch_size: usize, chain: &wgpu::Buffer) -> Result<()> {
        if !self.acquired {
            return Err(EngineError::ResourceState("GpuActivationLayer::backward"));
        }

        let Some(pipelines) = &self.pipelines else {
            self.backward = Some(chain.clone());
            return Ok(());
        };

        let (Some(dimensions), Some(forward), Some(backward)) =
            (&self.dimensions, &self.forward, &self.backward)
        else {
            return Err(EngineError::ResourceState("GpuActivationLayer::backward"));
        };

        self.dispatch(
            &pipelines.backward,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: dimensions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: forward.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: chain.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: backward.as_entire_binding(),
                },
            ],
        );

        Ok(())
    }

    fn forward_result(&self) -> Result<&wgpu::Buffer> {
        self.forward
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuActivationLayer::forward_result"))
    }

    fn backward_result(&self) -> Result<&wgpu::Buffer> {
        self.backward
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuActivationLayer::backward_result"))
    }
}
