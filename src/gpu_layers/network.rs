use crate::error::{EngineError, Result};
use crate::loss::LossFunction;
use crate::matrix::FloatMatrix;
use crate::workflow::{argmax, partition};

use super::context::GpuContext;
use super::entry::GpuInputLayer;
use super::memory::InputMemory;
use super::GpuForwardLayer;

/// The accelerator-path forward/backward pair. Forward hands each layer the
/// previous layer's device buffer; backward walks the reverse chain and
/// finishes with the entry point's identity backward. Everything here only
/// enqueues kernels; the queue's ordering carries the data dependencies.
pub struct GpuPropagator {
    entry: GpuInputLayer,
    layers: Vec<Box<dyn GpuForwardLayer>>,
}

impl GpuPropagator {
    pub fn new(entry: GpuInputLayer, layers: Vec<Box<dyn GpuForwardLayer>>) -> Result<Self> {
        let mut rows = entry.number_rows();
        let mut columns = entry.maximum_columns();

        for (index, layer) in layers.iter().enumerate() {
            if layer.number_input_rows() != rows || layer.maximum_input_columns() != columns {
                return Err(EngineError::Configuration(format!(
                    "layer {index} expects {}x{} input but receives {rows}x{columns}",
                    layer.number_input_rows(),
                    layer.maximum_input_columns()
                )));
            }

            rows = layer.number_output_rows();
            columns = layer.maximum_output_columns();
        }

        Ok(GpuPropagator { entry, layers })
    }

    pub fn forward(
        &mut self,
        batch_id: usize,
        batch: &[usize],
        inputs: &[FloatMatrix],
        memory: &mut InputMemory,
        is_training: bool,
    ) -> Result<()> {
        let mut current = self.entry.forward(batch_id, batch, inputs, memory)?;

        for layer in self.layers.iter_mut() {
            layer.forward(batch.len(), &current, is_training)?;
            current = layer.forward_result()?.clone();
        }

        Ok(())
    }

    pub fn backward(&mut self, batch_size: usize, loss_gradient: &wgpu::Buffer) -> Result<wgpu::Buffer> {
        let mut chain = loss_gradient.clone();

        for layer in self.layers.iter_mut().rev() {
            layer.backward(batch_size, &chain)?;
            chain = layer.backward_result()?.clone();
        }

        Ok(self.entry.backward(&chain))
    }

    pub fn number_output_rows(&self) -> usize {
        self.layers
            .last()
            .map_or(self.entry.number_rows(), |layer| layer.number_output_rows())
    }

    pub fn maximum_output_columns(&self) -> usize {
        self.layers
            .last()
            .map_or(self.entry.maximum_columns(), |layer| {
                layer.maximum_output_columns()
            })
    }

    pub fn output_buffer(&self) -> Result<&wgpu::Buffer> {
        match self.layers.last() {
            Some(layer) => layer.forward_result(),
            None => self.entry.forward_result(),
        }
    }

    pub fn output_column_counts(&self) -> &[usize] {
        self.entry.column_counts()
    }

    pub(crate) fn optimize(&mut self, scaling_factor: f32) -> Result<()> {
        for layer in self.layers.iter_mut() {
            if let Some(optimizable) = layer.as_optimizable() {
                optimizable.optimize(scaling_factor)?;
            }
        }

        Ok(())
    }

    fn acquire(&mut self, maximum_batch_size: usize) -> Result<()> {
        self.entry.acquire(maximum_batch_size)?;

        for layer in self.layers.iter_mut() {
            layer.acquire(maximum_batch_size)?;
        }

        Ok(())
    }

    fn release(&mut self) {
        for layer in self.layers.iter_mut() {
            layer.release();
        }

        self.entry.release();
    }
}

/// An accelerator-path network. Owns a device buffer for uploaded loss
/// gradients; every batch-size-dependent resource is acquired at
/// construction against the fixed maximum batch size. The input memory
/// cache belongs to the caller: each training or testing run carries its
/// own, so batch identifiers from different sample sets never collide.
pub struct GpuNetwork {
    context: GpuContext,
    maximum_batch_size: usize,
    propagator: GpuPropagator,
    loss_gradient: Option<wgpu::Buffer>,
}

impl GpuNetwork {
    pub fn new(
        context: GpuContext,
        maximum_batch_size: usize,
        entry: GpuInputLayer,
        layers: Vec<Box<dyn GpuForwardLayer>>,
    ) -> Result<Self> {
        let mut propagator = GpuPropagator::new(entry, layers)?;
        propagator.acquire(maximum_batch_size)?;

        let loss_gradient = context.create_storage_buffer(
            "Loss Gradient Buffer",
            maximum_batch_size
                * propagator.number_output_rows()
                * propagator.maximum_output_columns(),
        );

        Ok(GpuNetwork {
            context,
            maximum_batch_size,
            propagator,
            loss_gradient: Some(loss_gradient),
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn maximum_batch_size(&self) -> usize {
        self.maximum_batch_size
    }

    pub fn forward(
        &mut self,
        batch_id: usize,
        batch: &[usize],
        inputs: &[FloatMatrix],
        memory: &mut InputMemory,
        is_training: bool,
    ) -> Result<()> {
        self.propagator
            .forward(batch_id, batch, inputs, memory, is_training)
    }

    /// Synchronization point: reads the final layer's full padded output
    /// back to the host.
    pub fn read_output(&self) -> Result<Vec<f32>> {
        let output = self.propagator.output_buffer()?;

        self.context.read_buffer(
            output,
            self.maximum_batch_size
                * self.propagator.number_output_rows()
                * self.propagator.maximum_output_columns(),
        )
    }

    /// One sample's slice of a read-back output buffer.
    pub fn output_slot<'a>(&self, output: &'a [f32], within_batch: usize) -> &'a [f32] {
        let rows = self.propagator.number_output_rows();
        let stride = rows * self.propagator.maximum_output_columns();
        let columns = self.propagator.output_column_counts()[within_batch];

        &output[within_batch * stride..within_batch * stride + rows * columns]
    }

    /// Uploads a zero-padded loss gradient and propagates it backward.
    pub fn backward(&mut self, batch_size: usize, loss_gradient: &[f32]) -> Result<()> {
        let buffer = self
            .loss_gradient
            .as_ref()
            .ok_or(EngineError::ResourceState("GpuNetwork::backward"))?;

        self.context
            .queue()
            .write_buffer(buffer, 0, bytemuck::cast_slice(loss_gradient));

        let buffer = buffer.clone();
        self.propagator.backward(batch_size, &buffer)?;

        Ok(())
    }

    pub fn optimize(&mut self, scaling_factor: f32) -> Result<()> {
        self.propagator.optimize(scaling_factor)
    }

    /// Releases every batch-size-dependent resource. Safe to call more
    /// than once.
    pub fn free(&mut self) {
        self.propagator.release();
        self.loss_gradient = None;
    }

    pub fn training<'a>(
        &'a mut self,
        inputs: &'a [FloatMatrix],
        targets: &'a [Vec<f32>],
        number_iterations: usize,
        loss: LossFunction,
        after_each_iteration: Option<Box<dyn FnMut(usize, f32) + 'a>>,
    ) -> GpuTrainer<'a> {
        GpuTrainer {
            network: self,
            memory: InputMemory::new(),
            inputs,
            targets,
            number_iterations,
            loss,
            after_each_iteration,
        }
    }

    pub fn test<'a>(
        &'a mut self,
        inputs: &'a [FloatMatrix],
        targets: &'a [Vec<f32>],
        number_categories: usize,
    ) -> GpuTester<'a> {
        GpuTester {
            network: self,
            memory: InputMemory::new(),
            inputs,
            targets,
            number_categories,
        }
    }

    fn gradient_stride(&self) -> usize {
        self.propagator.number_output_rows() * self.propagator.maximum_output_columns()
    }
}

/// Accelerator-path trainer. The loss itself is computed on the host: each
/// batch's output is read back (the one synchronization point per batch),
/// per-sample gradients are packed zero-padded and uploaded, then the
/// backward kernels and the end-of-batch updates are enqueued.
pub struct GpuTrainer<'a> {
    network: &'a mut GpuNetwork,
    memory: InputMemory,
    inputs: &'a [FloatMatrix],
    targets: &'a [Vec<f32>],
    number_iterations: usize,
    loss: LossFunction,
    after_each_iteration: Option<Box<dyn FnMut(usize, f32) + 'a>>,
}

impl<'a> GpuTrainer<'a> {
    /// The run's input memory cache, e.g. for inspecting its upload count.
    pub fn input_memory(&self) -> &InputMemory {
        &self.memory
    }

    /// Tears down this run's resident batches.
    pub fn free(&mut self) {
        self.memory.free();
    }

    /// Runs all iterations and returns the final iteration's mean loss.
    pub fn run(&mut self) -> Result<f32> {
        if self.inputs.len() != self.targets.len() {
            return Err(EngineError::Configuration(format!(
                "{} inputs but {} targets",
                self.inputs.len(),
                self.targets.len()
            )));
        }

        let batches = partition(self.inputs.len(), self.network.maximum_batch_size());
        let mut mean_loss = 0.0;

        for iteration in 0..self.number_iterations {
            let mut accumulated_loss = 0.0;

            for (batch_id, batch) in batches.iter().enumerate() {
                accumulated_loss += self.train_batch(batch_id, batch)?;
            }

            mean_loss = accumulated_loss / self.inputs.len() as f32;

            if let Some(callback) = self.after_each_iteration.as_mut() {
                callback(iteration, mean_loss);
            }
        }

        Ok(mean_loss)
    }

    fn train_batch(&mut self, batch_id: usize, batch: &[usize]) -> Result<f32> {
        self.network
            .forward(batch_id, batch, self.inputs, &mut self.memory, true)?;

        let output = self.network.read_output()?;
        let stride = self.network.gradient_stride();
        let mut gradient = vec![0.0; self.network.maximum_batch_size() * stride];
        let mut batch_loss = 0.0;

        for (within_batch, &sample) in batch.iter().enumerate() {
            let target = &self.targets[sample];
            let predicted = self.network.output_slot(&output, within_batch);

            if predicted.len() != target.len() {
                return Err(EngineError::Configuration(format!(
                    "sample {sample} predicts {} values but its target holds {}",
                    predicted.len(),
                    target.len()
                )));
            }

            batch_loss += self.loss.compute(predicted, target);

            let offset = within_batch * stride;
            self.loss.gradient(
                predicted,
                target,
                &mut gradient[offset..offset + predicted.len()],
            );
        }

        self.network.backward(batch.len(), &gradient)?;
        self.network.optimize(1.0 / batch.len() as f32)?;

        Ok(batch_loss)
    }
}

/// Accelerator-path tester: forward in evaluation mode, one read-back per
/// batch, classification accuracy by column argmax.
pub struct GpuTester<'a> {
    network: &'a mut GpuNetwork,
    memory: InputMemory,
    inputs: &'a [FloatMatrix],
    targets: &'a [Vec<f32>],
    number_categories: usize,
}

impl<'a> GpuTester<'a> {
    /// The run's input memory cache, e.g. for inspecting its upload count.
    pub fn input_memory(&self) -> &InputMemory {
        &self.memory
    }

    /// Tears down this run's resident batches.
    pub fn free(&mut self) {
        self.memory.free();
    }

    pub fn run(&mut self) -> Result<f32> {
        if self.inputs.is_empty() {
            return Ok(0.0);
        }

        let batches = partition(self.inputs.len(), self.network.maximum_batch_size());
        let mut correct = 0usize;

        for (batch_id, batch) in batches.iter().enumerate() {
            self.network
                .forward(batch_id, batch, self.inputs, &mut self.memory, false)?;

            let output = self.network.read_output()?;

            for (within_batch, &sample) in batch.iter().enumerate() {
                let predicted = self.network.output_slot(&output, within_batch);
                let target = &self.targets[sample];

                let predicted_category = argmax(&predicted[..self.number_categories]);
                let expected_category = argmax(&target[..self.number_categories]);

                if predicted_category == expected_category {
                    correct += 1;
                }
            }
        }

        Ok(correct as f32 / self.inputs.len() as f32)
    }
}
