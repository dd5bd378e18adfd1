use crate::error::{EngineError, Result};
use crate::layers::{ForwardLayer, InputLayer};
use crate::loss::LossFunction;
use crate::matrix::FloatMatrix;
use crate::workflow::{Tester, Trainer};

/// The forward/backward pair over one entry point and an ordered layer
/// chain. Forward threads each layer's (column counts, buffer) pair into
/// the next; backward walks the chain in strict reverse order and finishes
/// with the entry point's identity backward.
pub struct Propagator {
    entry: InputLayer,
    layers: Vec<Box<dyn ForwardLayer>>,
}

impl Propagator {
    pub fn new(entry: InputLayer, layers: Vec<Box<dyn ForwardLayer>>) -> Result<Self> {
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

        Ok(Propagator { entry, layers })
    }

    pub fn forward(
        &mut self,
        batch: &[usize],
        inputs: &[FloatMatrix],
        is_training: bool,
    ) -> Result<()> {
        self.entry.forward(batch, inputs)?;

        for index in 0..self.layers.len() {
            let (before, rest) = self.layers.split_at_mut(index);

            let (column_counts, result) = match before.last() {
                None => (self.entry.column_counts(), self.entry.forward_result()),
                Some(previous) => (previous.output_column_counts(), previous.forward_result()),
            };

            rest[0].forward(batch.len(), column_counts, result, is_training)?;
        }

        Ok(())
    }

    pub fn backward<'a>(
        &'a mut self,
        within_batch: usize,
        loss_gradient: &'a [f32],
    ) -> Result<&'a [f32]> {
        for index in (0..self.layers.len()).rev() {
            let (up_to, rest) = self.layers.split_at_mut(index + 1);

            let chain = match rest.first() {
                None => loss_gradient,
                Some(next) => next.backward_result(within_batch),
            };

            up_to[index].backward(within_batch, chain)?;
        }

        let chain = match self.layers.first() {
            None => loss_gradient,
            Some(first) => first.backward_result(within_batch),
        };

        Ok(self.entry.backward(chain))
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

    pub fn output(&self) -> &[f32] {
        self.layers
            .last()
            .map_or(self.entry.forward_result(), |layer| layer.forward_result())
    }

    pub fn output_column_counts(&self) -> &[usize] {
        self.layers
            .last()
            .map_or(self.entry.column_counts(), |layer| {
                layer.output_column_counts()
            })
    }

    /// One sample's slice of the final output buffer.
    pub fn output_slot(&self, within_batch: usize) -> &[f32] {
        let rows = self.number_output_rows();
        let stride = rows * self.maximum_output_columns();
        let columns = self.output_column_counts()[within_batch];

        &self.output()[within_batch * stride..within_batch * stride + rows * columns]
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

/// A host-path network: an entry point plus an ordered chain of layers,
/// with every batch-size-dependent resource acquired at construction
/// against a fixed maximum batch size.
pub struct Network {
    maximum_batch_size: usize,
    propagator: Propagator,
}

impl Network {
    pub fn new(
        maximum_batch_size: usize,
        entry: InputLayer,
        layers: Vec<Box<dyn ForwardLayer>>,
    ) -> Result<Self> {
        let mut propagator = Propagator::new(entry, layers)?;
        propagator.acquire(maximum_batch_size)?;

        Ok(Network {
            maximum_batch_size,
            propagator,
        })
    }

    pub fn maximum_batch_size(&self) -> usize {
        self.maximum_batch_size
    }

    pub fn propagator(&mut self) -> &mut Propagator {
        &mut self.propagator
    }

    /// Releases every batch-size-dependent resource. Safe to call more than
    /// once; afterwards, forward and backward fail fast.
    pub fn free(&mut self) {
        self.propagator.release();
    }

    pub fn training<'a>(
        &'a mut self,
        inputs: &'a [FloatMatrix],
        targets: &'a [Vec<f32>],
        number_iterations: usize,
        loss: LossFunction,
        after_each_iteration: Option<Box<dyn FnMut(usize, f32) + 'a>>,
    ) -> Trainer<'a> {
        Trainer::new(
            self,
            inputs,
            targets,
            number_iterations,
            loss,
            after_each_iteration,
        )
    }

    pub fn test<'a>(
        &'a mut self,
        inputs: &'a [FloatMatrix],
        targets: &'a [Vec<f32>],
        number_categories: usize,
    ) -> Tester<'a> {
        Tester::new(self, inputs, targets, number_categories)
    }
}
