use crate::error::{EngineError, Result};
use crate::loss::LossFunction;
use crate::matrix::FloatMatrix;
use crate::network::Network;

/// Splits `0..number_examples` into consecutive batches of at most
/// `maximum_batch_size` indices; the last batch may be shorter. The chunk
/// index doubles as the stable batch identifier.
pub(crate) fn partition(number_examples: usize, maximum_batch_size: usize) -> Vec<Vec<usize>> {
    (0..number_examples)
        .collect::<Vec<_>>()
        .chunks(maximum_batch_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Index of the largest entry, the predicted category of a column vector.
pub(crate) fn argmax(values: &[f32]) -> usize {
    let mut best = 0;

    for (index, &value) in values.iter().enumerate() {
        if value > values[best] {
            best = index;
        }
    }

    best
}

/// Drives training over many batches for many iterations: forward each
/// batch, compute per-sample loss gradients, propagate them backward one
/// sample at a time, then apply each parameter-owning layer's update with
/// `scaling_factor = 1 / batch_size`.
pub struct Trainer<'a> {
    network: &'a mut Network,
    inputs: &'a [FloatMatrix],
    targets: &'a [Vec<f32>],
    number_iterations: usize,
    loss: LossFunction,
    after_each_iteration: Option<Box<dyn FnMut(usize, f32) + 'a>>,
}

impl<'a> Trainer<'a> {
    pub(crate) fn new(
        network: &'a mut Network,
        inputs: &'a [FloatMatrix],
        targets: &'a [Vec<f32>],
        number_iterations: usize,
        loss: LossFunction,
        after_each_iteration: Option<Box<dyn FnMut(usize, f32) + 'a>>,
    ) -> Self {
        Trainer {
            network,
            inputs,
            targets,
            number_iterations,
            loss,
            after_each_iteration,
        }
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

            for batch in &batches {
                accumulated_loss += self.train_batch(batch)?;
            }

            mean_loss = accumulated_loss / self.inputs.len() as f32;

            if let Some(callback) = self.after_each_iteration.as_mut() {
                callback(iteration, mean_loss);
            }
        }

        Ok(mean_loss)
    }

    fn train_batch(&mut self, batch: &[usize]) -> Result<f32> {
        let propagator = self.network.propagator();
        propagator.forward(batch, self.inputs, true)?;

        let mut batch_loss = 0.0;
        let mut gradient = Vec::new();

        for (within_batch, &sample) in batch.iter().enumerate() {
            let target = &self.targets[sample];
            let predicted = propagator.output_slot(within_batch);

            if predicted.len() != target.len() {
                return Err(EngineError::Configuration(format!(
                    "sample {sample} predicts {} values but its target holds {}",
                    predicted.len(),
                    target.len()
                )));
            }

            batch_loss += self.loss.compute(predicted, target);

            gradient.resize(predicted.len(), 0.0);
            self.loss.gradient(predicted, target, &mut gradient);

            propagator.backward(within_batch, &gradient)?;
        }

        propagator.optimize(1.0 / batch.len() as f32)?;

        Ok(batch_loss)
    }
}

/// Runs forward passes in evaluation mode and reports classification
/// accuracy over `number_categories` by column argmax.
pub struct Tester<'a> {
    network: &'a mut Network,
    inputs: &'a [FloatMatrix],
    targets: &'a [Vec<f32>],
    number_categories: usize,
}

impl<'a> Tester<'a> {
    pub(crate) fn new(
        network: &'a mut Network,
        inputs: &'a [FloatMatrix],
        targets: &'a [Vec<f32>],
        number_categories: usize,
    ) -> Self {
        Tester {
            network,
            inputs,
            targets,
            number_categories,
        }
    }

    /// Fraction of samples whose predicted category matches the target's.
    pub fn run(&mut self) -> Result<f32> {
        if self.inputs.is_empty() {
            return Ok(0.0);
        }

        let batches = partition(self.inputs.len(), self.network.maximum_batch_size());
        let mut correct = 0usize;

        for batch in &batches {
            let propagator = self.network.propagator();
            propagator.forward(batch, self.inputs, false)?;

            for (within_batch, &sample) in batch.iter().enumerate() {
                let predicted = propagator.output_slot(within_batch);
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
