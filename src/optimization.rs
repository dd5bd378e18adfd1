use crate::error::{EngineError, Result};

/// Collects per-parameter gradient contributions across a batch,
/// independently of how those contributions were produced. Created once at
/// layer construction, sized to the parameter count; consumed and reset
/// after each batch's update.
#[derive(Debug)]
pub struct DenseAccumulator {
    entries: Vec<f32>,
    count: usize,
}

impl DenseAccumulator {
    pub fn new(size: usize) -> Self {
        DenseAccumulator {
            entries: vec![0.0; size],
            count: 0,
        }
    }

    pub fn accumulate(&mut self, gradient: &[f32]) {
        for (entry, &value) in self.entries.iter_mut().zip(gradient) {
            *entry += value;
        }

        self.count += 1;
    }

    /// Number of contributions since the last reset. Zero means the layer
    /// received no gradient this batch and the update must be a no-op.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn entries(&self) -> &[f32] {
        &self.entries
    }

    pub fn reset(&mut self) {
        self.entries.fill(0.0);
        self.count = 0;
    }
}

/// Hyperparameters for an update rule; `build` instantiates one rule per
/// parameter buffer.
#[derive(Debug, Clone, Copy)]
pub enum OptimizationStrategy {
    GradientDescent { learning_rate: f32 },
    Momentum { learning_rate: f32, momentum: f32 },
}

impl OptimizationStrategy {
    pub fn build(&self, parameter_count: usize) -> UpdateRule {
        match *self {
            OptimizationStrategy::GradientDescent { learning_rate } => {
                UpdateRule::GradientDescent { learning_rate }
            }
            OptimizationStrategy::Momentum {
                learning_rate,
                momentum,
            } => UpdateRule::Momentum {
                learning_rate,
                momentum,
                parameter_count,
                history: Vec::new(),
            },
        }
    }
}

/// Mutates a parameter buffer in place from an accumulated gradient. The
/// gradient is a sum over the batch; the caller supplies
/// `scaling_factor = 1 / batch_size` so sums become means here, never inside
/// the accumulator.
#[derive(Debug)]
pub enum UpdateRule {
    GradientDescent {
        learning_rate: f32,
    },
    /// Keeps one history slot per parameter. The history persists across
    /// batches; its storage is allocated at acquisition time.
    Momentum {
        learning_rate: f32,
        momentum: f32,
        parameter_count: usize,
        history: Vec<f32>,
    },
}

impl UpdateRule {
    pub fn acquire(&mut self, _maximum_batch_size: usize) {
        if let UpdateRule::Momentum {
            parameter_count,
            history,
            ..
        } = self
        {
            *history = vec![0.0; *parameter_count];
        }
    }

    pub fn release(&mut self) {
        if let UpdateRule::Momentum { history, .. } = self {
            *history = Vec::new();
        }
    }

    pub fn update(
        &mut self,
        parameters: &mut [f32],
        scaling_factor: f32,
        gradient: &[f32],
    ) -> Result<()> {
        match self {
            UpdateRule::GradientDescent { learning_rate } => {
                for (parameter, &accumulated) in parameters.iter_mut().zip(gradient) {
                    *parameter -= scaling_factor * *learning_rate * accumulated;
                }
            }
            UpdateRule::Momentum {
                learning_rate,
                momentum,
                parameter_count,
                history,
            } => {
                if history.len() != *parameter_count {
                    return Err(EngineError::ResourceState("UpdateRule::update"));
                }

                for ((parameter, slot), &accumulated) in
                    parameters.iter_mut().zip(history.iter_mut()).zip(gradient)
                {
                    *slot = *momentum * *slot + *learning_rate * accumulated;
                    *parameter -= scaling_factor * *slot;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_sums_and_resets() {
        let mut accumulator = DenseAccumulator::new(2);

        accumulator.accumulate(&[1.0, 2.0]);
        accumulator.accumulate(&[3.0, 4.0]);

        assert_eq!(accumulator.entries(), &[4.0, 6.0]);
        assert_eq!(accumulator.count(), 2);

        accumulator.reset();

        assert_eq!(accumulator.entries(), &[0.0, 0.0]);
        assert_eq!(accumulator.count(), 0);
    }

    #[test]
    fn test_gradient_descent_update() {
        let mut rule = OptimizationStrategy::GradientDescent { learning_rate: 0.1 }.build(2);
        rule.acquire(4);

        let mut parameters = [1.0, 2.0];
        rule.update(&mut parameters, 0.5, &[2.0, 4.0]).unwrap();

        assert!((parameters[0] - 0.9).abs() < 1e-6);
        assert!((parameters[1] - 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_momentum_update_keeps_history() {
        let mut rule = OptimizationStrategy::Momentum {
            learning_rate: 0.1,
            momentum: 0.9,
        }
        .build(1);
        rule.acquire(4);

        let mut parameters = [1.0];

        rule.update(&mut parameters, 1.0, &[1.0]).unwrap();
        assert!((parameters[0] - 0.9).abs() < 1e-6);

        // history = 0.9 * 0.1 + 0.1 * 1.0 = 0.19
        rule.update(&mut parameters, 1.0, &[1.0]).unwrap();
        assert!((parameters[0] - 0.71).abs() < 1e-6);
    }

    #[test]
    fn test_momentum_update_before_acquire_fails() {
        let mut rule = OptimizationStrategy::Momentum {
            learning_rate: 0.1,
            momentum: 0.9,
        }
        .build(1);

        let mut parameters = [1.0];
        assert!(rule.update(&mut parameters, 1.0, &[1.0]).is_err());
    }

    #[test]
    fn test_zero_scaling_is_a_no_op_for_parameters() {
        let mut rule = OptimizationStrategy::Momentum {
            learning_rate: 0.1,
            momentum: 0.9,
        }
        .build(2);
        rule.acquire(4);

        let mut parameters = [1.0, -1.0];
        rule.update(&mut parameters, 0.0, &[5.0, 5.0]).unwrap();

        assert_eq!(parameters, [1.0, -1.0]);
    }
}
