/// Loss functions, specified at the interface boundary: `compute` yields a
/// scalar, `gradient` a buffer matching the prediction's shape.
#[derive(Debug, Clone, Copy)]
pub enum LossFunction {
    /// `0.5 * Σ (prediction - target)²`
    SquaredError,
    /// `-Σ target * ln(prediction)`; pair with a softmax output layer.
    CrossEntropy,
}

const EPSILON: f32 = 1e-15;

impl LossFunction {
    pub fn compute(&self, prediction: &[f32], target: &[f32]) -> f32 {
        match self {
            LossFunction::SquaredError => prediction
                .iter()
                .zip(target)
                .map(|(&p, &t)| {
                    let difference = p - t;
                    0.5 * difference * difference
                })
                .sum(),
            LossFunction::CrossEntropy => -prediction
                .iter()
                .zip(target)
                .map(|(&p, &t)| t * p.clamp(EPSILON, 1.0 - EPSILON).ln())
                .sum::<f32>(),
        }
    }

    pub fn gradient(&self, prediction: &[f32], target: &[f32], result: &mut [f32]) {
        match self {
            LossFunction::SquaredError => {
                for ((r, &p), &t) in result.iter_mut().zip(prediction).zip(target) {
                    *r = p - t;
                }
            }
            LossFunction::CrossEntropy => {
                for ((r, &p), &t) in result.iter_mut().zip(prediction).zip(target) {
                    *r = -t / p.clamp(EPSILON, 1.0 - EPSILON);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squared_error() {
        let loss = LossFunction::SquaredError;

        assert_eq!(loss.compute(&[1.0], &[1.0]), 0.0);
        assert!((loss.compute(&[0.5], &[1.0]) - 0.125).abs() < 1e-6);

        let mut gradient = [0.0];
        loss.gradient(&[0.5], &[1.0], &mut gradient);
        assert!((gradient[0] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_is_zero_for_perfect_prediction() {
        let loss = LossFunction::CrossEntropy;

        let value = loss.compute(&[1.0, 0.0], &[1.0, 0.0]);
        assert!(value.abs() < 1e-5);
    }

    #[test]
    fn test_cross_entropy_gradient_targets_the_hot_category() {
        let loss = LossFunction::CrossEntropy;

        let mut gradient = [0.0, 0.0];
        loss.gradient(&[0.5, 0.5], &[1.0, 0.0], &mut gradient);

        assert!((gradient[0] + 2.0).abs() < 1e-5);
        assert_eq!(gradient[1], 0.0);
    }
}
