/// Enum representing the supported activation function types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationType {
    Identity,
    Sigmoid,
    Relu,
    Tanh,
    Softmax,
}

impl ActivationType {
    /// Applies the activation function to a given input. Not defined for
    /// softmax, which is a per-column reduction; see [`softmax_column`].
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            ActivationType::Identity => x,
            ActivationType::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationType::Relu => x.max(0.0),
            ActivationType::Tanh => x.tanh(),
            ActivationType::Softmax => panic!("softmax is not an elementwise function"),
        }
    }

    /// Computes the derivative of the activation function with respect to
    /// its preactivation input.
    pub fn derivative(&self, x: f32) -> f32 {
        match self {
            ActivationType::Identity => 1.0,
            ActivationType::Sigmoid => {
                let sigmoid = 1.0 / (1.0 + (-x).exp());
                sigmoid * (1.0 - sigmoid)
            }
            ActivationType::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationType::Tanh => 1.0 - x.tanh().powi(2),
            ActivationType::Softmax => panic!("softmax is not an elementwise function"),
        }
    }

    pub fn is_elementwise(&self) -> bool {
        !matches!(self, ActivationType::Softmax)
    }
}

/// Softmax over one column, shifted by the column maximum for stability.
pub fn softmax_column(input: &[f32], output: &mut [f32]) {
    let maximum = input.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    let mut sum = 0.0;
    for (exponentiated, &value) in output.iter_mut().zip(input) {
        *exponentiated = (value - maximum).exp();
        sum += *exponentiated;
    }

    for exponentiated in output.iter_mut() {
        *exponentiated /= sum;
    }
}

/// Backward step of softmax over one column given the forward output `y`:
/// `dx_j = y_j * (chain_j - <chain, y>)`.
pub fn softmax_backward_column(output: &[f32], chain: &[f32], result: &mut [f32]) {
    let mut weighted_sum = 0.0;
    for (&y, &c) in output.iter().zip(chain) {
        weighted_sum += y * c;
    }

    for ((r, &y), &c) in result.iter_mut().zip(output).zip(chain) {
        *r = y * (c - weighted_sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::EPSILON;

    #[test]
    fn test_activation_functions() {
        assert!((ActivationType::Sigmoid.apply(0.0) - 0.5).abs() < EPSILON);

        assert_eq!(ActivationType::Relu.apply(-1.0), 0.0);
        assert_eq!(ActivationType::Relu.apply(2.0), 2.0);

        assert!((ActivationType::Tanh.apply(0.0)).abs() < EPSILON);

        assert_eq!(ActivationType::Identity.apply(5.0), 5.0);
    }

    #[test]
    fn test_activation_derivatives() {
        assert!((ActivationType::Sigmoid.derivative(0.0) - 0.25).abs() < EPSILON);

        assert_eq!(ActivationType::Relu.derivative(-1.0), 0.0);
        assert_eq!(ActivationType::Relu.derivative(2.0), 1.0);

        assert!((ActivationType::Tanh.derivative(0.0) - 1.0).abs() < EPSILON);

        assert_eq!(ActivationType::Identity.derivative(5.0), 1.0);
    }

    #[test]
    fn test_softmax_column() {
        let mut output = [0.0; 2];

        softmax_column(&[0.0, 0.0], &mut output);
        assert!((output[0] - 0.5).abs() < 1e-6);
        assert!((output[1] - 0.5).abs() < 1e-6);

        softmax_column(&[0.0, 1.0], &mut output);
        assert!((output[0] - 0.268941421).abs() < 1e-3);
        assert!((output[1] - 0.731058579).abs() < 1e-3);
    }

    #[test]
    fn test_softmax_backward_is_zero_for_uniform_chain() {
        // A constant chain is orthogonal to the softmax simplex.
        let mut output = [0.0; 3];
        softmax_column(&[0.1, 0.2, 0.3], &mut output);

        let mut gradient = [0.0; 3];
        softmax_backward_column(&output, &[1.0, 1.0, 1.0], &mut gradient);

        for value in gradient {
            assert!(value.abs() < 1e-6);
        }
    }
}
