use rand_distr::{Distribution, Normal};

/// How a parameter buffer gets its initial values. Invoked exactly once per
/// buffer at layer construction.
#[derive(Debug, Clone, Copy)]
pub enum InitializationStrategy {
    Zero,
    Constant(f32),
    Gaussian { mean: f32, standard_deviation: f32 },
}

impl InitializationStrategy {
    pub fn generate(&self, rows: usize, columns: usize) -> Vec<f32> {
        let count = rows * columns;

        match self {
            InitializationStrategy::Zero => vec![0.0; count],
            InitializationStrategy::Constant(value) => vec![*value; count],
            InitializationStrategy::Gaussian {
                mean,
                standard_deviation,
            } => {
                let normal = Normal::new(*mean, *standard_deviation)
                    .expect("standard deviation must be finite and non-negative");
                let mut rng = rand::rng();

                (0..count).map(|_| normal.sample(&mut rng)).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_fill() {
        let values = InitializationStrategy::Constant(0.5).generate(2, 3);

        assert_eq!(values, vec![0.5; 6]);
    }

    #[test]
    fn test_gaussian_varies() {
        let values = InitializationStrategy::Gaussian {
            mean: 0.0,
            standard_deviation: 0.1,
        }
        .generate(4, 4);

        assert_eq!(values.len(), 16);
        assert!(values.iter().any(|&value| value != 0.0));
    }
}
