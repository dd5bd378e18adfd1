mod activation;
mod error;
mod initialization;
mod loss;
mod matrix;
mod network;
mod optimization;
mod workflow;

pub mod gpu_layers;
pub mod layers;

pub use activation::{softmax_backward_column, softmax_column, ActivationType};
pub use error::{EngineError, Result};
pub use initialization::InitializationStrategy;
pub use loss::LossFunction;
pub use matrix::{concatenate_batch, FloatMatrix};
pub use network::{Network, Propagator};
pub use optimization::{DenseAccumulator, OptimizationStrategy, UpdateRule};
pub use workflow::{Tester, Trainer};
