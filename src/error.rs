use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures raised by the engine. All of these indicate a construction or
/// setup mistake and are never retried.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Declared dimensions and actual data disagree. Detected at graph
    /// construction where possible, otherwise at the first forward call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation was invoked before `acquire` or after `release`.
    #[error("{0} requires an acquired component")]
    ResourceState(&'static str),

    /// A layer or activation variant was requested on a path that does not
    /// implement it. Raised at graph-build time, never mid-run.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Adapter or device acquisition failed. Fatal for the run.
    #[error("device error: {0}")]
    Device(String),
}
