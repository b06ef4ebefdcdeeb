//! Crate wide error type
use thiserror::Error;

/// Errors raised by simulation, training and i/o routines
#[derive(Error, Debug)]
pub enum Error {
    /// Velocity field contains NaN or Inf values
    #[error("non-finite velocity field ({context}) at time {time:.4}")]
    NonFinite {
        /// Where the fault was detected (resolution/filter/seed/iteration)
        context: String,
        /// Simulation time of the failed step
        time: f64,
    },

    /// Pressure solver did not converge
    #[error("pressure solve diverged: residual {residual:.3e} after {iterations} iterations")]
    PressureDiverged {
        /// Final residual norm
        residual: f64,
        /// Iterations performed
        iterations: usize,
    },

    /// Inconsistent configuration, detected before any expensive computation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Array shape mismatch between collaborating components
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// Persistence layer failure, carries the failing path
    #[error("i/o failure on {path}: {source}")]
    Io {
        /// Path of the file that failed
        path: String,
        /// Underlying hdf5 error
        source: hdf5::Error,
    },
}

/// Crate wide result type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Attach the failing path to an hdf5 error
    pub fn io(path: &str, source: hdf5::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }
}
