//! Error types returned by the generation entry points.

use thiserror::Error;

/// Errors produced by packing generation and the supporting services.
#[derive(Debug, Error)]
pub enum Error {
    /// Contradictory or out-of-range configuration parameters. Raised before
    /// any computation starts.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The initial state violates an assumption of the selected algorithm,
    /// e.g. particles already overlap beyond tolerance.
    #[error("precondition violated: {0}")]
    Precondition(String),
    /// An iterative solver or the integration schedule cannot make further
    /// progress. Fatal for the current generation task only.
    #[error("convergence failure: {0}")]
    Convergence(String),
    /// Reading or writing a packing file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shorthand for results carrying [`enum@Error`].
pub type Result<T> = std::result::Result<T, Error>;
