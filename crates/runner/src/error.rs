//! Errors surfaced by the runner.

use thiserror::Error;

/// Anything that stops a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Run configuration could not be read or failed validation.
    #[error("{0}")]
    Config(String),

    /// The accelerator session failed.
    #[error(transparent)]
    Accel(#[from] accel::AccelError),

    /// The configured driver is not compiled into this binary.
    #[error("driver '{0}' is not available; rebuild with `--features {0}`")]
    DriverUnavailable(&'static str),
}
