use thiserror::Error;

/// Errors that prevent a harness run from starting.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The harness needs at least one worker.
    #[error("concurrency must be greater than zero")]
    InvalidConcurrency,
}
