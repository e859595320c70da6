use thiserror::Error;

/// Failures that prevent a search from starting at all.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{0}")]
    InvalidArguments(String),

    #[error("verifier binary `{0}` could not be found")]
    VerifierMissing(String),

    #[error("could not determine the directory containing this executable")]
    ExecutableDirUnknown,
}

impl LaunchError {
    /// Process exit status reported for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::InvalidArguments(_) => 2,
            LaunchError::VerifierMissing(_) => 3,
            LaunchError::ExecutableDirUnknown => 4,
        }
    }
}
