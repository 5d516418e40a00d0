use thiserror::Error;

/// Failures surfaced by the registration workflow.
///
/// None of these are retried internally; callers decide what to show the user.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("email is already registered")]
    AlreadyRegistered,
    #[error("no pending registration for this email")]
    NotFound,
    #[error("invalid verification code")]
    InvalidCode,
    #[error("verification code expired")]
    ExpiredCode,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl VerifyError {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
