//! Provider adapter error types.

use crate::coordination::CodeWaitError;
use crate::credentials::CredentialsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The site did not behave as the adapter expected.
    #[error("{0}")]
    Failed(String),

    #[error("Cancelled: shutdown requested")]
    Cancelled,

    #[error("Driver protocol error: {0}")]
    Protocol(String),

    #[error("Driver I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("One-time code generation failed: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("Adapter panicked: {0}")]
    Panicked(String),
}

impl ProviderError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<CodeWaitError> for ProviderError {
    fn from(err: CodeWaitError) -> Self {
        match err {
            CodeWaitError::Cancelled => Self::Cancelled,
        }
    }
}
