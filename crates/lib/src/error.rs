//! Error taxonomy shared by the forms, the chat controller, and the front ends.
//!
//! Validation failures never reach the network. Authentication rejection is a distinct
//! variant so a session guard can react to it. Every other request failure is treated the
//! same way: no retry, no backoff.

pub use crate::api::ApiError;

/// Local check failed; no request was made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    EmptyField(&'static str),
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("File too large (max {} MB)", .limit / (1024 * 1024))]
    FileTooLarge { size: u64, limit: u64 },
    #[error("an upload is already in progress")]
    UploadInProgress,
}

/// Failure of a user-initiated operation: either rejected locally or failed remotely.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ClientError {
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, ClientError::Api(ApiError::Unauthenticated))
    }

    /// Text for an alert: validation message, or the server's payload verbatim.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation(e) => e.to_string(),
            ClientError::Api(e) => e.user_message(),
        }
    }
}
