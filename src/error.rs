use thiserror::Error;

use crate::dao::storage::StorageError;

/// Localized fallback shown to users when an infrastructure failure occurs.
///
/// Raw storage errors never cross the socket boundary; operators find the
/// detail in the logs instead.
pub const GENERIC_FAILURE_MESSAGE: &str = "요청을 처리하지 못했습니다.";

/// Errors surfaced by the interaction engine.
///
/// The first four variants are domain errors whose message is shown to the
/// caller verbatim. `Infrastructure` covers batch/pipeline failures; the
/// gateway renders those as [`GENERIC_FAILURE_MESSAGE`].
#[derive(Debug, Error)]
pub enum InteractionError {
    /// Entity id has no record.
    #[error("{0}")]
    NotFound(String),
    /// A status guard was violated (already active or ended, not active).
    #[error("{0}")]
    InvalidState(String),
    /// Input outside the valid domain, e.g. an option id out of bounds.
    #[error("{0}")]
    InvalidInput(String),
    /// Duplicate vote or answer caught by the dedup set.
    #[error("{0}")]
    Conflict(String),
    /// Caller lacks the role or ownership the operation requires.
    #[error("{0}")]
    Unauthorized(String),
    /// A store round trip failed; compensation has already run by the time
    /// this surfaces.
    #[error("{message}")]
    Infrastructure {
        message: String,
        #[source]
        source: Option<StorageError>,
    },
}

impl InteractionError {
    /// Wrap a storage failure under an operation-specific message.
    pub fn infrastructure(message: impl Into<String>, source: StorageError) -> Self {
        InteractionError::Infrastructure {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Message safe to show to the end user.
    pub fn user_message(&self) -> String {
        match self {
            InteractionError::NotFound(message)
            | InteractionError::InvalidState(message)
            | InteractionError::InvalidInput(message)
            | InteractionError::Conflict(message)
            | InteractionError::Unauthorized(message) => message.clone(),
            InteractionError::Infrastructure { .. } => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

impl From<StorageError> for InteractionError {
    fn from(source: StorageError) -> Self {
        InteractionError::Infrastructure {
            message: "storage operation failed".into(),
            source: Some(source),
        }
    }
}
