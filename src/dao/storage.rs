use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by the key-value layer regardless of the underlying backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached at all.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A single command executed but reported an error.
    #[error("command {kind} on `{key}` failed: {message}")]
    CommandFailed {
        kind: &'static str,
        key: String,
        message: String,
    },
    /// A pipeline round trip was rejected before its commands could report
    /// individual outcomes.
    #[error("pipeline rejected: {0}")]
    PipelineRejected(String),
    /// The backend answered with a reply shape the command does not produce.
    #[error("unexpected reply for {kind} on `{key}`")]
    UnexpectedReply { kind: &'static str, key: String },
    /// An entity could not be serialized for storage.
    #[error("failed to encode entity at `{key}`")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// A stored entity could not be deserialized back.
    #[error("failed to decode entity at `{key}`")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a per-command failure.
    pub fn command_failed(
        kind: &'static str,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        StorageError::CommandFailed {
            kind,
            key: key.into(),
            message: message.into(),
        }
    }
}
