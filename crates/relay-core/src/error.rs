use thiserror::Error;

/// Error taxonomy shared across the adapter core.
///
/// Every variant maps to one disposition under the wire protocol: surfaced
/// to the framework as `request_failed`, silently absorbed (attachment
/// oversize), retried internally, or fatal (process exit). See `code()`.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("platform error (transient): {0}")]
    Transient(String),

    #[error("platform error (permanent): {0}")]
    Permanent(String),

    #[error("attachment error: {0}")]
    Attachment(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl AdapterError {
    /// Short error code sent to the framework in `request_failed` events.
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::Config(_) => "CONFIG_ERROR",
            AdapterError::Validation(_) => "VALIDATION_ERROR",
            AdapterError::ConversationNotFound(_) => "CONVERSATION_NOT_FOUND",
            AdapterError::Transient(_) => "TRANSIENT_ERROR",
            AdapterError::Permanent(_) => "PERMANENT_ERROR",
            AdapterError::Attachment(_) => "ATTACHMENT_ERROR",
            AdapterError::Serialization(_) => "SERIALIZATION_ERROR",
            AdapterError::Io(_) => "IO_ERROR",
            AdapterError::Fatal(_) => "FATAL_ERROR",
        }
    }

    /// Whether the platform client should retry this failure internally
    /// rather than surface it immediately.
    pub fn retryable(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
