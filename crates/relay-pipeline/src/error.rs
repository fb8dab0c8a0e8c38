use thiserror::Error;

/// Error taxonomy for the incoming/outgoing processors. Unlike
/// `relay_core::AdapterError`, every variant here is already scoped to a
/// single framework-visible request — `relay-adapter` maps these onto
/// `request_failed` payloads rather than process-level failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("platform error: {0}")]
    Platform(#[from] relay_platform::PlatformError),

    #[error("attachment error: {0}")]
    Attachment(#[from] relay_attachments::AttachmentError),

    #[error("unsupported operation on this platform: {0}")]
    Unsupported(String),
}

impl PipelineError {
    /// Short error code surfaced in `request_failed` events.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION_ERROR",
            PipelineError::ConversationNotFound(_) => "CONVERSATION_NOT_FOUND",
            PipelineError::Platform(e) if e.retryable() => "TRANSIENT_ERROR",
            PipelineError::Platform(_) => "PERMANENT_ERROR",
            PipelineError::Attachment(_) => "ATTACHMENT_ERROR",
            PipelineError::Unsupported(_) => "PERMANENT_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
