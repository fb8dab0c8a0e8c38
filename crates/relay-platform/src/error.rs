use thiserror::Error;

/// Every `PlatformClient` operation fails as either transient (the
/// platform's reconnection logic retries internally) or permanent (surfaced
/// to the framework immediately).
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("transient platform error: {0}")]
    Transient(String),

    #[error("permanent platform error: {0}")]
    Permanent(String),

    /// The requested operation has no equivalent on this platform (e.g.
    /// pin/unpin on a platform that lacks the concept). A stable contract,
    /// not a bug — the outgoing processor surfaces this as `PermanentError`.
    #[error("unsupported operation on this platform: {0}")]
    Unsupported(String),
}

impl PlatformError {
    pub fn retryable(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
