use relay_platform::PlatformError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment content is not valid base64")]
    InvalidEncoding,
    #[error("platform rejected attachment: {0}")]
    Platform(#[from] PlatformError),
    #[error("attachment cache error: {0}")]
    Cache(#[from] relay_cache::CacheError),
}

pub type Result<T> = std::result::Result<T, AttachmentError>;
