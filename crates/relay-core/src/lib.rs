pub mod config;
pub mod error;
pub mod ids;

pub use config::RelayConfig;
pub use error::{AdapterError, Result};
pub use ids::{
    AttachmentId, ConversationId, MessageId, Origin, PlatformConversationId, RequestId, ThreadId,
    UserId,
};
