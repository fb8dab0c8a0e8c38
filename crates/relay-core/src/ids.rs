use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

/// Adapter-assigned stable id for a conversation. Distinct from the
/// platform's own identifier (see `PlatformConversationId`) even when a
/// platform's native id would make a fine key on its own.
string_id!(ConversationId);

string_id!(ThreadId);
string_id!(UserId);
string_id!(MessageId);
string_id!(AttachmentId);

/// The platform's own identifier for a conversation (e.g. `guild/channel`,
/// `stream/topic`). Kept distinct from `ConversationId` per the design note
/// in the adapter-generated-id open question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformConversationId(pub String);

impl PlatformConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlatformConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PlatformConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PlatformConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Id assigned to a queued framework request when it enters the EventBus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where a `CachedMessage` came from — the basis of the loopback filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Platform,
    Framework,
}

impl Origin {
    pub fn is_framework(&self) -> bool {
        matches!(self, Origin::Framework)
    }
}
