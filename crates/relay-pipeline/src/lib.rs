pub mod chunk;
pub mod error;
pub mod event;
pub mod history;
pub mod incoming;
pub mod outgoing;

pub use error::{PipelineError, Result};
pub use event::{BotRequestEvent, OutgoingAttachmentPayload, OutgoingEvent, OutgoingEventType, OutgoingResult};
pub use history::HistoryFetcher;
pub use incoming::IncomingEventProcessor;
pub use outgoing::OutgoingEventProcessor;
