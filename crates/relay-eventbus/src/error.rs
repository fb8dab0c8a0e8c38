use thiserror::Error;

/// Errors specific to the wire transport — malformed frames never reach
/// `relay-pipeline`, so they get their own small taxonomy rather than being
/// folded into `PipelineError`.
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown event_type: {0}")]
    UnknownEventType(String),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] relay_pipeline::PipelineError),
}

pub type Result<T> = std::result::Result<T, EventBusError>;
