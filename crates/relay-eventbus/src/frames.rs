use serde::Deserialize;
use serde_json::Value;

/// Framework -> adapter frames, tagged on `type` per §6.1.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    BotResponse(BotResponseFrame),
    CancelRequest(CancelRequestFrame),
}

#[derive(Debug, Deserialize)]
pub struct BotResponseFrame {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequestFrame {
    pub request_id: String,
}
