use serde::{Deserialize, Serialize};

/// A chat message as handed over by the transport layer, envelope already
/// stripped. `sender` may still carry a `/resource` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(channel: &str, sender: &str, text: &str) -> Self {
        Self {
            channel: channel.to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
        }
    }
}

/// One delivery request: the same text to every identity in `audience`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    pub text: String,
    pub audience: Vec<String>,
}

impl Outbound {
    pub fn direct(text: impl Into<String>, recipient: &str) -> Self {
        Self {
            text: text.into(),
            audience: vec![recipient.to_string()],
        }
    }
}
