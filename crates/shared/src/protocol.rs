use serde::{Deserialize, Serialize};

use crate::domain::{ChatMessage, MessageDirection};

/// Payload exchanged over an established data connection.
///
/// Direction is not carried on the wire; the receiving side re-tags the
/// record as `Received` before rendering and persisting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub text: String,
    pub time: String,
}

impl WireMessage {
    pub fn into_received(self) -> ChatMessage {
        ChatMessage {
            text: self.text,
            direction: MessageDirection::Received,
            time: self.time,
        }
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(record: &ChatMessage) -> Self {
        Self {
            text: record.text.clone(),
            time: record.time.clone(),
        }
    }
}
