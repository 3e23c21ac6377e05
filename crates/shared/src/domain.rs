use chrono::Local;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CodeError;

pub const PEER_CODE_LEN: usize = 6;

/// The random numeric identifier a peer advertises so another peer can dial
/// it. Generated once per session, never persisted. Uniqueness is owned by
/// the connection library's namespace, not by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerCode(String);

impl PeerCode {
    /// Generates a fresh code, uniform in `[100000, 999999]`.
    pub fn generate() -> Self {
        let n: u32 = rand::thread_rng().gen_range(100_000..=999_999);
        Self(n.to_string())
    }

    /// Validates user input: trimmed, exactly six ASCII digits.
    pub fn parse(input: &str) -> Result<Self, CodeError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(CodeError::Empty);
        }
        if trimmed.len() != PEER_CODE_LEN || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CodeError::Malformed {
                input: trimmed.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Sent,
    Received,
}

/// One entry of the chat log. Serializes to `{text, type, time}`, the shape
/// the history file stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    #[serde(rename = "type")]
    pub direction: MessageDirection,
    /// Display-formatted local time of day, e.g. `14:03:27`.
    pub time: String,
}

impl ChatMessage {
    pub fn now(text: impl Into<String>, direction: MessageDirection) -> Self {
        Self {
            text: text.into(),
            direction,
            time: Local::now().format("%H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggle(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    /// Caption for the toggle control: names the mode it switches to.
    pub fn toggle_label(self) -> &'static str {
        match self {
            Theme::Light => "Dark Mode",
            Theme::Dark => "Light Mode",
        }
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
