use std::{
    fs, io,
    path::PathBuf,
    sync::Mutex,
};

use shared::domain::{ChatMessage, Theme};
use thiserror::Error;
use tracing::warn;

pub const HISTORY_FILE: &str = "chat_history.json";
pub const THEME_FILE: &str = "theme.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why a history load came back empty when records may have existed.
/// An absent file is the normal first-run state and carries no fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryFault {
    Malformed { detail: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadedHistory {
    pub messages: Vec<ChatMessage>,
    pub fault: Option<HistoryFault>,
}

/// Durable home of the chat log and the theme preference. The two values
/// have independent lifecycles; clearing one never touches the other.
pub trait HistoryStore: Send + Sync {
    /// Overwrites the persisted log with the full serialized sequence.
    fn save_history(&self, records: &[ChatMessage]) -> Result<(), StorageError>;
    /// Never fails: malformed state degrades to an empty sequence with an
    /// observable fault instead of an error or a silent fallback.
    fn load_history(&self) -> LoadedHistory;
    fn save_theme(&self, theme: Theme) -> Result<(), StorageError>;
    fn load_theme(&self) -> Theme;
}

/// File-backed store: one JSON document per value under `dir`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write_atomic(&self, file: &str, contents: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{file}.tmp"));
        fs::write(&tmp, contents).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StorageError::Io { path, source })
    }
}

impl HistoryStore for JsonFileStore {
    fn save_history(&self, records: &[ChatMessage]) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(records)?;
        self.write_atomic(HISTORY_FILE, &serialized)
    }

    fn load_history(&self) -> LoadedHistory {
        let path = self.dir.join(HISTORY_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return LoadedHistory::default();
            }
            Err(err) => {
                warn!(path = %path.display(), "history: unreadable, starting empty: {err}");
                return LoadedHistory {
                    messages: Vec::new(),
                    fault: Some(HistoryFault::Malformed {
                        detail: err.to_string(),
                    }),
                };
            }
        };

        match serde_json::from_str::<Vec<ChatMessage>>(&raw) {
            Ok(messages) => LoadedHistory {
                messages,
                fault: None,
            },
            Err(err) => {
                warn!(path = %path.display(), "history: malformed, starting empty: {err}");
                LoadedHistory {
                    messages: Vec::new(),
                    fault: Some(HistoryFault::Malformed {
                        detail: err.to_string(),
                    }),
                }
            }
        }
    }

    fn save_theme(&self, theme: Theme) -> Result<(), StorageError> {
        self.write_atomic(THEME_FILE, &serde_json::to_string(&theme)?)
    }

    fn load_theme(&self) -> Theme {
        fs::read_to_string(self.dir.join(THEME_FILE))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    history: Mutex<Vec<ChatMessage>>,
    theme: Mutex<Theme>,
}

impl HistoryStore for MemoryStore {
    fn save_history(&self, records: &[ChatMessage]) -> Result<(), StorageError> {
        *self.history.lock().unwrap_or_else(|e| e.into_inner()) = records.to_vec();
        Ok(())
    }

    fn load_history(&self) -> LoadedHistory {
        LoadedHistory {
            messages: self
                .history
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            fault: None,
        }
    }

    fn save_theme(&self, theme: Theme) -> Result<(), StorageError> {
        *self.theme.lock().unwrap_or_else(|e| e.into_inner()) = theme;
        Ok(())
    }

    fn load_theme(&self) -> Theme {
        *self.theme.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
