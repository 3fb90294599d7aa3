use thiserror::Error;

/// Failures raised by the track store and the import path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LibraryError {
    #[error("{name} is not an audio file ({mime_type})")]
    Validation { name: String, mime_type: String },
    #[error("track not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl LibraryError {
    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{context}: {err}"))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Failures raised by the playback engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("no track loaded")]
    NoTrackLoaded,
    #[error("playback blocked: {0}")]
    Blocked(String),
    #[error("cannot decode track: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to access session file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse session file: {0}")]
    Parse(#[from] serde_json::Error),
}
