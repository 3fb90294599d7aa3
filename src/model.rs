use serde::{Deserialize, Serialize};

pub const AUDIO_MIME_PREFIX: &str = "audio/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LoopMode {
    #[default]
    None,
    Track,
    Playlist,
}

impl LoopMode {
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Track,
            Self::Track => Self::Playlist,
            Self::Playlist => Self::None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "off",
            Self::Track => "track",
            Self::Playlist => "playlist",
        }
    }
}

/// A stored audio payload keyed by its unique name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub name: String,
    pub payload: Vec<u8>,
    pub mime_type: String,
}

impl Track {
    pub fn new(name: impl Into<String>, payload: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload,
            mime_type: mime_type.into(),
        }
    }
}

pub fn is_audio_mime(mime_type: &str) -> bool {
    mime_type.starts_with(AUDIO_MIME_PREFIX)
}

/// Settings that survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub current_track: Option<String>,
    #[serde(default)]
    pub position_seconds: f64,
    #[serde(default)]
    pub loop_mode: LoopMode,
    #[serde(default)]
    pub random_mode: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            current_track: None,
            position_seconds: 0.0,
            loop_mode: LoopMode::None,
            random_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Loading,
    Paused,
    Playing,
}

/// Read-side snapshot handed to renderers.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub current_index: Option<usize>,
    pub current_track_name: Option<String>,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub is_playing: bool,
    pub loop_mode: LoopMode,
    pub random_mode: bool,
}
