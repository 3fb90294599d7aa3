mod scripted;

pub use scripted::{ScriptHandle, ScriptedEngine};

use crate::error::PlaybackError;
use anyhow::{Context, Result};
use rodio::Source;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
#[cfg(unix)]
use std::ffi::CString;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time updates are emitted at least this often while playing.
pub const TIME_UPDATE_INTERVAL: Duration = Duration::from_millis(250);

/// Tags one `load` so its events can be told apart from a superseded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LoadToken(pub u64);

impl LoadToken {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEventKind {
    MetadataReady { duration_seconds: f64 },
    TimeUpdate { position_seconds: f64 },
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineEvent {
    pub token: LoadToken,
    pub kind: EngineEventKind,
}

/// Single-resource transport. No playlist or loop knowledge lives here.
pub trait PlaybackEngine {
    /// Drop whatever is loaded and prepare `bytes` as the new source.
    fn load(&mut self, token: LoadToken, bytes: Arc<[u8]>);
    /// Returns only once playback has started.
    fn play(&mut self) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn stop(&mut self);
    /// Returns the position actually applied after clamping.
    fn seek(&mut self, seconds: f64) -> Result<f64, PlaybackError>;
    fn is_playing(&self) -> bool;
    fn position_seconds(&self) -> Option<f64>;
    fn duration_seconds(&self) -> Option<f64>;
    /// Drain events raised since the last call.
    fn poll_events(&mut self) -> Vec<EngineEvent>;
    fn output_name(&self) -> String;
}

fn clamp_seek(seconds: f64, duration: Option<f64>) -> f64 {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    duration.map_or(seconds, |duration| seconds.min(duration))
}

pub struct RodioPlaybackEngine {
    stream: OutputStream,
    sink: Sink,
    token: Option<LoadToken>,
    payload: Option<Arc<[u8]>>,
    decode_error: Option<String>,
    track_duration: Option<Duration>,
    playing: bool,
    ended_sent: bool,
    last_time_update: Option<Instant>,
    pending: Vec<EngineEvent>,
}

impl RodioPlaybackEngine {
    pub fn new() -> Result<Self> {
        let mut stream = with_silenced_stderr(|| {
            OutputStreamBuilder::from_default_device()
                .context("failed to open default system output stream")
                .and_then(|builder| {
                    builder
                        .with_error_callback(|_| {})
                        .open_stream_or_fallback()
                        .context("failed to start default output stream")
                })
        })?;
        stream.log_on_drop(false);
        let sink = Sink::connect_new(stream.mixer());
        sink.pause();

        Ok(Self {
            stream,
            sink,
            token: None,
            payload: None,
            decode_error: None,
            track_duration: None,
            playing: false,
            ended_sent: false,
            last_time_update: None,
            pending: Vec::new(),
        })
    }

    /// Rebuild the sink from the stored payload. The decoder is consumed as
    /// it plays, so replaying after the end needs a fresh one.
    fn arm(&mut self) -> Result<(), PlaybackError> {
        let payload = self.payload.clone().ok_or(PlaybackError::NoTrackLoaded)?;
        self.sink.stop();
        self.sink = Sink::connect_new(self.stream.mixer());
        self.sink.pause();

        let source = Decoder::try_from(Cursor::new(payload))
            .map_err(|err| PlaybackError::Corrupt(err.to_string()))?;
        self.track_duration = source.total_duration().filter(|duration| !duration.is_zero());
        self.sink.append(source);
        self.ended_sent = false;
        Ok(())
    }

    fn duration_secs(&self) -> Option<f64> {
        self.track_duration.map(|duration| duration.as_secs_f64())
    }
}

impl PlaybackEngine for RodioPlaybackEngine {
    fn load(&mut self, token: LoadToken, bytes: Arc<[u8]>) {
        self.token = Some(token);
        self.payload = Some(bytes);
        self.playing = false;
        self.last_time_update = None;
        self.decode_error = match self.arm() {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(token = token.0, error = %err, "payload did not decode");
                Some(err.to_string())
            }
        };

        if let Some(duration_seconds) = self.duration_secs() {
            self.pending.push(EngineEvent {
                token,
                kind: EngineEventKind::MetadataReady { duration_seconds },
            });
        }
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        if self.token.is_none() {
            return Err(PlaybackError::NoTrackLoaded);
        }
        if let Some(reason) = &self.decode_error {
            return Err(PlaybackError::Corrupt(reason.clone()));
        }
        if self.sink.empty() {
            self.arm()?;
        }

        self.sink.play();
        if self.sink.is_paused() {
            return Err(PlaybackError::Blocked(String::from(
                "output sink refused to start",
            )));
        }
        self.playing = true;
        self.last_time_update = None;
        Ok(())
    }

    fn pause(&mut self) {
        self.sink.pause();
        self.playing = false;
    }

    fn stop(&mut self) {
        self.sink.stop();
        self.sink = Sink::connect_new(self.stream.mixer());
        self.sink.pause();
        self.token = None;
        self.payload = None;
        self.decode_error = None;
        self.track_duration = None;
        self.playing = false;
        self.ended_sent = false;
        self.pending.clear();
    }

    fn seek(&mut self, seconds: f64) -> Result<f64, PlaybackError> {
        if self.token.is_none() {
            return Err(PlaybackError::NoTrackLoaded);
        }
        if let Some(reason) = &self.decode_error {
            return Err(PlaybackError::Corrupt(reason.clone()));
        }
        if self.sink.empty() {
            self.arm()?;
            if self.playing {
                self.sink.play();
            }
        }

        let target = clamp_seek(seconds, self.duration_secs());
        self.sink
            .try_seek(Duration::from_secs_f64(target))
            .map_err(|err| PlaybackError::Blocked(format!("seek failed: {err:?}")))?;
        Ok(target)
    }

    fn is_playing(&self) -> bool {
        self.playing && !self.sink.is_paused()
    }

    fn position_seconds(&self) -> Option<f64> {
        self.token?;
        Some(self.sink.get_pos().as_secs_f64())
    }

    fn duration_seconds(&self) -> Option<f64> {
        self.duration_secs()
    }

    fn poll_events(&mut self) -> Vec<EngineEvent> {
        if let Some(token) = self.token
            && self.playing
        {
            if self.sink.empty() {
                if !self.ended_sent {
                    self.ended_sent = true;
                    self.playing = false;
                    self.pending.push(EngineEvent {
                        token,
                        kind: EngineEventKind::Ended,
                    });
                }
            } else if self
                .last_time_update
                .is_none_or(|at| at.elapsed() >= TIME_UPDATE_INTERVAL)
            {
                self.last_time_update = Some(Instant::now());
                self.pending.push(EngineEvent {
                    token,
                    kind: EngineEventKind::TimeUpdate {
                        position_seconds: self.sink.get_pos().as_secs_f64(),
                    },
                });
            }
        }
        std::mem::take(&mut self.pending)
    }

    fn output_name(&self) -> String {
        String::from("System default output")
    }
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}

/// Logical-clock engine used when no output device is available.
pub struct NullPlaybackEngine {
    token: Option<LoadToken>,
    playing: bool,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
    ended_sent: bool,
    last_time_update: Option<Instant>,
    pending: Vec<EngineEvent>,
}

impl NullPlaybackEngine {
    pub fn new() -> Self {
        Self {
            token: None,
            playing: false,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
            ended_sent: false,
            last_time_update: None,
            pending: Vec::new(),
        }
    }

    fn estimate_duration(bytes: Arc<[u8]>) -> Option<Duration> {
        let source = Decoder::try_from(Cursor::new(bytes)).ok()?;
        source
            .total_duration()
            .filter(|duration| !duration.is_zero())
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if self.playing
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        if let Some(duration) = self.track_duration {
            return position.min(duration);
        }
        position
    }

    fn is_finished(&self) -> bool {
        let Some(duration) = self.track_duration else {
            return false;
        };
        self.token.is_some() && self.playing && self.current_position() >= duration
    }
}

impl Default for NullPlaybackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackEngine for NullPlaybackEngine {
    fn load(&mut self, token: LoadToken, bytes: Arc<[u8]>) {
        self.token = Some(token);
        self.playing = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = Self::estimate_duration(bytes);
        self.ended_sent = false;
        self.last_time_update = None;
        if let Some(duration) = self.track_duration {
            self.pending.push(EngineEvent {
                token,
                kind: EngineEventKind::MetadataReady {
                    duration_seconds: duration.as_secs_f64(),
                },
            });
        }
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        if self.token.is_none() {
            return Err(PlaybackError::NoTrackLoaded);
        }
        if self.ended_sent {
            self.position_offset = Duration::ZERO;
            self.ended_sent = false;
        }
        self.playing = true;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn pause(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
        self.playing = false;
    }

    fn stop(&mut self) {
        self.token = None;
        self.playing = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = None;
        self.ended_sent = false;
        self.pending.clear();
    }

    fn seek(&mut self, seconds: f64) -> Result<f64, PlaybackError> {
        if self.token.is_none() {
            return Err(PlaybackError::NoTrackLoaded);
        }

        let target = clamp_seek(seconds, self.duration_seconds());
        self.position_offset = Duration::from_secs_f64(target);
        self.started_at = self.playing.then(Instant::now);
        self.ended_sent = false;
        Ok(target)
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn position_seconds(&self) -> Option<f64> {
        self.token?;
        Some(self.current_position().as_secs_f64())
    }

    fn duration_seconds(&self) -> Option<f64> {
        self.track_duration.map(|duration| duration.as_secs_f64())
    }

    fn poll_events(&mut self) -> Vec<EngineEvent> {
        if let Some(token) = self.token
            && self.playing
        {
            if self.is_finished() {
                if !self.ended_sent {
                    self.position_offset = self.current_position();
                    self.started_at = None;
                    self.playing = false;
                    self.ended_sent = true;
                    self.pending.push(EngineEvent {
                        token,
                        kind: EngineEventKind::Ended,
                    });
                }
            } else if self
                .last_time_update
                .is_none_or(|at| at.elapsed() >= TIME_UPDATE_INTERVAL)
            {
                self.last_time_update = Some(Instant::now());
                self.pending.push(EngineEvent {
                    token,
                    kind: EngineEventKind::TimeUpdate {
                        position_seconds: self.current_position().as_secs_f64(),
                    },
                });
            }
        }
        std::mem::take(&mut self.pending)
    }

    fn output_name(&self) -> String {
        String::from("Null audio engine")
    }
}
