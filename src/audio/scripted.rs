use super::{EngineEvent, EngineEventKind, LoadToken, PlaybackEngine, clamp_seek};
use crate::error::PlaybackError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const DEFAULT_SCRIPTED_DURATION: f64 = 180.0;

#[derive(Debug, Default)]
struct ScriptState {
    loads: Vec<(LoadToken, Arc<[u8]>)>,
    current: Option<LoadToken>,
    playing: bool,
    position_seconds: f64,
    duration_seconds: Option<f64>,
    /// Duration announced right after each load; `None` keeps metadata back.
    auto_metadata: Option<f64>,
    fail_next_play: Option<PlaybackError>,
    fail_next_seek: Option<PlaybackError>,
    queued: Vec<EngineEvent>,
    play_calls: usize,
    stop_calls: usize,
}

/// Shared view into a [`ScriptedEngine`] that stays usable after the engine
/// has been moved into a controller.
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle(Arc<Mutex<ScriptState>>);

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise an event for the currently loaded resource.
    pub fn emit(&self, kind: EngineEventKind) {
        let mut state = self.lock();
        if let Some(token) = state.current {
            if let EngineEventKind::TimeUpdate { position_seconds } = kind {
                state.position_seconds = position_seconds;
            }
            if kind == EngineEventKind::Ended {
                state.playing = false;
                state.position_seconds = state.duration_seconds.unwrap_or(state.position_seconds);
            }
            state.queued.push(EngineEvent { token, kind });
        }
    }

    /// Raise an event carrying an arbitrary token, e.g. a superseded one.
    pub fn emit_for(&self, token: LoadToken, kind: EngineEventKind) {
        self.lock().queued.push(EngineEvent { token, kind });
    }

    pub fn fail_next_play(&self, err: PlaybackError) {
        self.lock().fail_next_play = Some(err);
    }

    /// The next seek fails with `err` and leaves the position untouched.
    pub fn fail_next_seek(&self, err: PlaybackError) {
        self.lock().fail_next_seek = Some(err);
    }

    pub fn set_auto_metadata(&self, duration_seconds: Option<f64>) {
        self.lock().auto_metadata = duration_seconds;
    }

    pub fn load_count(&self) -> usize {
        self.lock().loads.len()
    }

    pub fn last_loaded(&self) -> Option<Vec<u8>> {
        self.lock().loads.last().map(|(_, bytes)| bytes.to_vec())
    }

    pub fn current_token(&self) -> Option<LoadToken> {
        self.lock().current
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    pub fn position_seconds(&self) -> f64 {
        self.lock().position_seconds
    }

    pub fn play_calls(&self) -> usize {
        self.lock().play_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.lock().stop_calls
    }
}

/// Deterministic engine driven entirely by its [`ScriptHandle`]. Used by
/// the integration tests and the fuzz target.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    handle: ScriptHandle,
}

impl ScriptedEngine {
    pub fn new() -> (Self, ScriptHandle) {
        let handle = ScriptHandle::default();
        handle.set_auto_metadata(Some(DEFAULT_SCRIPTED_DURATION));
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl PlaybackEngine for ScriptedEngine {
    fn load(&mut self, token: LoadToken, bytes: Arc<[u8]>) {
        let mut state = self.handle.lock();
        state.loads.push((token, bytes));
        state.current = Some(token);
        state.playing = false;
        state.position_seconds = 0.0;
        state.duration_seconds = state.auto_metadata;
        if let Some(duration_seconds) = state.auto_metadata {
            state.queued.push(EngineEvent {
                token,
                kind: EngineEventKind::MetadataReady { duration_seconds },
            });
        }
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        let mut state = self.handle.lock();
        state.play_calls += 1;
        if state.current.is_none() {
            return Err(PlaybackError::NoTrackLoaded);
        }
        if let Some(err) = state.fail_next_play.take() {
            return Err(err);
        }
        state.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.handle.lock().playing = false;
    }

    fn stop(&mut self) {
        let mut state = self.handle.lock();
        state.stop_calls += 1;
        state.current = None;
        state.playing = false;
        state.position_seconds = 0.0;
        state.duration_seconds = None;
    }

    fn seek(&mut self, seconds: f64) -> Result<f64, PlaybackError> {
        let mut state = self.handle.lock();
        if state.current.is_none() {
            return Err(PlaybackError::NoTrackLoaded);
        }
        if let Some(err) = state.fail_next_seek.take() {
            return Err(err);
        }
        let target = clamp_seek(seconds, state.duration_seconds);
        state.position_seconds = target;
        Ok(target)
    }

    fn is_playing(&self) -> bool {
        self.handle.lock().playing
    }

    fn position_seconds(&self) -> Option<f64> {
        let state = self.handle.lock();
        state.current.map(|_| state.position_seconds)
    }

    fn duration_seconds(&self) -> Option<f64> {
        self.handle.lock().duration_seconds
    }

    fn poll_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.handle.lock().queued)
    }

    fn output_name(&self) -> String {
        String::from("Scripted engine")
    }
}
