use crate::audio::{EngineEvent, EngineEventKind, LoadToken, PlaybackEngine};
use crate::config::ControllerOptions;
use crate::error::{LibraryError, PlaybackError, SessionError};
use crate::library::{self, ImportReport, LibraryIndex, UploadItem};
use crate::model::{ControllerState, LoopMode, PlaybackState, Track, is_audio_mime};
use crate::session::{Session, SessionStore};
use crate::status::StatusLog;
use crate::store::{BlobStore, MemoryBlobStore};
use rand::rngs::SmallRng;
use rand::{RngExt, SeedableRng};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Durable,
    /// Memory-only, single track, after the durable store failed.
    Ephemeral,
}

struct FetchResult {
    token: LoadToken,
    name: String,
    result: Result<Track, LibraryError>,
}

struct LoadedTrack {
    name: String,
    mime_type: String,
    payload: Arc<[u8]>,
}

/// Owns the session and drives selection, transport, navigation and resume.
///
/// Every fetch and every engine resource is tagged with a [`LoadToken`];
/// completions and events whose token is not the latest are dropped.
pub struct PlaybackController {
    store: Arc<dyn BlobStore>,
    storage_mode: StorageMode,
    index: LibraryIndex,
    session: Session,
    engine: Box<dyn PlaybackEngine>,
    status: StatusLog,
    options: ControllerOptions,
    state: ControllerState,
    current: Option<String>,
    token: LoadToken,
    loaded: Option<(LoadToken, LoadedTrack)>,
    play_when_loaded: bool,
    start_position: Option<f64>,
    position_seconds: f64,
    duration_seconds: f64,
    fetch_tx: Sender<FetchResult>,
    fetch_rx: Receiver<FetchResult>,
    rng: SmallRng,
    last_ui_tick: Option<Instant>,
    redraw: bool,
}

impl PlaybackController {
    pub fn new(
        store: Arc<dyn BlobStore>,
        session_store: Box<dyn SessionStore>,
        engine: Box<dyn PlaybackEngine>,
        options: ControllerOptions,
    ) -> Self {
        Self::start(store, StorageMode::Durable, None, session_store, engine, options)
    }

    /// Start without durable storage; the reason is reported once.
    pub fn new_ephemeral(
        storage_error: LibraryError,
        session_store: Box<dyn SessionStore>,
        engine: Box<dyn PlaybackEngine>,
        options: ControllerOptions,
    ) -> Self {
        Self::start(
            Arc::new(MemoryBlobStore::new()),
            StorageMode::Ephemeral,
            Some(storage_error),
            session_store,
            engine,
            options,
        )
    }

    fn start(
        store: Arc<dyn BlobStore>,
        storage_mode: StorageMode,
        storage_error: Option<LibraryError>,
        session_store: Box<dyn SessionStore>,
        engine: Box<dyn PlaybackEngine>,
        options: ControllerOptions,
    ) -> Self {
        let (session, session_error) = Session::open(session_store, options.position_flush_interval);
        let (fetch_tx, fetch_rx) = mpsc::channel();
        let rng = match options.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_rng(&mut rand::rng()),
        };

        let mut controller = Self {
            store,
            storage_mode,
            index: LibraryIndex::default(),
            session,
            engine,
            status: StatusLog::new(options.status_capacity),
            options,
            state: ControllerState::Idle,
            current: None,
            token: LoadToken::default(),
            loaded: None,
            play_when_loaded: false,
            start_position: None,
            position_seconds: 0.0,
            duration_seconds: 0.0,
            fetch_tx,
            fetch_rx,
            rng,
            last_ui_tick: None,
            redraw: true,
        };

        if let Some(err) = storage_error {
            controller.report_storage_fallback(&err);
        } else {
            controller.status.info("Database ready");
        }
        if let Some(err) = session_error {
            controller
                .status
                .error(format!("Settings unreadable: {err} (using defaults)"));
        }

        controller.refresh_index();
        controller.restore_modes();
        controller.resume_last_track();
        controller
    }

    fn restore_modes(&mut self) {
        let settings = self.session.settings();
        let loop_mode = settings.loop_mode;
        let random_mode = settings.random_mode;
        if loop_mode != LoopMode::None {
            self.status.info(format!(
                "Looping: {} (loaded from storage)",
                loop_mode.label()
            ));
        }
        if random_mode {
            self.status
                .info("Random playback enabled (loaded from storage)");
        }
    }

    /// Reload the persisted track paused at its persisted position, or
    /// settle in Idle when there is nothing valid to resume.
    fn resume_last_track(&mut self) {
        let saved = self.session.settings().current_track.clone();
        let position = self.session.settings().position_seconds;

        let Some(name) = saved.filter(|name| self.index.contains(name)) else {
            if self.session.settings().current_track.is_some() {
                let cleared = self.session.clear_track();
                self.persist(cleared);
            }
            self.status.info("No valid track to resume");
            return;
        };

        self.begin_load(&name);
        self.start_position = Some(position);
        let token = self.token;
        let result = self.store.get(&name);
        self.complete_fetch(FetchResult {
            token,
            name: name.clone(),
            result,
        });
        if self.state == ControllerState::Paused {
            self.status.info(format!(
                "Loaded: {name} at {}s (press Play)",
                self.position_seconds.floor()
            ));
        }
    }

    pub fn state(&self) -> PlaybackState {
        let current_index = self
            .current
            .as_deref()
            .and_then(|name| self.index.index_of(name));
        let current_track_name = current_index.and(self.current.clone());
        let duration_seconds = self.duration_seconds.max(0.0);
        let position_seconds = if duration_seconds > 0.0 {
            self.position_seconds.clamp(0.0, duration_seconds)
        } else {
            self.position_seconds.max(0.0)
        };
        PlaybackState {
            current_index,
            current_track_name,
            position_seconds,
            duration_seconds,
            is_playing: self.state == ControllerState::Playing,
            loop_mode: self.session.settings().loop_mode,
            random_mode: self.session.settings().random_mode,
        }
    }

    pub fn controller_state(&self) -> ControllerState {
        self.state
    }

    pub fn library(&self) -> &LibraryIndex {
        &self.index
    }

    pub fn status(&self) -> &StatusLog {
        &self.status
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.storage_mode
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.session.settings().loop_mode
    }

    pub fn random_mode(&self) -> bool {
        self.session.settings().random_mode
    }

    pub fn output_name(&self) -> String {
        self.engine.output_name()
    }

    /// True once per batch of visible changes; time updates are throttled.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.redraw)
    }

    pub fn select_track(&mut self, name: &str) {
        self.begin_load(name);
        self.spawn_fetch(name.to_string());
    }

    fn begin_load(&mut self, name: &str) {
        self.token = self.token.next();
        if self.state == ControllerState::Playing {
            self.engine.pause();
        }
        self.state = ControllerState::Loading;
        self.current = Some(name.to_string());
        self.play_when_loaded = false;
        self.start_position = None;
        self.position_seconds = 0.0;
        self.duration_seconds = 0.0;
        self.redraw = true;
        tracing::debug!(track = %name, token = self.token.0, "loading track");
    }

    fn spawn_fetch(&mut self, name: String) {
        let token = self.token;
        let store = Arc::clone(&self.store);
        let tx = self.fetch_tx.clone();
        let worker_name = name.clone();
        let spawned = thread::Builder::new()
            .name(String::from("reelbox-fetch"))
            .spawn(move || {
                let result = store.get(&worker_name);
                let _ = tx.send(FetchResult {
                    token,
                    name: worker_name,
                    result,
                });
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "fetch worker unavailable, loading inline");
            let result = self.store.get(&name);
            self.complete_fetch(FetchResult {
                token,
                name,
                result,
            });
        }
    }

    /// Select `name` and start it as soon as it is loaded.
    pub fn play_track(&mut self, name: &str) {
        self.begin_load(name);
        self.play_when_loaded = true;
        self.spawn_fetch(name.to_string());
    }

    pub fn notify(&mut self, message: impl Into<String>) {
        self.status.info(message);
        self.redraw = true;
    }

    pub fn notify_error(&mut self, message: impl Into<String>) {
        self.status.error(message);
        self.redraw = true;
    }

    fn complete_fetch(&mut self, fetch: FetchResult) {
        if fetch.token != self.token {
            tracing::debug!(track = %fetch.name, token = fetch.token.0, "discarding stale fetch");
            return;
        }

        let track = match fetch.result {
            Ok(track) => track,
            Err(err) => {
                self.fail_selection(&fetch.name, err);
                return;
            }
        };

        let payload: Arc<[u8]> = Arc::from(track.payload);
        self.engine.load(fetch.token, Arc::clone(&payload));
        self.loaded = Some((
            fetch.token,
            LoadedTrack {
                name: track.name.clone(),
                mime_type: track.mime_type,
                payload,
            },
        ));
        self.state = ControllerState::Paused;
        self.redraw = true;
        if let Some(duration_seconds) = self.engine.duration_seconds() {
            self.duration_seconds = duration_seconds.max(0.0);
        }

        if self.session.settings().current_track.as_deref() != Some(track.name.as_str()) {
            let saved = self.session.set_current_track(Some(&track.name));
            self.persist(saved);
        }

        let start = self.start_position.take().unwrap_or(0.0);
        let mut seek_failed = false;
        if start > 0.0 {
            match self.engine.seek(start) {
                Ok(applied) => self.position_seconds = applied,
                Err(err) => {
                    // The stored position stays as the resume point.
                    seek_failed = true;
                    self.status.error(format!("Playback error: {err}"));
                }
            }
        }
        if !seek_failed && self.session.settings().position_seconds != self.position_seconds {
            let saved = self.session.set_position_now(self.position_seconds);
            self.persist(saved);
        }

        if self.play_when_loaded {
            self.play_when_loaded = false;
            self.start_playback();
        } else if start <= 0.0 {
            self.status.info(format!("Loaded: {}", track.name));
        }
    }

    fn fail_selection(&mut self, name: &str, err: LibraryError) {
        tracing::warn!(track = %name, error = %err, "track selection failed");
        self.clear_active();
        match &err {
            LibraryError::NotFound(_) => {
                self.status.error(format!("Failed to load {name}: not found"));
                self.refresh_index();
            }
            LibraryError::Storage(_) => {
                // One unreadable record; the rest of the store may be fine.
                self.status.error(format!("Failed to load {name}: {err}"));
                self.refresh_index();
            }
            LibraryError::Validation { .. } => {
                self.status.error(format!("Failed to load {name}: {err}"));
            }
        }
    }

    fn clear_active(&mut self) {
        self.token = self.token.next();
        self.engine.stop();
        self.state = ControllerState::Idle;
        self.current = None;
        self.loaded = None;
        self.play_when_loaded = false;
        self.start_position = None;
        self.position_seconds = 0.0;
        self.duration_seconds = 0.0;
        self.redraw = true;
        if self.session.settings().current_track.is_some() {
            let cleared = self.session.clear_track();
            self.persist(cleared);
        }
    }

    pub fn play(&mut self) {
        match self.state {
            ControllerState::Playing => {}
            ControllerState::Loading => self.play_when_loaded = true,
            ControllerState::Paused => self.start_playback(),
            ControllerState::Idle => match self.index.name_at(0).map(str::to_string) {
                Some(first) => self.play_track(&first),
                None => self.status.info("No song loaded to play"),
            },
        }
    }

    fn start_playback(&mut self) {
        let name = self.current.clone().unwrap_or_default();
        match self.engine.play() {
            Ok(()) => {
                self.state = ControllerState::Playing;
                self.status.info(format!("Playing: {name}"));
            }
            Err(err) => {
                self.state = ControllerState::Paused;
                self.report_playback_error(&err);
            }
        }
        self.redraw = true;
    }

    fn report_playback_error(&mut self, err: &PlaybackError) {
        tracing::warn!(error = %err, "engine refused to play");
        self.status.error(format!("Playback error: {err}"));
    }

    pub fn pause(&mut self) {
        match self.state {
            ControllerState::Playing => {
                self.engine.pause();
                if let Some(position) = self.engine.position_seconds() {
                    self.position_seconds = self.clamp_position(position);
                }
                self.state = ControllerState::Paused;
                let saved = self.session.set_position_now(self.position_seconds);
                self.persist(saved);
                self.status.info("Paused");
                self.redraw = true;
            }
            ControllerState::Loading => self.play_when_loaded = false,
            ControllerState::Paused | ControllerState::Idle => {}
        }
    }

    /// The single play/pause gesture.
    pub fn toggle_play_pause(&mut self) {
        let wants_playback = self.state == ControllerState::Playing
            || (self.state == ControllerState::Loading && self.play_when_loaded);
        if wants_playback {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn seek(&mut self, seconds: f64) {
        match self.state {
            ControllerState::Idle => self.status.info("No song loaded to seek"),
            ControllerState::Loading => self.start_position = Some(seconds.max(0.0)),
            ControllerState::Paused | ControllerState::Playing => match self.engine.seek(seconds) {
                Ok(applied) => {
                    self.position_seconds = applied;
                    let saved = self.session.set_position_now(applied);
                    self.persist(saved);
                    self.status.info(format!("Seek to {}s", applied.floor()));
                    self.redraw = true;
                }
                Err(err) => self.report_playback_error(&err),
            },
        }
    }

    pub fn seek_relative(&mut self, delta_seconds: f64) {
        self.seek(self.position_seconds + delta_seconds);
    }

    fn clamp_position(&self, seconds: f64) -> f64 {
        if self.duration_seconds > 0.0 {
            seconds.clamp(0.0, self.duration_seconds)
        } else {
            seconds.max(0.0)
        }
    }

    fn current_index(&self) -> Option<usize> {
        self.current
            .as_deref()
            .and_then(|name| self.index.index_of(name))
    }

    pub fn next(&mut self) {
        let len = self.index.len();
        if len == 0 {
            return;
        }
        let target = if self.session.settings().random_mode {
            self.rng.random_range(0..len)
        } else {
            self.current_index().map_or(0, |index| (index + 1) % len)
        };
        self.play_index(target);
    }

    pub fn previous(&mut self) {
        let len = self.index.len();
        if len == 0 {
            return;
        }
        let target = self
            .current_index()
            .map_or(len - 1, |index| (index + len - 1) % len);
        self.play_index(target);
    }

    fn play_index(&mut self, index: usize) {
        if let Some(name) = self.index.name_at(index).map(str::to_string) {
            self.play_track(&name);
        }
    }

    pub fn remove_track(&mut self, name: &str) {
        if let Err(err) = self.store.delete(name) {
            self.status.error(format!("Failed to remove {name}: {err}"));
            if err.is_storage() {
                self.enter_ephemeral_mode(&err);
            }
            return;
        }

        if self.current.as_deref() == Some(name) {
            self.clear_active();
        }
        self.status.info(format!("Removed: {name}"));
        self.refresh_index();
        self.status.info("Song list updated");
    }

    /// Store a batch of uploads. Bad items are skipped with a reason; the
    /// rest still land.
    pub fn import(&mut self, items: Vec<UploadItem>) -> ImportReport {
        if items.is_empty() {
            self.status.info("No audio files selected");
            return ImportReport::default();
        }
        if self.storage_mode == StorageMode::Ephemeral {
            return self.import_temporary(items);
        }

        self.status.info("Saving files...");
        let report = library::import_batch(self.store.as_ref(), &items);
        for name in &report.saved {
            self.status.info(format!("Saved: {name}"));
        }
        for (name, reason) in &report.skipped {
            self.status.info(format!("Skipped {name} ({reason})"));
        }

        if let Some(err) = report.storage_failure.clone() {
            self.enter_ephemeral_mode(&err);
            let fallback = self.import_temporary(items);
            return ImportReport {
                saved: fallback.saved,
                skipped: fallback.skipped,
                storage_failure: report.storage_failure,
            };
        }

        self.refresh_index();
        self.status.info("Song list updated");
        report
    }

    /// Ephemeral mode keeps a single track: the first valid upload replaces
    /// whatever was there and starts playing.
    fn import_temporary(&mut self, items: Vec<UploadItem>) -> ImportReport {
        let mut report = ImportReport::default();
        let mut chosen = None;
        for item in items {
            if chosen.is_none() && is_audio_mime(&item.mime_type) {
                chosen = Some(item);
            } else if is_audio_mime(&item.mime_type) {
                report
                    .skipped
                    .push((item.file_name, String::from("temporary mode holds one track")));
            } else {
                report
                    .skipped
                    .push((item.file_name, String::from("not an audio file")));
            }
        }
        for (name, reason) in &report.skipped {
            self.status.info(format!("Skipped {name} ({reason})"));
        }

        let Some(item) = chosen else {
            self.status.info("No audio files selected");
            return report;
        };

        self.clear_active();
        let memory = MemoryBlobStore::new();
        if let Err(err) = memory.put(&item.file_name, &item.bytes, &item.mime_type) {
            report.skipped.push((item.file_name, err.to_string()));
            return report;
        }
        self.store = Arc::new(memory);
        self.refresh_index();
        self.status.info("Storage unavailable; playing first file temporarily");
        report.saved.push(item.file_name.clone());
        self.play_track(&item.file_name);
        report
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        let saved = self.session.set_loop_mode(mode);
        self.persist(saved);
        self.status.info(format!("Looping: {}", mode.label()));
        self.redraw = true;
    }

    pub fn cycle_loop_mode(&mut self) {
        self.set_loop_mode(self.loop_mode().next());
    }

    pub fn set_random_mode(&mut self, enabled: bool) {
        let saved = self.session.set_random_mode(enabled);
        self.persist(saved);
        self.status.info(if enabled {
            "Random playback enabled"
        } else {
            "Random playback disabled"
        });
        self.redraw = true;
    }

    pub fn toggle_random(&mut self) {
        self.set_random_mode(!self.random_mode());
    }

    /// Apply finished fetches and engine events. Call regularly from the
    /// owning loop.
    pub fn pump(&mut self) {
        while let Ok(fetch) = self.fetch_rx.try_recv() {
            self.complete_fetch(fetch);
        }
        for event in self.engine.poll_events() {
            self.handle_engine_event(event);
        }
    }

    /// Block until the in-flight selection settles or `timeout` passes.
    /// Returns false on timeout.
    pub fn wait_for_load(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.state == ControllerState::Loading {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.fetch_rx.recv_timeout(remaining) {
                Ok(fetch) => self.complete_fetch(fetch),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.pump();
        self.state != ControllerState::Loading
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        let live = self.loaded.as_ref().map(|(token, _)| *token) == Some(event.token)
            && event.token == self.token;
        if !live {
            tracing::trace!(token = event.token.0, kind = ?event.kind, "discarding stale engine event");
            return;
        }

        match event.kind {
            EngineEventKind::MetadataReady { duration_seconds } => {
                self.duration_seconds = duration_seconds.max(0.0);
                self.position_seconds = self.position_seconds.min(self.duration_seconds);
                self.redraw = true;
            }
            EngineEventKind::TimeUpdate { position_seconds } => {
                self.position_seconds = self.clamp_position(position_seconds);
                let now = Instant::now();
                let saved = self.session.record_position(self.position_seconds, now);
                self.persist(saved);
                let due = self.last_ui_tick.is_none_or(|at| {
                    now.saturating_duration_since(at) >= self.options.ui_tick_interval
                });
                if due {
                    self.last_ui_tick = Some(now);
                    self.redraw = true;
                }
            }
            EngineEventKind::Ended => self.handle_ended(),
        }
    }

    fn handle_ended(&mut self) {
        let Some(name) = self.current.clone() else {
            return;
        };
        tracing::debug!(track = %name, mode = ?self.loop_mode(), "track ended");
        match self.loop_mode() {
            LoopMode::Track => self.play_track(&name),
            LoopMode::Playlist => self.next(),
            LoopMode::None => {
                self.state = ControllerState::Paused;
                if self.duration_seconds > 0.0 {
                    self.position_seconds = self.duration_seconds;
                }
                let saved = self.session.set_position_now(self.position_seconds);
                self.persist(saved);
                self.redraw = true;
            }
        }
    }

    /// Rebuild the index from the store so it matches durable state.
    pub fn refresh_index(&mut self) {
        match LibraryIndex::rebuild(self.store.as_ref()) {
            Ok(index) => {
                self.index = index;
                self.redraw = true;
            }
            Err(err) => {
                self.status.error(format!("Failed to fetch songs: {err}"));
                self.enter_ephemeral_mode(&err);
            }
        }
    }

    fn enter_ephemeral_mode(&mut self, err: &LibraryError) {
        if self.storage_mode == StorageMode::Ephemeral {
            return;
        }
        self.storage_mode = StorageMode::Ephemeral;
        self.report_storage_fallback(err);

        let memory = MemoryBlobStore::new();
        let keep = self
            .loaded
            .as_ref()
            .filter(|_| self.state != ControllerState::Loading)
            .map(|(_, track)| track);
        if let Some(track) = keep
            && let Err(put_err) = memory.put(&track.name, &track.payload, &track.mime_type)
        {
            tracing::warn!(error = %put_err, "could not keep active track in memory");
        }
        self.store = Arc::new(memory);

        match LibraryIndex::rebuild(self.store.as_ref()) {
            Ok(index) => self.index = index,
            Err(rebuild_err) => {
                tracing::error!(error = %rebuild_err, "memory store unreadable");
                self.index = LibraryIndex::default();
            }
        }
        if self
            .current
            .as_deref()
            .is_some_and(|name| !self.index.contains(name))
        {
            self.clear_active();
        }
        self.redraw = true;
    }

    fn report_storage_fallback(&mut self, err: &LibraryError) {
        tracing::error!(error = %err, "durable storage unavailable");
        self.status.error(format!(
            "Error setting up storage: {err} (falling back to temporary playback)"
        ));
    }

    fn persist(&mut self, result: Result<(), SessionError>) {
        if let Err(err) = result {
            self.status.error(format!(
                "Settings could not be saved: {err} (continuing without saving)"
            ));
        }
    }

    /// Flush the session before exit. Playback is paused, not reset.
    pub fn shutdown(&mut self) {
        if self.state == ControllerState::Playing {
            self.pause();
        }
        let flushed = self.session.flush();
        self.persist(flushed);
        tracing::info!("controller shut down");
    }
}
