use crate::error::SessionError;
use crate::model::{LoopMode, SessionSettings};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Durable home of [`SessionSettings`], kept apart from the track store.
pub trait SessionStore: Send {
    fn load(&self) -> Result<SessionSettings, SessionError>;
    fn save(&mut self, settings: &SessionSettings) -> Result<(), SessionError>;
}

#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    path: PathBuf,
}

impl JsonSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStore for JsonSessionStore {
    fn load(&self) -> Result<SessionSettings, SessionError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(SessionSettings::default()),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&mut self, settings: &SessionSettings) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemorySessionInner {
    settings: SessionSettings,
    saves: usize,
    failing: bool,
}

/// In-memory settings store. Clones share state, so a test can keep one
/// clone to inspect what the controller persisted.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<MemorySessionInner>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: SessionSettings) -> Self {
        let store = Self::default();
        store.lock().settings = settings;
        store
    }

    fn lock(&self) -> MutexGuard<'_, MemorySessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSettings {
        self.lock().settings.clone()
    }

    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<SessionSettings, SessionError> {
        Ok(self.lock().settings.clone())
    }

    fn save(&mut self, settings: &SessionSettings) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.failing {
            return Err(SessionError::Io(std::io::Error::other("session store offline")));
        }
        inner.settings = settings.clone();
        inner.saves += 1;
        Ok(())
    }
}

/// Live session settings with write-through for selections and modes and a
/// debounced writer for the playback position.
///
/// After the first failed write the session keeps working in memory only;
/// that first error is the only one handed back.
pub struct Session {
    store: Box<dyn SessionStore>,
    settings: SessionSettings,
    flush_interval: Duration,
    last_flush: Option<Instant>,
    dirty: bool,
    degraded: bool,
}

impl Session {
    /// Load settings; an unreadable file falls back to defaults and the
    /// error is returned alongside for reporting.
    pub fn open(
        store: Box<dyn SessionStore>,
        flush_interval: Duration,
    ) -> (Self, Option<SessionError>) {
        let (settings, load_error) = match store.load() {
            Ok(settings) => (settings, None),
            Err(err) => {
                tracing::warn!(error = %err, "session settings unreadable, using defaults");
                (SessionSettings::default(), Some(err))
            }
        };
        let settings = sanitize(settings);
        (
            Self {
                store,
                settings,
                flush_interval,
                last_flush: None,
                dirty: false,
                degraded: false,
            },
            load_error,
        )
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn has_pending_write(&self) -> bool {
        self.dirty
    }

    pub fn set_current_track(&mut self, name: Option<&str>) -> Result<(), SessionError> {
        self.settings.current_track = name.map(str::to_string);
        self.settings.position_seconds = 0.0;
        self.write()
    }

    pub fn clear_track(&mut self) -> Result<(), SessionError> {
        self.set_current_track(None)
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) -> Result<(), SessionError> {
        self.settings.loop_mode = mode;
        self.write()
    }

    pub fn set_random_mode(&mut self, enabled: bool) -> Result<(), SessionError> {
        self.settings.random_mode = enabled;
        self.write()
    }

    /// Persist a position immediately (seek, pause).
    pub fn set_position_now(&mut self, seconds: f64) -> Result<(), SessionError> {
        self.settings.position_seconds = clean_position(seconds);
        self.write()
    }

    /// Record a position from a playback tick; written at most once per
    /// flush interval.
    pub fn record_position(&mut self, seconds: f64, now: Instant) -> Result<(), SessionError> {
        self.settings.position_seconds = clean_position(seconds);
        self.dirty = true;
        let due = self
            .last_flush
            .is_none_or(|at| now.saturating_duration_since(at) >= self.flush_interval);
        if due {
            return self.write_at(now);
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SessionError> {
        if self.dirty {
            return self.write();
        }
        Ok(())
    }

    fn write(&mut self) -> Result<(), SessionError> {
        self.write_at(Instant::now())
    }

    fn write_at(&mut self, now: Instant) -> Result<(), SessionError> {
        self.dirty = false;
        self.last_flush = Some(now);
        if self.degraded {
            return Ok(());
        }
        if let Err(err) = self.store.save(&self.settings) {
            tracing::error!(error = %err, "session settings could not be saved");
            self.degraded = true;
            return Err(err);
        }
        Ok(())
    }
}

fn clean_position(seconds: f64) -> f64 {
    if seconds.is_finite() { seconds.max(0.0) } else { 0.0 }
}

fn sanitize(mut settings: SessionSettings) -> SessionSettings {
    settings.position_seconds = clean_position(settings.position_seconds);
    if settings
        .current_track
        .as_deref()
        .is_some_and(|name| name.trim().is_empty())
    {
        settings.current_track = None;
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_memory(interval: Duration) -> (Session, MemorySessionStore) {
        let store = MemorySessionStore::new();
        let (session, err) = Session::open(Box::new(store.clone()), interval);
        assert!(err.is_none());
        (session, store)
    }

    #[test]
    fn json_store_round_trips_settings() {
        let dir = tempdir().expect("tempdir");
        let mut store = JsonSessionStore::new(dir.path().join("nested").join("session.json"));
        let settings = SessionSettings {
            current_track: Some(String::from("song.mp3")),
            position_seconds: 42.0,
            loop_mode: LoopMode::Playlist,
            random_mode: true,
        };
        store.save(&settings).expect("save");
        assert_eq!(store.load().expect("load"), settings);
    }

    #[test]
    fn missing_json_file_loads_defaults() {
        let dir = tempdir().expect("tempdir");
        let store = JsonSessionStore::new(dir.path().join("session.json"));
        assert_eq!(store.load().expect("load"), SessionSettings::default());
    }

    #[test]
    fn corrupt_json_falls_back_to_defaults_with_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        fs::write(&path, "{ not json").expect("write");
        let (session, err) = Session::open(
            Box::new(JsonSessionStore::new(&path)),
            Duration::from_secs(1),
        );
        assert!(matches!(err, Some(SessionError::Parse(_))));
        assert_eq!(session.settings(), &SessionSettings::default());
    }

    #[test]
    fn selecting_a_track_writes_through_and_resets_position() {
        let (mut session, store) = open_memory(Duration::from_secs(1));
        session.set_position_now(12.0).expect("position");
        session.set_current_track(Some("a.mp3")).expect("track");
        let saved = store.snapshot();
        assert_eq!(saved.current_track.as_deref(), Some("a.mp3"));
        assert_eq!(saved.position_seconds, 0.0);
    }

    #[test]
    fn position_ticks_are_debounced() {
        let (mut session, store) = open_memory(Duration::from_secs(1));
        let start = Instant::now();

        session.record_position(1.0, start).expect("tick");
        assert_eq!(store.save_count(), 1);

        session
            .record_position(1.25, start + Duration::from_millis(250))
            .expect("tick");
        session
            .record_position(1.5, start + Duration::from_millis(500))
            .expect("tick");
        assert_eq!(store.save_count(), 1);
        assert!(session.has_pending_write());

        session
            .record_position(2.0, start + Duration::from_millis(1_000))
            .expect("tick");
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.snapshot().position_seconds, 2.0);
    }

    #[test]
    fn flush_writes_pending_position() {
        let (mut session, store) = open_memory(Duration::from_secs(60));
        let start = Instant::now();
        session.record_position(3.0, start).expect("tick");
        session
            .record_position(4.0, start + Duration::from_millis(10))
            .expect("tick");
        assert_eq!(store.snapshot().position_seconds, 3.0);

        session.flush().expect("flush");
        assert_eq!(store.snapshot().position_seconds, 4.0);
        assert!(!session.has_pending_write());
    }

    #[test]
    fn save_failure_is_reported_once_then_kept_in_memory() {
        let (mut session, store) = open_memory(Duration::from_secs(1));
        store.set_failing(true);

        assert!(session.set_loop_mode(LoopMode::Track).is_err());
        assert!(session.is_degraded());
        assert!(session.set_random_mode(true).is_ok());
        assert_eq!(session.settings().loop_mode, LoopMode::Track);
        assert!(session.settings().random_mode);
    }

    #[test]
    fn negative_and_nan_positions_are_cleaned() {
        let store = MemorySessionStore::with_settings(SessionSettings {
            position_seconds: f64::NAN,
            current_track: Some(String::from("  ")),
            ..SessionSettings::default()
        });
        let (mut session, _) = Session::open(Box::new(store), Duration::from_secs(1));
        assert_eq!(session.settings().position_seconds, 0.0);
        assert_eq!(session.settings().current_track, None);

        session.set_position_now(-5.0).expect("position");
        assert_eq!(session.settings().position_seconds, 0.0);
    }
}
