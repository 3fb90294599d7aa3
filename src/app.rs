use crate::audio::{NullPlaybackEngine, PlaybackEngine, RodioPlaybackEngine};
use crate::config::{self, ControllerOptions};
use crate::core::PlaybackController;
use crate::library;
use crate::logging;
use crate::model::LoopMode;
use crate::session::JsonSessionStore;
use crate::store::DirBlobStore;
use crate::ui::{self, ViewState};
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io::{Stdout, stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SEEK_STEP_SECONDS: f64 = 5.0;

#[derive(Debug, Default)]
pub struct AppStartupOptions {
    pub data_dir: Option<PathBuf>,
    pub imports: Vec<PathBuf>,
    pub remove: Vec<String>,
    pub list: bool,
}

impl AppStartupOptions {
    /// `--list` and `--remove` print and exit; plain imports open the player.
    pub fn exits_after_batch(&self) -> bool {
        self.list || !self.remove.is_empty()
    }
}

pub fn run_with_startup(options: AppStartupOptions) -> Result<()> {
    let root = match &options.data_dir {
        Some(dir) => dir.clone(),
        None => config::data_root()?,
    };
    config::ensure_data_dir(&root)?;
    let _log_guard = match logging::init_logging(&config::log_dir(&root)) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("logging disabled: {err:#}");
            None
        }
    };
    tracing::info!(root = %root.display(), "starting reelbox");

    if options.exits_after_batch() {
        let controller = open_controller(&root, Box::new(NullPlaybackEngine::new()));
        return run_batch(controller, &options);
    }

    let (engine, engine_error): (Box<dyn PlaybackEngine>, _) = match RodioPlaybackEngine::new() {
        Ok(engine) => (Box::new(engine), None),
        Err(err) => (Box::new(NullPlaybackEngine::new()), Some(err)),
    };
    let mut controller = open_controller(&root, engine);
    if let Some(err) = engine_error {
        tracing::warn!(error = %format!("{err:#}"), "audio output unavailable");
        controller.notify_error(format!("Audio output unavailable: {err:#} (silent playback)"));
    }
    if !options.imports.is_empty() {
        let items = collect_items(&mut controller, &options.imports);
        controller.import(items);
    }
    run_tui(controller)
}

fn open_controller(root: &Path, engine: Box<dyn PlaybackEngine>) -> PlaybackController {
    let session = Box::new(JsonSessionStore::new(config::session_path(root)));
    let options = ControllerOptions::default();
    match DirBlobStore::open(&config::tracks_dir(root)) {
        Ok(store) => PlaybackController::new(Arc::new(store), session, engine, options),
        Err(err) => PlaybackController::new_ephemeral(err, session, engine, options),
    }
}

fn run_batch(mut controller: PlaybackController, options: &AppStartupOptions) -> Result<()> {
    if !options.imports.is_empty() {
        let (items, unreadable) = library::collect_upload_items(&options.imports);
        for (name, reason) in &unreadable {
            eprintln!("could not read {name}: {reason}");
        }
        let report = controller.import(items);
        for name in &report.saved {
            println!("saved    {name}");
        }
        for (name, reason) in &report.skipped {
            println!("skipped  {name} ({reason})");
        }
        if let Some(err) = &report.storage_failure {
            anyhow::bail!("storage unavailable: {err}");
        }
    }

    for name in &options.remove {
        if controller.library().contains(name) {
            controller.remove_track(name);
            println!("removed  {name}");
        } else {
            eprintln!("no track named {name}");
        }
    }

    if options.list {
        for name in controller.library().names() {
            println!("{name}");
        }
    }

    controller.shutdown();
    Ok(())
}

fn run_tui(mut controller: PlaybackController) -> Result<()> {
    let result = enable_raw_mode()
        .map_err(anyhow::Error::from)
        .and_then(|()| {
            let mut out = stdout();
            execute!(out, EnterAlternateScreen)?;
            let mut terminal = Terminal::new(CrosstermBackend::new(out))?;
            terminal.clear()?;
            let looped = event_loop(&mut terminal, &mut controller);
            let _ = terminal.show_cursor();
            looped
        });
    let restored = restore_terminal();
    finish_session(&mut controller, result.and(restored))
}

/// Undo raw mode and the alternate screen. Both steps run even if one fails.
fn restore_terminal() -> Result<()> {
    let raw = disable_raw_mode();
    let screen = execute!(stdout(), LeaveAlternateScreen);
    raw?;
    screen?;
    Ok(())
}

/// Save what the session still holds, whatever ended the UI.
fn finish_session(controller: &mut PlaybackController, result: Result<()>) -> Result<()> {
    if let Err(err) = &result {
        tracing::error!(error = %err, "terminal loop failed");
    }
    controller.shutdown();
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    controller: &mut PlaybackController,
) -> Result<()> {
    let mut view = ViewState::default();
    let mut last_tick = Instant::now();
    let mut dirty = true;
    let tick = ControllerOptions::default().ui_tick_interval;

    loop {
        controller.pump();

        if controller.take_redraw() || dirty || last_tick.elapsed() > tick {
            clamp_selection(controller, &mut view);
            terminal.draw(|frame| ui::draw(frame, &*controller, &view))?;
            dirty = false;
            last_tick = Instant::now();
        }

        if !event::poll(Duration::from_millis(33))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        dirty = true;

        if view.command_mode {
            match key.code {
                KeyCode::Esc => {
                    view.command_mode = false;
                    view.command_buffer.clear();
                }
                KeyCode::Enter => {
                    let command = std::mem::take(&mut view.command_buffer);
                    view.command_mode = false;
                    run_command(controller, &command);
                }
                KeyCode::Backspace => {
                    view.command_buffer.pop();
                }
                KeyCode::Char(ch) => view.command_buffer.push(ch),
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
            KeyCode::Char('q') => return Ok(()),
            KeyCode::Down => view.selected = view.selected.saturating_add(1),
            KeyCode::Up => view.selected = view.selected.saturating_sub(1),
            KeyCode::Enter => {
                if let Some(name) = controller.library().name_at(view.selected).map(str::to_string) {
                    controller.play_track(&name);
                }
            }
            KeyCode::Delete => {
                if let Some(name) = controller.library().name_at(view.selected).map(str::to_string) {
                    controller.remove_track(&name);
                }
            }
            KeyCode::Char(' ') => controller.toggle_play_pause(),
            KeyCode::Char('n') => controller.next(),
            KeyCode::Char('p') => controller.previous(),
            KeyCode::Left => controller.seek_relative(-SEEK_STEP_SECONDS),
            KeyCode::Right => controller.seek_relative(SEEK_STEP_SECONDS),
            KeyCode::Char('l') => controller.cycle_loop_mode(),
            KeyCode::Char('r') => controller.toggle_random(),
            KeyCode::Char(':') => view.command_mode = true,
            _ => {}
        }
    }
}

fn clamp_selection(controller: &PlaybackController, view: &mut ViewState) {
    let len = controller.library().len();
    view.selected = view.selected.min(len.saturating_sub(1));
}

fn collect_items(
    controller: &mut PlaybackController,
    paths: &[PathBuf],
) -> Vec<library::UploadItem> {
    let (items, unreadable) = library::collect_upload_items(paths);
    for (name, reason) in unreadable {
        controller.notify_error(format!("Could not read {name}: {reason}"));
    }
    items
}

fn run_command(controller: &mut PlaybackController, raw: &str) {
    let input = raw.trim();
    if input.is_empty() {
        controller.notify("No command");
        return;
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    match command {
        "help" => controller.notify(
            "Commands: import <path> | seek <seconds> | remove <name> | play <name> | loop <off|track|playlist> | random <on|off>",
        ),
        "import" => {
            if rest.is_empty() {
                controller.notify("Usage: import <path>");
                return;
            }
            let items = collect_items(controller, &[PathBuf::from(rest)]);
            controller.import(items);
        }
        "seek" => match rest.parse::<f64>() {
            Ok(seconds) if seconds.is_finite() => controller.seek(seconds),
            _ => controller.notify("Usage: seek <seconds>"),
        },
        "remove" | "play" if rest.is_empty() => {
            controller.notify(format!("Usage: {command} <name>"));
        }
        "remove" | "play" if !controller.library().contains(rest) => {
            controller.notify_error(format!("No track named {rest}"));
        }
        "remove" => controller.remove_track(rest),
        "play" => controller.play_track(rest),
        "loop" => {
            let mode = match rest {
                "off" => LoopMode::None,
                "track" => LoopMode::Track,
                "playlist" => LoopMode::Playlist,
                _ => {
                    controller.notify("Usage: loop <off|track|playlist>");
                    return;
                }
            };
            controller.set_loop_mode(mode);
        }
        "random" => match rest {
            "on" => controller.set_random_mode(true),
            "off" => controller.set_random_mode(false),
            _ => controller.notify("Usage: random <on|off>"),
        },
        _ => controller.notify("Unknown command. Use :help"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ScriptedEngine;
    use crate::model::ControllerState;
    use crate::session::MemorySessionStore;
    use crate::store::{BlobStore, MemoryBlobStore};
    use tempfile::tempdir;

    fn controller_with(names: &[&str]) -> PlaybackController {
        let store = MemoryBlobStore::new();
        for name in names {
            store.put(name, b"x", "audio/mpeg").expect("seed");
        }
        let (engine, _handle) = ScriptedEngine::new();
        PlaybackController::new(
            Arc::new(store),
            Box::new(MemorySessionStore::new()),
            Box::new(engine),
            ControllerOptions::default(),
        )
    }

    #[test]
    fn failed_terminal_loop_still_saves_the_session() {
        let store = MemoryBlobStore::new();
        store.put("song.mp3", b"x", "audio/mpeg").expect("seed");
        let session = MemorySessionStore::new();
        let (engine, handle) = ScriptedEngine::new();
        let mut controller = PlaybackController::new(
            Arc::new(store),
            Box::new(session.clone()),
            Box::new(engine),
            ControllerOptions::default(),
        );
        controller.play_track("song.mp3");
        assert!(controller.wait_for_load(Duration::from_secs(5)));
        handle.emit(crate::audio::EngineEventKind::TimeUpdate { position_seconds: 7.0 });
        controller.pump();

        let result = finish_session(&mut controller, Err(anyhow::anyhow!("terminal went away")));

        assert!(result.is_err());
        assert_eq!(controller.controller_state(), ControllerState::Paused);
        assert_eq!(session.snapshot().current_track.as_deref(), Some("song.mp3"));
        assert_eq!(session.snapshot().position_seconds, 7.0);
    }

    #[test]
    fn unknown_command_is_reported() {
        let mut controller = controller_with(&[]);
        run_command(&mut controller, "wat");
        assert!(controller.status().contains("Unknown command"));
    }

    #[test]
    fn import_command_accepts_paths_with_spaces() {
        let dir = tempdir().expect("tempdir");
        let folder = dir.path().join("Music Folder");
        std::fs::create_dir_all(&folder).expect("mkdir");
        std::fs::write(folder.join("one.mp3"), b"1").expect("write");
        std::fs::write(folder.join("notes.txt"), b"n").expect("write");

        let mut controller = controller_with(&[]);
        run_command(&mut controller, &format!("import {}", folder.display()));

        assert_eq!(controller.library().names(), &["one.mp3"]);
        assert!(controller.status().contains("Skipped notes.txt"));
    }

    #[test]
    fn seek_command_rejects_garbage() {
        let mut controller = controller_with(&["a.mp3"]);
        run_command(&mut controller, "seek soon");
        assert!(controller.status().contains("Usage: seek"));
    }

    #[test]
    fn remove_command_checks_the_library() {
        let mut controller = controller_with(&["a.mp3"]);
        run_command(&mut controller, "remove b.mp3");
        assert!(controller.status().contains("No track named b.mp3"));

        run_command(&mut controller, "remove a.mp3");
        assert!(controller.library().is_empty());
    }

    #[test]
    fn play_command_loads_named_track() {
        let mut controller = controller_with(&["a.mp3", "b.mp3"]);
        run_command(&mut controller, "play b.mp3");
        assert!(controller.wait_for_load(Duration::from_secs(5)));
        assert_eq!(controller.controller_state(), ControllerState::Playing);
        assert_eq!(
            controller.state().current_track_name.as_deref(),
            Some("b.mp3")
        );
    }

    #[test]
    fn loop_and_random_commands_set_modes() {
        let mut controller = controller_with(&[]);
        run_command(&mut controller, "loop playlist");
        run_command(&mut controller, "random on");
        assert_eq!(controller.loop_mode(), LoopMode::Playlist);
        assert!(controller.random_mode());

        run_command(&mut controller, "loop sometimes");
        assert!(controller.status().contains("Usage: loop"));
    }

    #[test]
    fn only_list_and_remove_skip_the_player() {
        assert!(!AppStartupOptions::default().exits_after_batch());
        assert!(
            !AppStartupOptions {
                imports: vec![PathBuf::from("a.mp3")],
                ..AppStartupOptions::default()
            }
            .exits_after_batch()
        );
        assert!(
            AppStartupOptions {
                list: true,
                ..AppStartupOptions::default()
            }
            .exits_after_batch()
        );
    }
}
