use crate::core::{PlaybackController, StorageMode};
use crate::model::{ControllerState, PlaybackState};
use crate::status::StatusLevel;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};

const APP_TITLE_WITH_VERSION: &str = concat!("reelbox v", env!("CARGO_PKG_VERSION"), "  ");
const KEY_HINTS: &str =
    "Space play/pause  Enter play  n/p next/prev  <-/-> seek  l loop  r random  Del remove  : command  q quit";

/// Transient view state owned by the app loop.
#[derive(Debug, Default)]
pub struct ViewState {
    pub selected: usize,
    pub command_mode: bool,
    pub command_buffer: String,
}

#[derive(Clone, Copy)]
struct Palette {
    bg: Color,
    panel_bg: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    alert: Color,
    selected_bg: Color,
}

const PALETTE: Palette = Palette {
    bg: Color::Rgb(10, 15, 24),
    panel_bg: Color::Rgb(19, 29, 43),
    border: Color::Rgb(69, 121, 176),
    text: Color::Rgb(214, 228, 248),
    muted: Color::Rgb(149, 173, 204),
    accent: Color::Rgb(100, 203, 184),
    alert: Color::Rgb(249, 174, 88),
    selected_bg: Color::Rgb(34, 55, 82),
};

pub fn draw(frame: &mut Frame, controller: &PlaybackController, view: &ViewState) {
    let colors = PALETTE;
    let state = controller.state();
    frame.render_widget(
        Block::default().style(Style::default().bg(colors.bg)),
        frame.area(),
    );

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let storage = match controller.storage_mode() {
        StorageMode::Durable => Span::styled("Library", Style::default().fg(colors.text)),
        StorageMode::Ephemeral => {
            Span::styled("Temporary playback", Style::default().fg(colors.alert))
        }
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            APP_TITLE_WITH_VERSION,
            Style::default()
                .fg(colors.accent)
                .add_modifier(Modifier::BOLD),
        ),
        storage,
        Span::styled(
            format!(" {}", controller.library().len()),
            Style::default().fg(colors.text),
        ),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(mode_line(&state), Style::default().fg(colors.alert)),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(controller.output_name(), Style::default().fg(colors.muted)),
    ]))
    .block(panel_block("Status", colors.panel_bg, colors.text, colors.border));
    frame.render_widget(header, vertical[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(vertical[1]);

    let items: Vec<ListItem> = controller
        .library()
        .names()
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let marker = entry_marker(&state, controller.controller_state(), index);
            let style = if state.current_index == Some(index) {
                Style::default()
                    .fg(colors.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(colors.text)
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(colors.muted)),
                Span::styled(name.as_str(), style),
            ]))
        })
        .collect();

    let mut list_state = ListState::default();
    let len = controller.library().len();
    list_state.select((len > 0).then_some(view.selected.min(len.saturating_sub(1))));

    let list = List::new(items)
        .block(panel_block(
            "Tracks",
            colors.panel_bg,
            colors.text,
            colors.border,
        ))
        .highlight_style(
            Style::default()
                .bg(colors.selected_bg)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("-> ");
    frame.render_stateful_widget(list, body[0], &mut list_state);

    let history_height = body[1].height.saturating_sub(2) as usize;
    let history: Vec<Line> = controller
        .status()
        .entries()
        .take(history_height)
        .map(|entry| {
            let color = match entry.level {
                StatusLevel::Info => colors.text,
                StatusLevel::Error => colors.alert,
            };
            Line::from(vec![
                Span::styled(
                    format!("{} ", entry.clock_label()),
                    Style::default().fg(colors.muted),
                ),
                Span::styled(entry.message.as_str(), Style::default().fg(color)),
            ])
        })
        .collect();
    frame.render_widget(
        Paragraph::new(history)
            .wrap(Wrap { trim: true })
            .block(panel_block(
                "Messages",
                colors.panel_bg,
                colors.text,
                colors.border,
            )),
        body[1],
    );

    let bar_width = vertical[2].width.saturating_sub(24).min(60) as usize;
    let now_playing = Paragraph::new(timeline_line(&state, bar_width)).block(panel_block(
        now_playing_title(&state, controller.controller_state()),
        colors.panel_bg,
        colors.text,
        colors.border,
    ));
    frame.render_widget(now_playing, vertical[2]);

    let footer = if view.command_mode {
        Paragraph::new(Line::from(vec![
            Span::styled(":", Style::default().fg(colors.accent)),
            Span::styled(view.command_buffer.as_str(), Style::default().fg(colors.text)),
        ]))
    } else {
        Paragraph::new(Span::styled(KEY_HINTS, Style::default().fg(colors.muted)))
    };
    frame.render_widget(
        footer.block(panel_block(
            "Keys",
            colors.panel_bg,
            colors.text,
            colors.border,
        )),
        vertical[3],
    );
}

fn panel_block(title: &str, bg: Color, text: Color, border: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(text).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(bg))
}

fn entry_marker(state: &PlaybackState, controller: ControllerState, index: usize) -> &'static str {
    if state.current_index != Some(index) {
        return "    ";
    }
    match controller {
        ControllerState::Playing => "  > ",
        ControllerState::Loading => "  ~ ",
        ControllerState::Paused | ControllerState::Idle => "  = ",
    }
}

fn now_playing_title(state: &PlaybackState, controller: ControllerState) -> &'static str {
    match (controller, state.current_track_name.is_some()) {
        (_, false) => "Nothing loaded",
        (ControllerState::Loading, true) => "Loading",
        (ControllerState::Playing, true) => "Playing",
        _ => "Paused",
    }
}

fn mode_line(state: &PlaybackState) -> String {
    format!(
        "Loop {}  Random {}",
        state.loop_mode.label(),
        if state.random_mode { "on" } else { "off" }
    )
}

/// `M:SS`, rounding down. Non-finite or negative input shows `0:00`.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

fn progress_bar(ratio: Option<f64>, width: usize) -> String {
    let clamped = ratio.unwrap_or(0.0).clamp(0.0, 1.0);
    let filled = (clamped * width as f64).round() as usize;
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    bar.push_str(&"#".repeat(filled));
    bar.push_str(&"-".repeat(width.saturating_sub(filled)));
    bar.push(']');
    bar
}

fn timeline_line(state: &PlaybackState, bar_width: usize) -> String {
    let Some(name) = state.current_track_name.as_deref() else {
        return String::from("-");
    };
    let ratio = (state.duration_seconds > 0.0)
        .then(|| state.position_seconds / state.duration_seconds);
    let total = if state.duration_seconds > 0.0 {
        format_time(state.duration_seconds)
    } else {
        String::from("-:--")
    };
    format!(
        "{name}  {} / {total} {}",
        format_time(state.position_seconds),
        progress_bar(ratio, bar_width)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LoopMode;

    fn playing(index: Option<usize>) -> PlaybackState {
        PlaybackState {
            current_index: index,
            current_track_name: index.map(|_| String::from("song.mp3")),
            position_seconds: 65.0,
            duration_seconds: 130.0,
            is_playing: true,
            loop_mode: LoopMode::Playlist,
            random_mode: false,
        }
    }

    #[test]
    fn format_time_uses_minutes_and_padded_seconds() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(7.9), "0:07");
        assert_eq!(format_time(65.0), "1:05");
        assert_eq!(format_time(3_725.0), "62:05");
        assert_eq!(format_time(f64::NAN), "0:00");
        assert_eq!(format_time(-3.0), "0:00");
    }

    #[test]
    fn progress_bar_clamps_ratio() {
        assert_eq!(progress_bar(Some(0.5), 4), "[##--]");
        assert_eq!(progress_bar(Some(3.0), 2), "[##]");
        assert_eq!(progress_bar(None, 2), "[--]");
    }

    #[test]
    fn markers_follow_controller_state() {
        let state = playing(Some(1));
        assert_eq!(entry_marker(&state, ControllerState::Playing, 1), "  > ");
        assert_eq!(entry_marker(&state, ControllerState::Paused, 1), "  = ");
        assert_eq!(entry_marker(&state, ControllerState::Playing, 0), "    ");
    }

    #[test]
    fn timeline_shows_position_and_duration() {
        let line = timeline_line(&playing(Some(0)), 4);
        assert_eq!(line, "song.mp3  1:05 / 2:10 [##--]");
        assert_eq!(timeline_line(&playing(None), 4), "-");
    }

    #[test]
    fn mode_line_names_both_toggles() {
        assert_eq!(mode_line(&playing(None)), "Loop playlist  Random off");
    }
}
